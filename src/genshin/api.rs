//! HoYoLAB / miHoYo game record client.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use super::*;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, Request};

const OS_RECORD: &str = "https://bbs-api-os.hoyolab.com/game_record/genshin/api";
const CN_RECORD: &str = "https://api-takumi-record.mihoyo.com/game_record/app/genshin/api";
const RECORD_CARD: &str = "https://bbs-api-os.hoyolab.com/game_record/card/wapi/getGameRecordCard";
const GENSHIN_GAME_ID: u32 = 2;

const ACCOUNT_NOT_FOUND: i64 = 1009;
const RATE_LIMITED: i64 = 10101;
const DATA_PRIVATE: i64 = 10102;

#[async_trait]
pub trait GameApi: Send + Sync {
    async fn user_stats(&self, uid: u64) -> Result<UserStats>;
    /// `None` when the account does not have that character.
    async fn character(&self, uid: u64, id: u32) -> Result<Option<CharacterDetail>>;
    /// Number of configured accounts, the valid `account` indices below.
    fn accounts(&self) -> usize;
    /// The role owned by the account behind credential `account`.
    async fn record_card(&self, account: usize) -> Result<RecordCard>;
    /// Real-time notes of `card`, asked with the same credential.
    async fn notes(&self, account: usize, card: &RecordCard) -> Result<Notes>;
}

/// A cookie string such as `ltuid=...; ltoken=...`.
#[derive(Clone)]
pub struct Credential(String);

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl Credential {
    /// The HoYoLAB account id the cookie belongs to.
    pub fn account_id(&self) -> Option<u64> {
        self.0
            .split(';')
            .filter_map(|kv| kv.trim().split_once('='))
            .find(|(k, _)| matches!(*k, "ltuid" | "ltuid_v2" | "account_id" | "account_id_v2"))
            .and_then(|(_, v)| v.trim().parse().ok())
    }
}

/// Round-robin over the configured accounts; each call takes the next one.
#[derive(Debug)]
pub struct CredentialPool {
    creds: Vec<Credential>,
    next: AtomicUsize,
}

impl CredentialPool {
    pub fn new(cookies: impl IntoIterator<Item = String>) -> Self {
        Self {
            creds: cookies.into_iter().map(Credential).collect(),
            next: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.creds.len()
    }

    pub fn get(&self, i: usize) -> Result<&Credential> {
        self.creds.get(i).ok_or(Error::NoCredentials)
    }

    pub fn next(&self) -> Result<&Credential> {
        if self.creds.is_empty() {
            return Err(Error::NoCredentials);
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.creds.len();
        Ok(&self.creds[i])
    }
}

pub struct Hoyolab {
    fetcher: Fetcher,
    pool: CredentialPool,
    lang: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    retcode: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl Hoyolab {
    pub fn new(fetcher: Fetcher, pool: CredentialPool, lang: impl Into<String>) -> Self {
        Self {
            fetcher,
            pool,
            lang: lang.into(),
        }
    }

    fn base(server: &str) -> &'static str {
        if is_chinese(server) { CN_RECORD } else { OS_RECORD }
    }

    /// Runs `build` with successive credentials while upstream reports the
    /// credential as rate limited.
    async fn call<T: DeserializeOwned>(&self, uid: u64, build: impl Fn() -> Request) -> Result<T> {
        for _ in 0..self.pool.len().max(1) {
            let cred = self.pool.next()?;
            match self.send(cred, uid, build()).await {
                Err(Error::Api {
                    retcode: RATE_LIMITED,
                    ..
                }) => warn!(uid, "credential rate limited, rotating"),
                r => return r,
            }
        }
        Err(Error::Api {
            retcode: RATE_LIMITED,
            message: "every credential is rate limited".into(),
        })
    }

    /// One request with `cred`, retcode mapped.
    async fn send<T: DeserializeOwned>(&self, cred: &Credential, uid: u64, req: Request) -> Result<T> {
        let req = req
            .header("Cookie", &cred.0)
            .header("x-rpc-language", &self.lang);
        let resp: Envelope<T> = self.fetcher.json(&req).await?;
        match resp.retcode {
            0 => resp.data.ok_or(Error::Api {
                retcode: 0,
                message: "empty data".into(),
            }),
            ACCOUNT_NOT_FOUND => Err(Error::AccountNotFound(uid)),
            DATA_PRIVATE => Err(Error::DataPrivate(uid)),
            retcode => Err(Error::Api {
                retcode,
                message: resp.message,
            }),
        }
    }
}

#[async_trait]
impl GameApi for Hoyolab {
    async fn user_stats(&self, uid: u64) -> Result<UserStats> {
        let server = server_code(uid).ok_or(Error::AccountNotFound(uid))?;
        debug!(uid, server, "fetching index");
        let url = format!("{}/index?server={server}&role_id={uid}", Self::base(server));
        let index: wire::Index = self.call(uid, || Request::get(&url)).await?;
        Ok(index.into())
    }

    async fn character(&self, uid: u64, id: u32) -> Result<Option<CharacterDetail>> {
        let server = server_code(uid).ok_or(Error::AccountNotFound(uid))?;
        debug!(uid, server, id, "fetching character");
        let url = format!("{}/character", Self::base(server));
        let body = json!({ "character_ids": [id], "role_id": uid.to_string(), "server": server });
        let list: wire::Characters = match self.call(uid, || Request::post(&url, body.clone())).await {
            Ok(list) => list,
            Err(Error::Api { message, .. }) if message.contains("does not have") => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(list
            .avatars
            .into_iter()
            .find(|d| d.avatar.id == id)
            .map(Into::into))
    }

    fn accounts(&self) -> usize {
        self.pool.len()
    }

    async fn record_card(&self, account: usize) -> Result<RecordCard> {
        let cred = self.pool.get(account)?;
        let hoyolab = cred.account_id().ok_or(Error::BadCredential(account))?;
        debug!(account, "fetching record card");
        let url = format!("{RECORD_CARD}?uid={hoyolab}");
        let cards: wire::Cards = self.send(cred, hoyolab, Request::get(url)).await?;
        cards
            .list
            .into_iter()
            .find(|c| c.game_id == GENSHIN_GAME_ID)
            .map(Into::into)
            .ok_or(Error::Api {
                retcode: 0,
                message: format!("account #{account} has no genshin role"),
            })
    }

    async fn notes(&self, account: usize, card: &RecordCard) -> Result<Notes> {
        let cred = self.pool.get(account)?;
        let uid = card.uid;
        let server = server_code(uid).ok_or(Error::AccountNotFound(uid))?;
        debug!(account, uid, server, "fetching notes");
        let url = format!("{}/dailyNote?server={server}&role_id={uid}", Self::base(server));
        let notes: wire::DailyNote = self.send(cred, uid, Request::get(url)).await?;
        Ok(notes.into())
    }
}

/// Upstream JSON shapes.
mod wire {
    use serde::Deserialize;

    use crate::genshin::*;

    #[derive(Deserialize)]
    pub struct Index {
        pub stats: Stats,
        #[serde(default)]
        pub avatars: Vec<Avatar>,
        #[serde(default)]
        pub world_explorations: Vec<World>,
        #[serde(default)]
        pub homes: Vec<House>,
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    pub struct Stats {
        pub active_day_number: u32,
        pub achievement_number: u32,
        pub avatar_number: u32,
        pub spiral_abyss: String,
        pub common_chest_number: u32,
        pub exquisite_chest_number: u32,
        pub precious_chest_number: u32,
        pub luxurious_chest_number: u32,
        pub anemoculus_number: u32,
        pub geoculus_number: u32,
        pub electroculus_number: u32,
    }

    #[derive(Deserialize)]
    pub struct Avatar {
        pub id: u32,
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub element: String,
        #[serde(default)]
        pub rarity: u8,
        #[serde(default)]
        pub level: u32,
        #[serde(default)]
        pub actived_constellation_num: u8,
        #[serde(default)]
        pub fetter: u8,
        #[serde(default)]
        pub image: String,
    }

    #[derive(Deserialize)]
    pub struct World {
        pub id: u32,
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub exploration_percentage: u32,
        #[serde(default)]
        pub level: u32,
    }

    #[derive(Deserialize)]
    pub struct House {
        #[serde(default)]
        pub comfort_num: u32,
        #[serde(default)]
        pub comfort_level_name: String,
    }

    #[derive(Deserialize)]
    pub struct Cards {
        #[serde(default)]
        pub list: Vec<Card>,
    }

    #[derive(Deserialize)]
    pub struct Card {
        pub game_id: u32,
        #[serde(default)]
        pub game_role_id: String,
        #[serde(default)]
        pub nickname: String,
        #[serde(default)]
        pub region_name: String,
        #[serde(default)]
        pub level: u32,
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    pub struct DailyNote {
        pub current_resin: u32,
        pub max_resin: u32,
        /// seconds, sent as a string
        pub resin_recovery_time: serde_json::Value,
        pub finished_task_num: u32,
        pub total_task_num: u32,
        pub remain_resin_discount_num: u32,
        pub resin_discount_num_limit: u32,
        pub max_expedition_num: u32,
        pub expeditions: Vec<Expedition>,
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    pub struct Expedition {
        pub status: String,
    }

    #[derive(Deserialize)]
    pub struct Characters {
        #[serde(default)]
        pub avatars: Vec<Detail>,
    }

    #[derive(Deserialize)]
    pub struct Detail {
        #[serde(flatten)]
        pub avatar: Avatar,
        pub weapon: Arm,
        #[serde(default)]
        pub reliquaries: Vec<Relic>,
    }

    #[derive(Deserialize)]
    pub struct Arm {
        pub id: u32,
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub icon: String,
        #[serde(default)]
        pub rarity: u8,
        #[serde(default)]
        pub level: u32,
        #[serde(default)]
        pub affix_level: u8,
    }

    #[derive(Deserialize)]
    pub struct Relic {
        pub id: u32,
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub icon: String,
        #[serde(default)]
        pub pos: u8,
        #[serde(default)]
        pub rarity: u8,
        #[serde(default)]
        pub level: u32,
    }

    impl From<Avatar> for CharacterSummary {
        fn from(a: Avatar) -> Self {
            Self {
                id: a.id,
                name: a.name,
                element: a.element,
                rarity: a.rarity,
                level: a.level,
                constellation: a.actived_constellation_num,
                friendship: a.fetter,
                icon: a.image,
            }
        }
    }

    impl From<Index> for UserStats {
        fn from(i: Index) -> Self {
            let s = i.stats;
            Self {
                days_active: s.active_day_number,
                achievements: s.achievement_number,
                characters_count: s.avatar_number,
                spiral_abyss: s.spiral_abyss,
                chests: Chests {
                    common: s.common_chest_number,
                    exquisite: s.exquisite_chest_number,
                    precious: s.precious_chest_number,
                    luxurious: s.luxurious_chest_number,
                },
                oculi: Oculi {
                    anemo: s.anemoculus_number,
                    geo: s.geoculus_number,
                    electro: s.electroculus_number,
                },
                explorations: i
                    .world_explorations
                    .into_iter()
                    .map(|w| Exploration {
                        id: w.id,
                        name: w.name,
                        permille: w.exploration_percentage,
                        level: w.level,
                    })
                    .collect(),
                // comfort is shared by every realm
                home: i.homes.into_iter().next().map(|h| Home {
                    comfort: h.comfort_num,
                    comfort_name: h.comfort_level_name,
                }),
                characters: i.avatars.into_iter().map(Into::into).collect(),
            }
        }
    }

    impl From<Card> for RecordCard {
        fn from(c: Card) -> Self {
            Self {
                uid: c.game_role_id.parse().unwrap_or(0),
                nickname: c.nickname,
                server_name: c.region_name,
                level: c.level,
            }
        }
    }

    impl From<DailyNote> for Notes {
        fn from(n: DailyNote) -> Self {
            let secs = match &n.resin_recovery_time {
                serde_json::Value::String(s) => s.parse().unwrap_or(0),
                v => v.as_u64().unwrap_or(0),
            };
            Self {
                current_resin: n.current_resin,
                max_resin: n.max_resin,
                resin_recovery: std::time::Duration::from_secs(secs),
                completed_commissions: n.finished_task_num,
                max_commissions: n.total_task_num,
                remaining_resin_discounts: n.remain_resin_discount_num,
                max_resin_discounts: n.resin_discount_num_limit,
                finished_expeditions: n
                    .expeditions
                    .iter()
                    .filter(|e| e.status == "Finished")
                    .count() as u32,
                max_expeditions: n.max_expedition_num,
            }
        }
    }

    impl From<Detail> for CharacterDetail {
        fn from(d: Detail) -> Self {
            let mut artifacts: Vec<Artifact> = d
                .reliquaries
                .into_iter()
                .map(|r| Artifact {
                    id: r.id,
                    name: r.name,
                    level: r.level,
                    rarity: r.rarity,
                    pos: r.pos,
                    icon: r.icon,
                })
                .collect();
            artifacts.sort_by_key(|a| a.pos);
            let a = d.avatar;
            Self {
                id: a.id,
                name: a.name,
                element: a.element,
                rarity: a.rarity,
                level: a.level,
                constellation: a.actived_constellation_num,
                friendship: a.fetter,
                image: a.image,
                weapon: Weapon {
                    id: d.weapon.id,
                    name: d.weapon.name,
                    level: d.weapon.level,
                    rarity: d.weapon.rarity,
                    refinement: d.weapon.affix_level,
                    icon: d.weapon.icon,
                },
                artifacts,
            }
        }
    }
}
