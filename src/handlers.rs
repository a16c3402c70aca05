//! Chat-independent command bodies. Each turns one request into exactly one
//! [`Reply`], whatever fails underneath.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::assets::AssetStore;
use crate::cache::unix_now;
use crate::card::{Card, Composer};
use crate::config::Config;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, HttpTransport, Transport};
use crate::genshin::api::{CredentialPool, GameApi, Hoyolab};
use crate::genshin::stats::StatsCache;
use crate::genshin::{Notes, RecordCard};
use crate::resolve::Resolver;
use crate::setu::{SetuClient, SetuQuery};

pub struct App {
    pub stats: StatsCache,
    pub resolver: Resolver,
    pub downloader: Downloader,
    pub composer: Composer,
    pub setu: SetuClient,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Image {
        content: String,
        filename: String,
        bytes: Vec<u8>,
    },
}

impl App {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);
        let fetcher = Fetcher::new(transport, config.fetch.attempts);
        let api: Arc<dyn GameApi> = Arc::new(Hoyolab::new(
            fetcher.clone(),
            CredentialPool::new(config.genshin_cookies.clone()),
            config.genshin_lang.clone(),
        ));
        let store = Arc::new(AssetStore::open(config.static_dir.clone())?);
        let resolver = Resolver::load(&config.alias_file)?;
        Ok(Self {
            stats: StatsCache::new(api, config.cache_ttl, config.cache_dir.clone()),
            resolver,
            downloader: Downloader::new(
                Arc::clone(&store),
                fetcher.clone(),
                config.fetch.max_requeues,
                config.fetch.download_workers,
            ),
            composer: Composer::new(store, config.render_workers),
            setu: SetuClient::new(fetcher, config.setu.clone()),
        })
    }

    pub async fn user_card(&self, uid: u64) -> Reply {
        self.user_card_inner(uid).await.unwrap_or_else(failure)
    }

    /// Resolves `name` before anything touches the network.
    pub async fn character_card(&self, uid: u64, name: &str) -> Reply {
        self.character_card_inner(uid, name).await.unwrap_or_else(failure)
    }

    pub async fn random_setu(&self, nsfw: bool, tags: &str) -> Reply {
        self.random_setu_inner(&SetuQuery::new(nsfw, tags))
            .await
            .unwrap_or_else(failure)
    }

    /// Live notes of every configured account, one section each. A failing
    /// account gets its error line and does not hide the others.
    pub async fn notes(&self) -> Reply {
        let accounts = self.stats.api().accounts();
        if accounts == 0 {
            return failure(Error::NoCredentials);
        }
        let now = unix_now();
        let mut sections = Vec::with_capacity(accounts);
        for account in 0..accounts {
            sections.push(match self.account_notes(account).await {
                Ok((card, notes)) => note_section(&card, &notes, now),
                Err(e) => {
                    warn!(account, error = %e, "notes unavailable");
                    format!("account #{account}: {}", e.user_message())
                }
            });
        }
        Reply::Text(format!("**real-time notes**\n\n{}", sections.join("\n\n")))
    }

    async fn account_notes(&self, account: usize) -> Result<(RecordCard, Notes)> {
        let api = self.stats.api();
        let card = api.record_card(account).await?;
        let notes = api.notes(account, &card).await?;
        Ok((card, notes))
    }

    async fn user_card_inner(&self, uid: u64) -> Result<Reply> {
        let stats = self.stats.get_user_stats(uid).await?;
        self.downloader.ensure(stats.data.downloads()).await;
        let card = self.composer.user_card(uid, stats).await?;
        Ok(image(card, format!("{uid}.png")))
    }

    async fn character_card_inner(&self, uid: u64, name: &str) -> Result<Reply> {
        let who = self.resolver.resolve(name)?;
        let detail = self.stats.get_character(uid, who).await?;
        self.downloader.ensure(detail.data.downloads()).await;
        let card = self.composer.character_card(uid, detail).await?;
        Ok(image(card, format!("{uid}_{}.png", who.id)))
    }

    async fn random_setu_inner(&self, q: &SetuQuery) -> Result<Reply> {
        let s = self.setu.pick(q).await?;
        let bytes = self.setu.image(&s).await?;
        Ok(Reply::Image {
            content: s.caption(),
            filename: s.filename().to_string(),
            bytes,
        })
    }
}

fn image(card: Card, filename: String) -> Reply {
    for asset in card.missing {
        let e = Error::AssetMissingAfterRetries(asset);
        warn!(%asset, "{e}");
    }
    Reply::Image {
        content: card.caption,
        filename,
        bytes: card.png,
    }
}

fn note_section(card: &RecordCard, n: &Notes, now: u64) -> String {
    let resin = if n.resin_recovery.is_zero() {
        "full".to_string()
    } else {
        // discord renders this as a relative time
        format!("full <t:{}:R>", now + n.resin_recovery.as_secs())
    };
    format!(
        "**{}** {} Lv.{}\n\
         resin `{}/{}` ({resin})\n\
         commissions `{}/{}`\n\
         weekly boss discounts `{}/{}`\n\
         expeditions `{}/{}`",
        card.nickname,
        card.server_name,
        card.level,
        n.current_resin,
        n.max_resin,
        n.completed_commissions,
        n.max_commissions,
        n.remaining_resin_discounts,
        n.max_resin_discounts,
        n.finished_expeditions,
        n.max_expeditions,
    )
}

fn failure(e: Error) -> Reply {
    if e.is_user_facing() {
        info!(error = %e, "request refused");
    } else {
        error!(error = ?e, "request failed");
    }
    Reply::Text(e.user_message())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::SetuConfig;
    use crate::error::QUERY_FAILED;
    use crate::fetch::tests::Scripted;
    use crate::genshin::stats::tests::FakeApi;
    use crate::resolve::CharacterAlias;

    fn app(api: Arc<FakeApi>, transport: Arc<Scripted>, dir: &std::path::Path) -> App {
        let fetcher = Fetcher::new(transport, 3);
        let store = Arc::new(AssetStore::open(dir).unwrap());
        let row = |id, name: &str| CharacterAlias {
            id,
            name: name.into(),
            aliases: vec![],
        };
        App {
            stats: StatsCache::new(api, Duration::from_secs(3600), None),
            resolver: Resolver::new(vec![
                row(1, "Name A"),
                row(2, "Name B"),
                row(10000042, "Keqing"),
                row(10000030, "Zhongli"),
            ]),
            downloader: Downloader::new(Arc::clone(&store), fetcher.clone(), 3, 4),
            composer: Composer::new(store, 1),
            setu: SetuClient::new(
                fetcher,
                SetuConfig {
                    api: "https://setu".into(),
                    proxy: None,
                },
            ),
        }
    }

    #[tokio::test]
    async fn ambiguous_name_lists_both_and_never_calls_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::new(4);
        let app = app(api.clone(), Arc::new(Scripted::failing()), dir.path());
        let Reply::Text(msg) = app.character_card(123456789, "name").await else {
            panic!("expected text");
        };
        assert!(msg.contains("**Name A**") && msg.contains("**Name B**"));
        assert_eq!(msg.matches("**").count(), 4);
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn user_card_renders_despite_failed_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(Scripted::failing());
        let app = app(FakeApi::new(4), transport.clone(), dir.path());
        let Reply::Image { content, filename, bytes } = app.user_card(123456789).await else {
            panic!("expected image");
        };
        assert!(content.contains("Celestia"));
        assert_eq!(filename, "123456789.png");
        assert!(!bytes.is_empty());
        // every portrait tried three times, then parked for the next render
        assert_eq!(transport.calls(), 12);
        assert_eq!(app.downloader.pending().await.len(), 4);
    }

    #[tokio::test]
    async fn character_card_for_a_resolved_name() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(Scripted::ok(b"not a png"));
        let app = app(FakeApi::new(0), transport, dir.path());
        let Reply::Image { content, filename, .. } = app.character_card(800000001, "keq").await else {
            panic!("expected image");
        };
        assert!(content.contains("**Keqing**"));
        assert_eq!(filename, "800000001_10000042.png");
    }

    #[tokio::test]
    async fn each_failure_is_one_message() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(FakeApi::new(0), Arc::new(Scripted::failing()), dir.path());
        assert_eq!(
            app.user_card(100000404).await,
            Reply::Text(Error::AccountNotFound(100000404).user_message())
        );
        assert_eq!(
            app.character_card(800000001, "zhong").await,
            Reply::Text(
                Error::CharacterNotOwned {
                    uid: 800000001,
                    name: "Zhongli".into()
                }
                .user_message()
            )
        );
        let Reply::Text(msg) = app.character_card(800000001, "venti").await else {
            panic!("expected text");
        };
        assert!(msg.starts_with("there is no **venti**"));
        // upstream down
        assert_eq!(app.random_setu(false, "").await, Reply::Text(QUERY_FAILED.into()));
    }

    #[tokio::test]
    async fn notes_cover_every_account() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::new(0);
        let app = app(api.clone(), Arc::new(Scripted::failing()), dir.path());
        let Reply::Text(msg) = app.notes().await else {
            panic!("expected text");
        };
        assert!(msg.contains("**Lumine** Asia Server Lv.58"));
        assert!(msg.contains("resin `120/160` (full <t:"));
        assert!(msg.contains("commissions `4/4`"));
        assert!(msg.contains("weekly boss discounts `1/3`"));
        assert!(msg.contains("expeditions `2/5`"));
        assert!(msg.ends_with(&format!("account #1: {QUERY_FAILED}")));
        // card and notes for the first account, card for the second
        assert_eq!(api.calls(), 3);
    }

    #[test]
    fn full_resin_has_no_countdown() {
        let card = RecordCard {
            uid: 600000002,
            nickname: "Aether".into(),
            server_name: "America Server".into(),
            level: 60,
        };
        let notes = Notes {
            current_resin: 160,
            max_resin: 160,
            ..Default::default()
        };
        let s = note_section(&card, &notes, 1_700_000_000);
        assert!(s.contains("resin `160/160` (full)"));
        assert!(!s.contains("<t:"));
    }

    #[tokio::test]
    async fn setu_reply_carries_caption_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let listing = json!({"data": [{
            "pid": 1, "title": "t", "author": "a", "tags": ["x"],
            "urls": {"regular": "https://i.pximg.net/1_p0.jpg"}
        }]});
        let transport = Arc::new(Scripted::ok(b"jpeg").then(Ok(serde_json::to_vec(&listing).unwrap())));
        let app = app(FakeApi::new(0), transport, dir.path());
        let Reply::Image { content, filename, bytes } = app.random_setu(true, "x").await else {
            panic!("expected image");
        };
        assert!(content.contains("artworks/1"));
        assert_eq!(filename, "1_p0.jpg");
        assert_eq!(bytes, b"jpeg");

        let app2 = self::app(
            FakeApi::new(0),
            Arc::new(Scripted::ok(br#"{"data": []}"#)),
            dir.path(),
        );
        assert_eq!(app2.random_setu(false, "").await, Reply::Text(Error::NoSetu.user_message()));
    }
}
