pub mod api;
pub mod stats;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assets::{Asset, Category};
use crate::download::DownloadTask;

/// Both traveler ids; whichever the account has is its "face".
pub const TRAVELERS: [u32; 2] = [10000005, 10000007];

static REGION: phf::Map<char, &'static str> = phf::phf_map! {
    '1' => "Celestia",
    '2' => "Celestia",
    '5' => "Irminsul",
    '6' => "America",
    '7' => "Europe",
    '8' => "Asia",
    '9' => "TW, HK, MO",
};

static SERVER: phf::Map<char, &'static str> = phf::phf_map! {
    '1' => "cn_gf01",
    '2' => "cn_gf01",
    '5' => "cn_qd01",
    '6' => "os_usa",
    '7' => "os_euro",
    '8' => "os_asia",
    '9' => "os_cht",
};

fn lead(uid: u64) -> Option<char> {
    uid.to_string().chars().next()
}

/// Display label for the uid's region. Unknown leading digits give `""`.
pub fn region_label(uid: u64) -> &'static str {
    lead(uid).and_then(|c| REGION.get(&c)).copied().unwrap_or("")
}

/// Upstream server code, `None` when the uid cannot belong to any server.
pub fn server_code(uid: u64) -> Option<&'static str> {
    lead(uid).and_then(|c| SERVER.get(&c)).copied()
}

pub fn is_chinese(server: &str) -> bool {
    server.starts_with("cn")
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Chests {
    pub common: u32,
    pub exquisite: u32,
    pub precious: u32,
    pub luxurious: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Oculi {
    pub anemo: u32,
    pub geo: u32,
    pub electro: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Exploration {
    pub id: u32,
    pub name: String,
    /// per mille, 1000 is fully explored
    pub permille: u32,
    pub level: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Home {
    pub comfort: u32,
    pub comfort_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharacterSummary {
    pub id: u32,
    pub name: String,
    pub element: String,
    pub rarity: u8,
    pub level: u32,
    pub constellation: u8,
    pub friendship: u8,
    pub icon: String,
}

impl CharacterSummary {
    pub fn avatar(&self) -> Asset {
        Asset::new(Category::Avatar, self.id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub days_active: u32,
    pub achievements: u32,
    pub characters_count: u32,
    pub spiral_abyss: String,
    pub chests: Chests,
    pub oculi: Oculi,
    pub explorations: Vec<Exploration>,
    pub home: Option<Home>,
    pub characters: Vec<CharacterSummary>,
}

impl UserStats {
    pub fn traveler(&self) -> Option<&CharacterSummary> {
        self.characters.iter().find(|c| TRAVELERS.contains(&c.id))
    }

    /// Every sprite the user card references.
    pub fn downloads(&self) -> Vec<DownloadTask> {
        self.characters
            .iter()
            .filter(|c| !c.icon.is_empty())
            .map(|c| DownloadTask::new(c.avatar(), &c.icon))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Weapon {
    pub id: u32,
    pub name: String,
    pub level: u32,
    pub rarity: u8,
    pub refinement: u8,
    pub icon: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: u32,
    pub name: String,
    pub level: u32,
    pub rarity: u8,
    /// slot, 1 flower through 5 circlet
    pub pos: u8,
    pub icon: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharacterDetail {
    pub id: u32,
    pub name: String,
    pub element: String,
    pub rarity: u8,
    pub level: u32,
    pub constellation: u8,
    pub friendship: u8,
    pub image: String,
    pub weapon: Weapon,
    pub artifacts: Vec<Artifact>,
}

impl CharacterDetail {
    pub fn art(&self) -> Asset {
        Asset::new(Category::CharacterArt, self.id)
    }

    pub fn downloads(&self) -> Vec<DownloadTask> {
        std::iter::once(DownloadTask::new(self.art(), &self.image))
            .chain(std::iter::once(DownloadTask::new(
                Asset::new(Category::Weapon, self.weapon.id),
                &self.weapon.icon,
            )))
            .chain(
                self.artifacts
                    .iter()
                    .map(|a| DownloadTask::new(Asset::new(Category::Artifact, a.id), &a.icon)),
            )
            .filter(|t| !t.url.is_empty())
            .collect()
    }
}

/// The game role behind a credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordCard {
    pub uid: u64,
    pub nickname: String,
    pub server_name: String,
    pub level: u32,
}

/// Real-time notes of one role.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Notes {
    pub current_resin: u32,
    pub max_resin: u32,
    /// until resin is full, zero when it already is
    pub resin_recovery: Duration,
    pub completed_commissions: u32,
    pub max_commissions: u32,
    pub remaining_resin_discounts: u32,
    pub max_resin_discounts: u32,
    pub finished_expeditions: u32,
    pub max_expeditions: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_from_leading_digit() {
        assert_eq!(region_label(123456789), "Celestia");
        assert_eq!(region_label(500000001), "Irminsul");
        assert_eq!(region_label(800000001), "Asia");
        assert_eq!(region_label(300000001), "");
        assert_eq!(region_label(0), "");
        assert_eq!(server_code(600000001), Some("os_usa"));
        assert_eq!(server_code(400000001), None);
        assert!(is_chinese(server_code(123456789).unwrap()));
    }

    #[test]
    fn detail_downloads_cover_every_sprite() {
        let d = CharacterDetail {
            id: 10000002,
            name: "Kamisato Ayaka".into(),
            element: "Cryo".into(),
            rarity: 5,
            level: 90,
            constellation: 0,
            friendship: 10,
            image: "https://x/art.png".into(),
            weapon: Weapon {
                id: 11509,
                name: "Mistsplitter Reforged".into(),
                level: 90,
                rarity: 5,
                refinement: 1,
                icon: "https://x/w.png".into(),
            },
            artifacts: vec![Artifact {
                id: 82,
                name: "Flower".into(),
                level: 20,
                rarity: 5,
                pos: 1,
                icon: "https://x/a.png".into(),
            }],
        };
        let assets: Vec<_> = d.downloads().into_iter().map(|t| t.asset).collect();
        assert_eq!(
            assets,
            [
                Asset::new(Category::CharacterArt, 10000002),
                Asset::new(Category::Weapon, 11509),
                Asset::new(Category::Artifact, 82),
            ]
        );
    }
}
