//! Local sprite store, `{root}/{category}/{id}.png`.
//!
//! The presence index is filled by one directory scan at startup and after that
//! only by [`AssetStore::insert`]. Files are never removed.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashSet;
use tracing::{debug, info};

use crate::error::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Avatar,
    CharacterArt,
    Weapon,
    Artifact,
}

impl Category {
    pub const ALL: [Category; 4] = [Self::Avatar, Self::CharacterArt, Self::Weapon, Self::Artifact];

    pub fn dir(self) -> &'static str {
        match self {
            Self::Avatar => "avatars",
            Self::CharacterArt => "characters",
            Self::Weapon => "weapons",
            Self::Artifact => "artifacts",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Asset {
    pub category: Category,
    pub id: u32,
}

impl Asset {
    pub const fn new(category: Category, id: u32) -> Self {
        Self { category, id }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.png", self.category.dir(), self.id)
    }
}

#[derive(Debug)]
pub struct AssetStore {
    root: PathBuf,
    present: DashSet<Asset>,
    // unique temp names for concurrent writers of the same asset
    tmp: AtomicU64,
}

impl AssetStore {
    /// Creates the category directories if needed and seeds the index.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let present = DashSet::new();
        for category in Category::ALL {
            let dir = root.join(category.dir());
            std::fs::create_dir_all(&dir)?;
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "png")
                    && let Some(id) = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(|s| s.parse::<u32>().ok())
                {
                    present.insert(Asset::new(category, id));
                }
            }
        }
        info!(root = %root.display(), assets = present.len(), "asset index seeded");
        Ok(Self {
            root,
            present,
            tmp: AtomicU64::new(0),
        })
    }

    pub fn has(&self, asset: Asset) -> bool {
        self.present.contains(&asset)
    }

    pub fn path_for(&self, asset: Asset) -> PathBuf {
        self.root
            .join(asset.category.dir())
            .join(format!("{}.png", asset.id))
    }

    /// Static, non-downloadable sprites such as element icons.
    pub fn static_path(&self, dir: &str, name: &str) -> PathBuf {
        self.root.join(dir).join(format!("{name}.png"))
    }

    /// Writes the file (temp file + rename) and only then marks it present.
    pub async fn insert(&self, asset: Asset, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(asset);
        let n = self.tmp.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("png.{n}.part"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        self.present.insert(asset);
        debug!(%asset, bytes = bytes.len(), "asset stored");
        Ok(())
    }
}
