//! Read-through caches in front of [`GameApi`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::api::GameApi;
use super::{CharacterDetail, UserStats};
use crate::cache::{Envelope, TtlCache};
use crate::error::{Error, Result};
use crate::resolve::CharacterAlias;

pub struct StatsCache {
    api: Arc<dyn GameApi>,
    stats: TtlCache<UserStats>,
    characters: TtlCache<CharacterDetail>,
}

impl StatsCache {
    pub fn new(api: Arc<dyn GameApi>, ttl: Duration, dir: Option<PathBuf>) -> Self {
        Self {
            api,
            stats: TtlCache::new(ttl, dir.clone()),
            characters: TtlCache::new(ttl, dir),
        }
    }

    /// The uncached client, for data that is only worth having live.
    pub fn api(&self) -> &dyn GameApi {
        self.api.as_ref()
    }

    pub async fn get_user_stats(&self, uid: u64) -> Result<Arc<Envelope<UserStats>>> {
        self.stats
            .get_or_load(&format!("stats_{uid}"), || self.api.user_stats(uid))
            .await
    }

    pub async fn get_character(&self, uid: u64, who: &CharacterAlias) -> Result<Arc<Envelope<CharacterDetail>>> {
        self.characters
            .get_or_load(&format!("characters_{uid}_{}", who.id), || async {
                self.api
                    .character(uid, who.id)
                    .await?
                    .ok_or_else(|| Error::CharacterNotOwned {
                        uid,
                        name: who.name.clone(),
                    })
            })
            .await
    }
}
