//! Free text to character id.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// One row of the alias table, e.g.
/// `{"id": 10000042, "name": "Keqing", "aliases": ["刻晴", "阿晴"]}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterAlias {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl CharacterAlias {
    fn spellings(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

pub struct Resolver {
    table: Vec<CharacterAlias>,
    // lowercased spellings, parallel to `table`
    folded: Vec<Vec<String>>,
}

impl Resolver {
    pub fn new(table: Vec<CharacterAlias>) -> Self {
        let folded = table
            .iter()
            .map(|c| c.spellings().map(str::to_lowercase).collect())
            .collect();
        Self { table, folded }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let table: Vec<CharacterAlias> = serde_json::from_slice(&std::fs::read(path)?)?;
        info!(path = %path.display(), characters = table.len(), "alias table loaded");
        Ok(Self::new(table))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Case-insensitive substring match against every spelling. Never guesses
    /// between several matches.
    pub fn resolve(&self, query: &str) -> Result<&CharacterAlias> {
        let q = query.trim().to_lowercase();
        let hits: Vec<&CharacterAlias> = if q.is_empty() {
            vec![]
        } else {
            self.table
                .iter()
                .zip(&self.folded)
                .filter(|(_, spellings)| spellings.iter().any(|s| s.contains(&q)))
                .map(|(c, _)| c)
                .collect()
        };
        match hits[..] {
            [] => Err(Error::UnknownCharacter {
                query: query.trim().to_string(),
                suggestions: self.suggest(&q),
            }),
            [one] => Ok(one),
            _ => Err(Error::AmbiguousCharacter(
                hits.into_iter().map(|c| c.name.clone()).collect(),
            )),
        }
    }

    /// Up to three canonical names that look like `query`.
    pub fn suggest(&self, query: &str) -> Vec<String> {
        if query.is_empty() {
            return vec![];
        }
        let mut scored: Vec<(f32, &str)> = self
            .table
            .iter()
            .zip(&self.folded)
            .map(|(c, spellings)| {
                let best = spellings
                    .iter()
                    .map(|s| rust_fuzzy_search::fuzzy_compare(s, query))
                    .fold(0.0, f32::max);
                (best, c.name.as_str())
            })
            .filter(|&(score, _)| score > 0.3)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().take(3).map(|(_, n)| n.to_string()).collect()
    }
}
