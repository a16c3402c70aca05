//! Scheduled posts, one per guild, kept in a kv store so they survive restarts.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use kv::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    pub guild: u64,
    pub channel: u64,
    pub every: Duration,
}

impl Schedule {
    fn encode(&self) -> Vec<u8> {
        [self.guild, self.channel, self.every.as_secs()]
            .iter()
            .flat_map(|n| n.to_le_bytes())
            .collect()
    }

    fn decode(b: &[u8]) -> Option<Self> {
        let n = |i: usize| Some(u64::from_le_bytes(b.get(i * 8..i * 8 + 8)?.try_into().ok()?));
        Some(Self {
            guild: n(0)?,
            channel: n(1)?,
            every: Duration::from_secs(n(2)?),
        })
    }
}

pub struct Schedules {
    db: Store,
    bucket: Bucket<'static, Integer, Vec<u8>>,
}

impl Schedules {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Store::new(kv::Config {
            path: path.into(),
            temporary: false,
            use_compression: true,
            flush_every_ms: None,
            cache_capacity: None,
            segment_size: None,
        })?;
        let bucket = db.bucket(Some("schedules"))?;
        let s = Self { db, bucket };
        tracing::info!(path = %path.display(), mib = s.size(), "schedule store opened");
        Ok(s)
    }

    pub fn set(&self, s: Schedule) -> Result<()> {
        self.bucket.set(&s.guild.into(), &s.encode())?;
        self.bucket.flush()?;
        Ok(())
    }

    pub fn remove(&self, guild: u64) -> Result<Option<Schedule>> {
        let old = self.bucket.remove(&guild.into())?;
        self.bucket.flush()?;
        Ok(old.as_deref().and_then(Schedule::decode))
    }

    pub fn all(&self) -> Result<Vec<Schedule>> {
        let mut out = vec![];
        for item in self.bucket.iter() {
            let raw: Vec<u8> = item?.value()?;
            match Schedule::decode(&raw) {
                Some(s) => out.push(s),
                None => tracing::warn!(len = raw.len(), "skipping malformed schedule"),
            }
        }
        Ok(out)
    }

    /// MiB
    pub fn size(&self) -> f32 {
        self.db.size_on_disk().unwrap_or(0) as f32 / (1 << 20) as f32
    }
}
