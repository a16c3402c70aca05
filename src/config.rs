use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::logging::LogConfig;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub prefix: String,
    /// one cookie string per account, `#` separated in the env
    pub genshin_cookies: Vec<String>,
    pub genshin_lang: String,
    pub static_dir: PathBuf,
    pub alias_file: PathBuf,
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl: Duration,
    pub fetch: FetchConfig,
    pub render_workers: usize,
    pub setu: SetuConfig,
    pub schedule_db: PathBuf,
    pub usage_log: Option<PathBuf>,
    /// where the notes timer posts, no timer when unset
    pub note_channel: Option<u64>,
    pub note_every: Duration,
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub attempts: usize,
    pub max_requeues: u32,
    pub download_workers: usize,
}

#[derive(Debug, Clone)]
pub struct SetuConfig {
    pub api: String,
    pub proxy: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"***REDACTED***")
            .field("prefix", &self.prefix)
            .field("genshin_cookies", &format_args!("{} redacted", self.genshin_cookies.len()))
            .field("genshin_lang", &self.genshin_lang)
            .field("static_dir", &self.static_dir)
            .field("alias_file", &self.alias_file)
            .field("cache_dir", &self.cache_dir)
            .field("cache_ttl", &humantime::format_duration(self.cache_ttl))
            .field("fetch", &self.fetch)
            .field("render_workers", &self.render_workers)
            .field("setu", &self.setu)
            .field("schedule_db", &self.schedule_db)
            .field("usage_log", &self.usage_log)
            .field("note_channel", &self.note_channel)
            .field("note_every", &humantime::format_duration(self.note_every))
            .field("log", &self.log)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Self {
        let static_dir = PathBuf::from(env_or("STATIC_DIR", "./static/genshin"));
        Self {
            discord_token: env_or("DISCORD_TOKEN", ""),
            prefix: env_or("DISCORD_COMMAND_PREFIX", "!!"),
            genshin_cookies: env_or("GENSHIN_COOKIES", "")
                .split('#')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect(),
            genshin_lang: env_or("GENSHIN_LANG", "zh-cn"),
            alias_file: env_opt("ALIAS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| static_dir.join("characters.json")),
            static_dir,
            cache_dir: env_opt("CACHE_DIR").map(PathBuf::from),
            cache_ttl: Duration::from_secs(env_or_parse("CACHE_TTL_SECS", 3600_u64)),
            fetch: FetchConfig {
                attempts: env_or_parse("FETCH_ATTEMPTS", 3_usize).max(1),
                max_requeues: env_or_parse("MAX_REQUEUES", 3_u32),
                download_workers: env_or_parse("DOWNLOAD_WORKERS", 8_usize).max(1),
            },
            render_workers: env_or_parse("RENDER_WORKERS", 2_usize).max(1),
            setu: SetuConfig {
                api: env_or("SETU_API", "https://api.lolicon.app/setu/v2"),
                proxy: env_opt("SETU_PROXY"),
            },
            schedule_db: PathBuf::from(env_or("SCHEDULE_DB", "./schedules")),
            usage_log: env_opt("USAGE_LOG").map(PathBuf::from),
            note_channel: env_opt("GENSHIN_NOTE_CHANNEL_ID").and_then(|id| match id.trim().parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::warn!(value = %id, "GENSHIN_NOTE_CHANNEL_ID is not a channel id, notes timer off");
                    None
                }
            }),
            note_every: Duration::from_secs(env_or_parse("NOTE_INTERVAL_SECS", 7200_u64).max(60)),
            log: LogConfig {
                log_level: env_or("RUST_LOG", "info,paimon=debug"),
                enable_file_logs: env_or_bool("ENABLE_FILE_LOGS", false),
                log_dir: env_or("LOG_DIR", "./logs"),
            },
        }
    }
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// unset and blank are the same thing
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "failed to parse env var, using default");
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, OnceLock};

    use super::*;

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    const KEYS: &[&str] = &[
        "GENSHIN_COOKIES",
        "CACHE_TTL_SECS",
        "FETCH_ATTEMPTS",
        "CACHE_DIR",
        "ALIAS_FILE",
        "STATIC_DIR",
        "GENSHIN_NOTE_CHANNEL_ID",
        "NOTE_INTERVAL_SECS",
    ];

    fn clear() {
        for key in KEYS {
            // SAFETY: env mutation is serialized by `env_lock`
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    fn defaults() {
        let _guard = env_lock().lock().expect("env lock");
        clear();
        let c = Config::from_env();
        assert_eq!(c.cache_ttl, Duration::from_secs(3600));
        assert_eq!(c.fetch.attempts, 3);
        assert_eq!(c.fetch.max_requeues, 3);
        assert!(c.cache_dir.is_none());
        assert!(c.genshin_cookies.is_empty());
        assert_eq!(c.alias_file, PathBuf::from("./static/genshin/characters.json"));
        assert_eq!(c.note_channel, None);
        assert_eq!(c.note_every, Duration::from_secs(7200));
    }

    #[test]
    fn note_channel_must_be_an_id() {
        let _guard = env_lock().lock().expect("env lock");
        clear();
        unsafe { env::set_var("GENSHIN_NOTE_CHANNEL_ID", "1129391545418797147") };
        assert_eq!(Config::from_env().note_channel, Some(1129391545418797147));
        unsafe { env::set_var("GENSHIN_NOTE_CHANNEL_ID", "#general") };
        assert_eq!(Config::from_env().note_channel, None);
        clear();
    }

    #[test]
    fn cookies_split_on_hash() {
        let _guard = env_lock().lock().expect("env lock");
        clear();
        unsafe {
            env::set_var("GENSHIN_COOKIES", "ltuid=1; ltoken=a# ltuid=2; ltoken=b #");
            env::set_var("FETCH_ATTEMPTS", "nope");
        }
        let c = Config::from_env();
        assert_eq!(c.genshin_cookies, ["ltuid=1; ltoken=a", "ltuid=2; ltoken=b"]);
        assert_eq!(c.fetch.attempts, 3);
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("ltoken"));
        clear();
    }
}
