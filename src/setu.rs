//! Random Pixiv illustrations through the lolicon v2 API.

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::SetuConfig;
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, Request};

const REFERER: &str = "https://www.pixiv.net/";
const BROWSER: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
                       Chrome/89.0.4389.114 Safari/537.36 Edg/89.0.774.68";

/// 0 safe only, 1 r18 only, 2 either.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Rating {
    Safe = 0,
    Mixed = 2,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetuQuery {
    pub rating: Rating,
    /// each entry may hold `|`-separated alternatives
    pub tags: Vec<String>,
}

impl SetuQuery {
    /// `tags` is what the user typed, comma separated.
    pub fn new(nsfw: bool, tags: &str) -> Self {
        Self {
            rating: if nsfw { Rating::Mixed } else { Rating::Safe },
            tags: tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Setu {
    pub pid: u64,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub urls: Urls,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Urls {
    pub regular: String,
}

impl Setu {
    pub fn caption(&self) -> String {
        format!(
            ">>> *Source:* <https://www.pixiv.net/artworks/{}>\n*Title:* {}\n*Author:* {}\n*Tags:* {}",
            self.pid,
            self.title,
            self.author,
            self.tags.join("|")
        )
    }

    pub fn filename(&self) -> &str {
        self.urls
            .regular
            .rsplit('/')
            .next()
            .filter(|f| !f.is_empty())
            .unwrap_or("setu.jpg")
    }
}

#[derive(Deserialize)]
struct Listing {
    #[serde(default)]
    data: Vec<Setu>,
}

pub struct SetuClient {
    fetcher: Fetcher,
    config: SetuConfig,
}

impl SetuClient {
    pub fn new(fetcher: Fetcher, config: SetuConfig) -> Self {
        Self { fetcher, config }
    }

    pub async fn pick(&self, q: &SetuQuery) -> Result<Setu> {
        let mut body = json!({
            "r18": q.rating as u8,
            "size": ["original", "regular"],
            "proxy": self.config.proxy.as_deref().unwrap_or(""),
        });
        if !q.tags.is_empty() {
            body["tag"] = json!(q.tags);
        }
        let listing: Listing = self.fetcher.json(&Request::post(&self.config.api, body)).await?;
        debug!(results = listing.data.len(), "setu listing");
        listing.data.into_iter().next().ok_or(Error::NoSetu)
    }

    pub async fn image(&self, s: &Setu) -> Result<Vec<u8>> {
        let req = Request::get(&s.urls.regular)
            .header("Referer", REFERER)
            .header("User-Agent", BROWSER);
        let bytes = self.fetcher.fetch(&req).await?;
        info!(pid = s.pid, bytes = bytes.len(), "setu fetched");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::fetch::Transport;

    struct Booru {
        seen: Mutex<Vec<Request>>,
        listing: serde_json::Value,
    }

    #[async_trait]
    impl Transport for Booru {
        async fn send(&self, req: &Request) -> anyhow::Result<Vec<u8>> {
            self.seen.lock().unwrap().push(req.clone());
            if req.body.is_some() {
                Ok(serde_json::to_vec(&self.listing)?)
            } else {
                Ok(b"jpeg".to_vec())
            }
        }
    }

    fn client(listing: serde_json::Value) -> (Arc<Booru>, SetuClient) {
        let b = Arc::new(Booru {
            seen: Mutex::new(vec![]),
            listing,
        });
        let c = SetuClient::new(
            Fetcher::new(b.clone(), 3),
            SetuConfig {
                api: "https://api.lolicon.app/setu/v2".into(),
                proxy: None,
            },
        );
        (b, c)
    }

    fn one() -> serde_json::Value {
        json!({"error": "", "data": [{
            "pid": 91234567, "title": "夏", "author": "someone", "tags": ["原神", "Keqing"],
            "urls": {"original": "https://i.pximg.net/o/91234567_p0.png", "regular": "https://i.pximg.net/img-master/91234567_p0_master1200.jpg"}
        }]})
    }

    #[test]
    fn query_from_user_text() {
        let q = SetuQuery::new(false, "原神, 刻晴|甘雨,,");
        assert_eq!(q.rating, Rating::Safe);
        assert_eq!(q.tags, ["原神", "刻晴|甘雨"]);
        assert!(SetuQuery::new(true, "").tags.is_empty());
        assert_eq!(SetuQuery::new(true, "").rating as u8, 2);
    }

    #[tokio::test]
    async fn caption_and_filename() {
        let (b, c) = client(one());
        let s = c.pick(&SetuQuery::new(true, "原神")).await.unwrap();
        assert_eq!(
            s.caption(),
            ">>> *Source:* <https://www.pixiv.net/artworks/91234567>\n*Title:* 夏\n*Author:* someone\n*Tags:* 原神|Keqing"
        );
        assert_eq!(s.filename(), "91234567_p0_master1200.jpg");
        let body = b.seen.lock().unwrap()[0].body.clone().unwrap();
        assert_eq!(body["r18"], 2);
        assert_eq!(body["tag"], json!(["原神"]));
        assert_eq!(body["size"], json!(["original", "regular"]));
    }

    #[tokio::test]
    async fn empty_listing_is_no_setu() {
        let (_, c) = client(json!({"error": "", "data": []}));
        assert!(matches!(c.pick(&SetuQuery::new(false, "")).await, Err(Error::NoSetu)));
    }

    #[tokio::test]
    async fn image_download_looks_like_a_browser() {
        let (b, c) = client(one());
        let s = c.pick(&SetuQuery::new(false, "")).await.unwrap();
        assert_eq!(c.image(&s).await.unwrap(), b"jpeg");
        let seen = b.seen.lock().unwrap();
        let headers = &seen[1].headers;
        assert!(headers.contains(&("Referer".to_string(), REFERER.to_string())));
        assert!(headers.iter().any(|(k, v)| k == "User-Agent" && v.starts_with("Mozilla/5.0")));
        assert!(seen[0].body.as_ref().unwrap().get("tag").is_none());
    }
}
