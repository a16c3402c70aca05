//! HTTP with a fixed attempt budget. Every failure is retried immediately
//! until the budget runs out.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: vec![],
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: vec![],
            body: Some(body),
        }
    }

    pub fn header(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.headers.push((k.into(), v.into()));
        self
    }
}

/// One network round trip. Non-2xx must be an error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: &Request) -> anyhow::Result<Vec<u8>>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("paimon/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, req: &Request) -> anyhow::Result<Vec<u8>> {
        let mut b = match req.method {
            Method::Get => self.client.get(&req.url),
            Method::Post => self.client.post(&req.url),
        };
        for (k, v) in &req.headers {
            b = b.header(k, v);
        }
        if let Some(body) = &req.body {
            b = b.json(body);
        }
        let resp = b.send().await?.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    attempts: usize,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, attempts: usize) -> Self {
        Self {
            transport,
            attempts: attempts.max(1),
        }
    }

    pub async fn fetch(&self, req: &Request) -> Result<Vec<u8>> {
        let mut last = None;
        for attempt in 1..=self.attempts {
            match self.transport.send(req).await {
                Ok(bytes) => {
                    debug!(url = %req.url, attempt, bytes = bytes.len(), "fetched");
                    return Ok(bytes);
                }
                Err(e) => {
                    debug!(url = %req.url, attempt, error = %e, "fetch attempt failed");
                    last = Some(e);
                }
            }
        }
        warn!(url = %req.url, attempts = self.attempts, "giving up");
        Err(Error::FetchFailed {
            url: req.url.clone(),
            attempts: self.attempts,
            source: last.unwrap_or_else(|| anyhow::anyhow!("no attempts made")),
        })
    }

    pub async fn json<T: DeserializeOwned>(&self, req: &Request) -> Result<T> {
        let bytes = self.fetch(req).await?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding {}", req.url))
            .map_err(|source| Error::FetchFailed {
                url: req.url.clone(),
                attempts: 1,
                source,
            })
    }
}
