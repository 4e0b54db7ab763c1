//! etcd v2-style keyspace client
//!
//! Thin HTTP layer over the store's keyspace API: GET (optionally
//! recursive), PUT with a form-encoded body, DELETE, and the long-poll
//! watch GET. Every call classifies the response body as either a
//! [`KvSuccess`] or a store-side [`KvError`] and never both.

pub mod node;

use std::time::Duration;

use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::{DiscoveryError, Result};

pub use node::{Action, KvError, KvSuccess, Node};

const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// Options for a keyspace PUT.
///
/// Mirrors the store's form fields: `value`, `ttl`, `dir`, `prevExist`.
/// A TTL of zero means "no expiry" and is omitted from the body.
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub value: Option<String>,
    pub ttl: Option<u32>,
    pub prev_exist: Option<bool>,
    pub dir: bool,
}

impl PutOptions {
    /// PUT a leaf value.
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// PUT a directory (no value).
    pub fn directory() -> Self {
        Self {
            dir: true,
            ..Default::default()
        }
    }

    /// Set the entry TTL in seconds; zero leaves the entry unexpiring.
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = if ttl > 0 { Some(ttl) } else { None };
        self
    }

    /// Require the key to (not) already exist.
    pub fn with_prev_exist(mut self, prev_exist: bool) -> Self {
        self.prev_exist = Some(prev_exist);
        self
    }

    /// Form fields in wire order.
    pub(crate) fn to_form(&self) -> Vec<(&'static str, String)> {
        let mut form = Vec::new();
        if let Some(value) = &self.value {
            form.push(("value", value.clone()));
        }
        if let Some(ttl) = self.ttl {
            form.push(("ttl", ttl.to_string()));
        }
        if self.dir {
            form.push(("dir", "true".to_string()));
        }
        if let Some(prev_exist) = self.prev_exist {
            form.push(("prevExist", prev_exist.to_string()));
        }
        form
    }
}

/// HTTP client for one keyspace endpoint.
#[derive(Debug)]
pub struct KvClient {
    /// Client for bounded calls (connect + read timeout)
    http: Client,
    /// Client for watch calls — connect timeout only, the read blocks
    /// until the store reports a change
    watch_http: Client,
    base_url: String,
}

impl KvClient {
    /// Create a client for the given base URL, e.g.
    /// `http://127.0.0.1:2379/v2/keys`. Only `http` and `https` schemes
    /// are accepted.
    pub fn new(base_url: &str, connect_timeout_ms: u64, read_timeout_ms: u64) -> Result<Self> {
        let parsed =
            Url::parse(base_url).map_err(|e| DiscoveryError::MalformedUrl(e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => return Err(DiscoveryError::UnsupportedScheme(scheme.to_string())),
        }

        let connect_timeout = Duration::from_millis(connect_timeout_ms);
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(Duration::from_millis(read_timeout_ms))
            .build()?;
        let watch_http = Client::builder().connect_timeout(connect_timeout).build()?;

        Ok(Self {
            http,
            watch_http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET a key or directory; `recursive` returns the full subtree.
    pub async fn get(&self, path: &str, recursive: bool) -> Result<KvSuccess> {
        let url = self.url(path);
        debug!(%url, recursive, "kv get");
        let mut req = self.http.get(&url);
        if recursive {
            req = req.query(&[("recursive", "true")]);
        }
        let body = req.send().await?.text().await?;
        parse_body(&body)
    }

    /// PUT a leaf value or create/refresh a directory.
    pub async fn put(&self, path: &str, opts: PutOptions) -> Result<KvSuccess> {
        let url = self.url(path);
        debug!(%url, ?opts.ttl, dir = opts.dir, "kv put");
        let form = serde_urlencoded::to_string(opts.to_form())
            .map_err(|e| DiscoveryError::Decode(e.to_string()))?;
        let body = self
            .http
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_FORM)
            .body(form)
            .send()
            .await?
            .text()
            .await?;
        parse_body(&body)
    }

    /// DELETE a key; `recursive` removes a directory and its subtree.
    pub async fn delete(&self, path: &str, recursive: bool) -> Result<KvSuccess> {
        let url = self.url(path);
        debug!(%url, recursive, "kv delete");
        let mut req = self.http.delete(&url);
        if recursive {
            req = req.query(&[("recursive", "true")]);
        }
        let body = req.send().await?.text().await?;
        parse_body(&body)
    }

    /// Long-poll for the next change under `path` at or after
    /// `wait_index`. Blocks until the store reports a change; cancel by
    /// dropping the future.
    pub async fn watch(&self, path: &str, wait_index: Option<u64>) -> Result<KvSuccess> {
        let url = self.url(path);
        debug!(%url, ?wait_index, "kv watch");
        let mut req = self
            .watch_http
            .get(&url)
            .query(&[("wait", "true"), ("recursive", "true")]);
        if let Some(index) = wait_index {
            req = req.query(&[("waitIndex", index.to_string())]);
        }
        let body = req.send().await?.text().await?;
        parse_body(&body)
    }
}

/// Classify a response body as success or store error.
fn parse_body(body: &str) -> Result<KvSuccess> {
    if let Ok(success) = serde_json::from_str::<KvSuccess>(body) {
        return Ok(success);
    }
    match serde_json::from_str::<KvError>(body) {
        Ok(err) => Err(DiscoveryError::Protocol {
            code: err.error_code,
            message: err.message,
            cause: err.cause,
            index: err.index,
        }),
        Err(_) => Err(DiscoveryError::Decode(format!(
            "response is neither a success nor an error body: {}",
            truncate(body, 200)
        ))),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
