//! Discovery container configuration

use uuid::Uuid;

/// Configuration for a [`DiscoveryContainer`](crate::container::DiscoveryContainer).
///
/// The defaults target a local etcd v2 keyspace endpoint. All values can
/// also be supplied through `FAROL_*` environment variables via
/// [`DiscoveryConfig::from_env`].
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Base URL of the keyspace API, e.g. `http://127.0.0.1:2379/v2/keys`
    pub base_url: String,
    /// Keyspace directory all sessions live under (leading slash path)
    pub prefix: String,
    /// Session id; one directory per session is created under `prefix`
    pub session_id: String,
    /// TTL of the session directory in seconds
    pub session_ttl: u32,
    /// Default TTL applied to registered services without one (0 = no expiry)
    pub default_service_ttl: u32,
    /// Read timeout for all requests except watch, in milliseconds
    pub read_timeout_ms: u64,
    /// Connect timeout for all requests, in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:2379/v2/keys".to_string(),
            prefix: "/farol".to_string(),
            session_id: Uuid::new_v4().to_string(),
            session_ttl: 30,
            default_service_ttl: 0,
            read_timeout_ms: 10_000,
            connect_timeout_ms: 15_000,
        }
    }
}

impl DiscoveryConfig {
    /// Create a config targeting the given keyspace base URL.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    /// Set the keyspace directory prefix.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = normalize_prefix(prefix);
        self
    }

    /// Fix the session id instead of generating a random one.
    pub fn with_session_id(mut self, session_id: &str) -> Self {
        self.session_id = session_id.to_string();
        self
    }

    /// Set the session directory TTL in seconds.
    pub fn with_session_ttl(mut self, ttl: u32) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Set the default TTL for registered services (0 = no expiry).
    pub fn with_default_service_ttl(mut self, ttl: u32) -> Self {
        self.default_service_ttl = ttl;
        self
    }

    /// Set timeouts in milliseconds.
    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.read_timeout_ms = read_ms;
        self
    }

    /// Build a config from `FAROL_*` environment variables, falling back
    /// to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("FAROL_URL") {
            config.base_url = url;
        }
        if let Ok(prefix) = std::env::var("FAROL_PREFIX") {
            config.prefix = normalize_prefix(&prefix);
        }
        if let Ok(sid) = std::env::var("FAROL_SESSION_ID") {
            config.session_id = sid;
        }
        if let Some(ttl) = env_u32("FAROL_SESSION_TTL") {
            config.session_ttl = ttl;
        }
        if let Some(ttl) = env_u32("FAROL_SERVICE_TTL") {
            config.default_service_ttl = ttl;
        }
        if let Some(ms) = env_u64("FAROL_READ_TIMEOUT_MS") {
            config.read_timeout_ms = ms;
        }
        if let Some(ms) = env_u64("FAROL_CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = ms;
        }
        config
    }

    /// Keyspace path of this session's directory, e.g. `/farol/<session-id>`.
    pub fn session_path(&self) -> String {
        format!("{}/{}", self.prefix.trim_end_matches('/'), self.session_id)
    }
}

/// Ensure a prefix has a leading slash and no trailing slash.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    format!("/{}", trimmed)
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
