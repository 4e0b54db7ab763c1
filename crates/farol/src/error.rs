//! Error types for the farol discovery SDK

/// Error type for discovery operations.
///
/// Three failure families matter to callers: `Transport` (the store was
/// unreachable or the URL is unusable), `Protocol` (the store answered
/// with a well-formed error body), and `Decode` (a body or stored value
/// did not parse). The remaining variants are local misuse conditions.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("malformed url: {0}")]
    MalformedUrl(String),

    #[error("store error: code={code}, message={message}, cause={cause}, index={index}")]
    Protocol {
        code: i64,
        message: String,
        cause: String,
        index: u64,
    },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("already connected")]
    AlreadyConnected,

    #[error("not connected")]
    NotConnected,

    #[error("service not registered in this session")]
    NotRegistered,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl DiscoveryError {
    /// True for store-side error bodies (key not found, already exists, ...).
    pub fn is_protocol(&self) -> bool {
        matches!(self, DiscoveryError::Protocol { .. })
    }

    /// Store error code, if this is a protocol error.
    pub fn protocol_code(&self) -> Option<i64> {
        match self {
            DiscoveryError::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DiscoveryError {
    fn from(e: serde_json::Error) -> Self {
        DiscoveryError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::NotConnected;
        assert_eq!(err.to_string(), "not connected");

        let err = DiscoveryError::UnsupportedScheme("ftp".to_string());
        assert_eq!(err.to_string(), "unsupported url scheme: ftp");

        let err = DiscoveryError::Protocol {
            code: 100,
            message: "Key not found".to_string(),
            cause: "/farol/missing".to_string(),
            index: 42,
        };
        assert_eq!(
            err.to_string(),
            "store error: code=100, message=Key not found, cause=/farol/missing, index=42"
        );
        assert!(err.is_protocol());
        assert_eq!(err.protocol_code(), Some(100));
    }

    #[test]
    fn test_decode_from_serde() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: DiscoveryError = bad.unwrap_err().into();
        assert!(matches!(err, DiscoveryError::Decode(_)));
        assert!(!err.is_protocol());
    }
}
