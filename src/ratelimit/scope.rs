//! Rate-limit scope keys and their storage layout.

use std::fmt;

/// The identity a bucket is tracked against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// Budget shared by every request carrying the same API key
    ApiKey(String),
    /// Budget shared by every request from the same client address
    Ip(String),
}

impl ScopeKey {
    /// Scope for an API key identity.
    pub fn api_key(key: impl Into<String>) -> Self {
        ScopeKey::ApiKey(key.into())
    }

    /// Scope for a client address.
    pub fn ip(addr: impl Into<String>) -> Self {
        ScopeKey::Ip(addr.into())
    }

    /// Store key holding the token count.
    /// Format: "bucket:{scope}:tokens"
    pub fn tokens_key(&self) -> String {
        format!("bucket:{}:tokens", self)
    }

    /// Store key holding the last refill timestamp.
    /// Format: "bucket:{scope}:last"
    pub fn last_key(&self) -> String {
        format!("bucket:{}:last", self)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::ApiKey(key) => write!(f, "key:{}", key),
            ScopeKey::Ip(addr) => write!(f, "ip:{}", addr),
        }
    }
}
