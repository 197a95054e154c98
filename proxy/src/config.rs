//! Environment configuration for the preview proxy.

use std::env;
use thiserror::Error;

/// Header carrying a per-sandbox auth key. Always stripped before the
/// request is forwarded upstream.
pub const AUTH_KEY_HEADER: &str = "X-Daytona-Preview-Token";

/// Query parameter carrying a per-sandbox auth key.
pub const AUTH_KEY_QUERY_PARAM: &str = "DAYTONA_SANDBOX_AUTH_KEY";

/// Per-sandbox session cookie name prefix; the sandbox id is appended.
pub const AUTH_COOKIE_PREFIX: &str = "daytona-sandbox-auth-";

/// Startup configuration failures. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} not set")]
    Missing(&'static str),

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Proxy configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Listen port for the proxy itself.
    pub port: u16,
    /// Base URL of the sandbox API.
    pub daytona_api_url: String,
    /// Bearer token for the sandbox API.
    pub daytona_api_key: String,
    /// Secret keying the cookie codec.
    pub cookie_hash_key: String,
    /// Whether the listener serves TLS; controls the cookie Secure flag.
    pub enable_tls: bool,
    /// Upstream URL pattern with `{sandbox_id}` and `{port}` placeholders.
    pub target_pattern: String,

    /// Header name for auth-key credentials.
    pub auth_key_header: String,
    /// Query parameter name for auth-key credentials.
    pub auth_key_query_param: String,
    /// Cookie name prefix for session cookies.
    pub auth_cookie_prefix: String,
}

impl ProxyConfig {
    /// Load and validate configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary variable source. The seam unit tests use.
    pub fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = require(&lookup, "PROXY_PORT")?
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                name: "PROXY_PORT",
                reason: e.to_string(),
            })?;

        Ok(Self {
            port,
            daytona_api_url: require(&lookup, "DAYTONA_API_URL")?,
            daytona_api_key: require(&lookup, "DAYTONA_API_KEY")?,
            cookie_hash_key: require(&lookup, "COOKIE_HASH_KEY")?,
            enable_tls: lookup("ENABLE_TLS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            target_pattern: lookup("PROXY_TARGET_PATTERN")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "http://{sandbox_id}:{port}".to_string()),
            auth_key_header: AUTH_KEY_HEADER.to_string(),
            auth_key_query_param: AUTH_KEY_QUERY_PARAM.to_string(),
            auth_cookie_prefix: AUTH_COOKIE_PREFIX.to_string(),
        })
    }
}

fn require(
    lookup: &impl Fn(&'static str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    match lookup(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}
