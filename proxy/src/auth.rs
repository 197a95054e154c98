//! Ordered credential resolution for preview requests.
//!
//! Each credential source is tried independently; a failure is recorded
//! and the next source gets its chance. Nothing here panics or bubbles an
//! error to the HTTP layer: the outcome is always a decision value.

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::api::{AuthKeyValidator, AuthUrlProvider, BearerValidator, TokenExchanger};
use crate::config::ProxyConfig;
use crate::cookie::CookieCodec;

/// Session cookie TTL.
const COOKIE_MAX_AGE_SECS: u32 = 3600;

const MISSING_AUTH_MESSAGE: &str = "missing authentication: provide a preview access token \
     (via header, query parameter, or cookie) or use an API key or JWT";

/// The request view the resolver inspects and may rewrite before the
/// request is forwarded upstream.
#[derive(Debug)]
pub struct ForwardedRequest {
    /// Host header value of the incoming request.
    pub host: String,
    /// Headers to forward; credential headers are stripped in place.
    pub headers: HeaderMap,
    /// Raw query segments, kept unencoded so forwarding preserves them.
    query: Vec<String>,
}

impl ForwardedRequest {
    pub fn new(host: String, headers: HeaderMap, raw_query: Option<&str>) -> Self {
        let query = raw_query
            .unwrap_or_default()
            .split('&')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            host,
            headers,
            query,
        }
    }

    /// Decoded value of the first query parameter named `name`.
    pub fn query_value(&self, name: &str) -> Option<String> {
        self.query.iter().find_map(|segment| {
            let (key, value) = segment.split_once('=').unwrap_or((segment.as_str(), ""));
            (key == name).then(|| {
                urlencoding::decode(value)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| value.to_string())
            })
        })
    }

    pub fn remove_query_param(&mut self, name: &str) {
        self.query.retain(|segment| {
            segment
                .split_once('=')
                .map_or(segment.as_str(), |(key, _)| key)
                != name
        });
    }

    /// The (possibly rewritten) query string, without the leading `?`.
    pub fn query_string(&self) -> Option<String> {
        if self.query.is_empty() {
            None
        } else {
            Some(self.query.join("&"))
        }
    }

    /// Value of the request cookie named `name`, if any.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers.get_all(COOKIE).iter().find_map(|header| {
            header.to_str().ok()?.split(';').find_map(|pair| {
                let (key, value) = pair.trim().split_once('=')?;
                (key == name).then(|| value.to_string())
            })
        })
    }
}

/// A cookie the HTTP layer must set on the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub secure: bool,
}

impl IssuedCookie {
    /// Render the `Set-Cookie` header value.
    pub fn header_value(&self) -> String {
        let mut header = format!(
            "{}={}; Path=/; Max-Age={COOKIE_MAX_AGE_SECS}; HttpOnly",
            self.name, self.value
        );
        if !self.domain.is_empty() {
            header.push_str("; Domain=");
            header.push_str(&self.domain);
        }
        if self.secure {
            header.push_str("; Secure");
        }
        header
    }
}

/// What the HTTP layer should do with the request.
#[derive(Debug)]
pub enum AuthDecision {
    /// Forward upstream as this sandbox, optionally setting a cookie.
    Allow {
        sandbox_id: String,
        cookie: Option<IssuedCookie>,
    },
    /// Redirect the client to the auth URL.
    Redirect { location: String, reason: String },
    /// The auth URL itself could not be resolved; nothing sane to answer.
    Failed { reason: String },
}

/// Runs the ordered credential attempts for one request.
pub struct Authenticator {
    pub config: Arc<ProxyConfig>,
    pub codec: CookieCodec,
    pub bearer: Arc<dyn BearerValidator>,
    pub auth_keys: Arc<dyn AuthKeyValidator>,
    pub exchanger: Arc<dyn TokenExchanger>,
    pub auth_urls: Arc<dyn AuthUrlProvider>,
}

/// Per-request record of failed attempts, for the aggregated redirect log.
#[derive(Default)]
struct Attempts {
    reasons: Vec<String>,
}

impl Attempts {
    fn invalid(&mut self, method: &str, token: &str, elapsed: Duration, reason: String) {
        warn!(
            method,
            token = %token,
            duration_ms = elapsed.as_millis() as u64,
            "credential rejected"
        );
        self.reasons.push(reason);
    }

    fn errored(&mut self, method: &str, token: &str, elapsed: Duration, reason: String) {
        error!(
            method,
            token = %token,
            duration_ms = elapsed.as_millis() as u64,
            error = %reason,
            "credential validation failed"
        );
        self.reasons.push(reason);
    }
}

fn log_success(method: &str, sandbox_id: &str, elapsed: Duration) {
    info!(
        method,
        sandbox_id = %sandbox_id,
        duration_ms = elapsed.as_millis() as u64,
        "credential accepted"
    );
}

impl Authenticator {
    /// Resolve the sandbox id for a request whose path carried
    /// `path_token` (a sandbox id or a signed preview token).
    ///
    /// Strips credentials out of `req` as a side effect: the auth-key
    /// header always, the auth-key query parameter when it authenticated.
    pub async fn authenticate(
        &self,
        req: &mut ForwardedRequest,
        path_token: &str,
        port: u16,
    ) -> AuthDecision {
        let mut attempts = Attempts::default();

        // 1. Bearer token.
        if let Some(bearer) = bearer_token(&req.headers) {
            let started = Instant::now();
            match self.bearer.bearer_valid(path_token, &bearer).await {
                Ok(true) => {
                    log_success("bearer token", path_token, started.elapsed());
                    return AuthDecision::Allow {
                        sandbox_id: path_token.to_string(),
                        cookie: None,
                    };
                }
                Ok(false) => attempts.invalid(
                    "bearer token",
                    path_token,
                    started.elapsed(),
                    "Bearer token is invalid".to_string(),
                ),
                Err(e) => attempts.errored(
                    "bearer token",
                    path_token,
                    started.elapsed(),
                    format!("Bearer token validation error: {e}"),
                ),
            }
        }

        // 2. Auth key header. Stripped before forwarding no matter what.
        let header_key = req
            .headers
            .get(self.config.auth_key_header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .filter(|value| !value.is_empty());
        if let Some(auth_key) = header_key {
            req.headers.remove(self.config.auth_key_header.as_str());
            let started = Instant::now();
            match self.auth_keys.auth_key_valid(path_token, &auth_key).await {
                Ok(true) => {
                    log_success("auth key header", path_token, started.elapsed());
                    return AuthDecision::Allow {
                        sandbox_id: path_token.to_string(),
                        cookie: None,
                    };
                }
                Ok(false) => attempts.invalid(
                    "auth key header",
                    path_token,
                    started.elapsed(),
                    "Auth key header is invalid".to_string(),
                ),
                Err(e) => attempts.errored(
                    "auth key header",
                    path_token,
                    started.elapsed(),
                    format!("Auth key header validation error: {e}"),
                ),
            }
        }

        // 3. Auth key query parameter. Removed from the forwarded query
        // only once it authenticated.
        if let Some(auth_key) = req.query_value(&self.config.auth_key_query_param) {
            let started = Instant::now();
            match self.auth_keys.auth_key_valid(path_token, &auth_key).await {
                Ok(true) => {
                    log_success("auth key query param", path_token, started.elapsed());
                    req.remove_query_param(&self.config.auth_key_query_param);
                    return AuthDecision::Allow {
                        sandbox_id: path_token.to_string(),
                        cookie: None,
                    };
                }
                Ok(false) => attempts.invalid(
                    "auth key query param",
                    path_token,
                    started.elapsed(),
                    "Auth key query parameter is invalid".to_string(),
                ),
                Err(e) => attempts.errored(
                    "auth key query param",
                    path_token,
                    started.elapsed(),
                    format!("Auth key query param validation error: {e}"),
                ),
            }
        }

        // 4. Session cookie bound to this sandbox id.
        let cookie_name = format!("{}{path_token}", self.config.auth_cookie_prefix);
        if let Some(value) = req.cookie(&cookie_name).filter(|v| !v.is_empty()) {
            let started = Instant::now();
            match self.codec.decode(&cookie_name, &value) {
                Ok(decoded) if decoded == path_token => {
                    log_success("cookie", path_token, started.elapsed());
                    return AuthDecision::Allow {
                        sandbox_id: path_token.to_string(),
                        cookie: None,
                    };
                }
                Ok(_) => attempts.invalid(
                    "cookie",
                    path_token,
                    started.elapsed(),
                    "decoded cookie value does not match the sandbox id".to_string(),
                ),
                Err(e) => attempts.errored(
                    "cookie",
                    path_token,
                    started.elapsed(),
                    format!("Cookie decoding error: {e}"),
                ),
            }
        }

        // 5. Signed preview URL token exchange.
        let started = Instant::now();
        match self.exchanger.exchange(path_token, port).await {
            Ok(sandbox_id) => {
                log_success("signed preview token", &sandbox_id, started.elapsed());
                let name = format!("{}{sandbox_id}", self.config.auth_cookie_prefix);
                let value = self.codec.encode(&name, &sandbox_id);
                return AuthDecision::Allow {
                    sandbox_id,
                    cookie: Some(IssuedCookie {
                        name,
                        value,
                        domain: derive_cookie_domain(&req.host),
                        secure: self.config.enable_tls,
                    }),
                };
            }
            Err(e) => attempts.errored(
                "signed preview token",
                path_token,
                started.elapsed(),
                format!("failed to get sandbox ID: {e}. Is the token expired?"),
            ),
        }

        // Everything failed; send the client to the auth flow.
        let location = match self.auth_urls.auth_url(path_token).await {
            Ok(url) => url,
            Err(e) => {
                return AuthDecision::Failed {
                    reason: format!("failed to get auth URL: {e}"),
                }
            }
        };

        let reason = if attempts.reasons.is_empty() {
            MISSING_AUTH_MESSAGE.to_string()
        } else {
            format!("authentication failed:\n{}", attempts.reasons.join("\n;\n"))
        };

        AuthDecision::Redirect { location, reason }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let token = headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?
        .trim()
        .to_string();
    (!token.is_empty()).then_some(token)
}

/// Cookie domain for a request host: strip any port, drop the leading
/// label so the cookie covers sibling preview hosts. Hosts without a
/// parent domain are used as-is.
pub fn derive_cookie_domain(host: &str) -> String {
    let host = host.split(':').next().unwrap_or(host);
    match host.split_once('.') {
        Some((_, parent)) if parent.contains('.') => format!(".{parent}"),
        _ => host.to_string(),
    }
}
