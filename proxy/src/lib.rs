//! Authenticating front door for sandbox previews.
//!
//! Maps an untrusted path token (sandbox id or signed preview token) plus
//! whatever credential the client presented into a validated sandbox id,
//! then forwards the request or redirects to the auth flow.

pub mod api;
pub mod auth;
pub mod config;
pub mod cookie;
pub mod error;
pub mod server;

pub use auth::{AuthDecision, Authenticator};
pub use config::ProxyConfig;
pub use cookie::CookieCodec;
