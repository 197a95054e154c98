//! HTTP front door: route parsing, authentication, upstream forwarding.

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::{CONTENT_LENGTH, HOST, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::auth::{AuthDecision, Authenticator, ForwardedRequest};
use crate::config::ProxyConfig;

/// Headers that must not travel across the proxy hop.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub auth: Arc<Authenticator>,
    pub client: reqwest::Client,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/:token/:port", any(preview_root))
        .route("/:token/:port/*upstream_path", any(preview_path))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn preview_root(
    State(state): State<AppState>,
    Path((token, port)): Path<(String, u16)>,
    req: Request,
) -> Response {
    handle_preview(state, token, port, String::new(), req).await
}

async fn preview_path(
    State(state): State<AppState>,
    Path((token, port, upstream_path)): Path<(String, u16, String)>,
    req: Request,
) -> Response {
    handle_preview(state, token, port, upstream_path, req).await
}

async fn handle_preview(
    state: AppState,
    token: String,
    port: u16,
    upstream_path: String,
    req: Request,
) -> Response {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let method = req.method().clone();
    let raw_query = req.uri().query().map(str::to_string);

    let mut forwarded =
        ForwardedRequest::new(host, req.headers().clone(), raw_query.as_deref());

    match state.auth.authenticate(&mut forwarded, &token, port).await {
        AuthDecision::Allow { sandbox_id, cookie } => {
            let mut response =
                forward_upstream(&state, &sandbox_id, port, &upstream_path, method, forwarded, req)
                    .await;
            if let Some(cookie) = cookie {
                match cookie.header_value().parse() {
                    Ok(value) => {
                        response.headers_mut().append(SET_COOKIE, value);
                    }
                    Err(e) => error!(error = %e, "could not render session cookie header"),
                }
            }
            response
        }
        AuthDecision::Redirect { location, reason } => {
            warn!(token = %token, reason = %reason, "authentication failed, redirecting");
            redirect_response(&location)
        }
        AuthDecision::Failed { reason } => {
            error!(token = %token, reason = %reason, "authentication aborted");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Send the (credential-stripped) request to the sandbox and relay the
/// answer.
async fn forward_upstream(
    state: &AppState,
    sandbox_id: &str,
    port: u16,
    upstream_path: &str,
    method: Method,
    forwarded: ForwardedRequest,
    req: Request,
) -> Response {
    let url = upstream_url(&state.config, sandbox_id, port, upstream_path, &forwarded);

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let mut headers = forwarded.headers;
    strip_hop_headers(&mut headers);
    headers.remove(HOST);

    let result = state
        .client
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    match result {
        Ok(upstream) => {
            let status = upstream.status();
            let mut headers = upstream.headers().clone();
            strip_hop_headers(&mut headers);
            let bytes = match upstream.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(error = %e, url = %url, "failed to read upstream response");
                    return StatusCode::BAD_GATEWAY.into_response();
                }
            };

            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
        Err(e) => {
            error!(error = %e, url = %url, "upstream request failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

fn upstream_url(
    config: &ProxyConfig,
    sandbox_id: &str,
    port: u16,
    upstream_path: &str,
    forwarded: &ForwardedRequest,
) -> String {
    let base = config
        .target_pattern
        .replace("{sandbox_id}", sandbox_id)
        .replace("{port}", &port.to_string());
    let mut url = format!("{}/{upstream_path}", base.trim_end_matches('/'));
    if let Some(query) = forwarded.query_string() {
        url.push('?');
        url.push_str(&query);
    }
    url
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
    headers.remove(CONTENT_LENGTH);
}

fn redirect_response(location: &str) -> Response {
    match location.parse() {
        Ok(value) => {
            let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();
            response.headers_mut().insert(LOCATION, value);
            response
        }
        Err(e) => {
            error!(error = %e, location = %location, "auth URL is not a valid header value");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
