//! End-to-end tests for the preview proxy.
//!
//! These run the full router against an in-process mock sandbox API and an
//! upstream echo server, and drive it with a real HTTP client.

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use preview_proxy::api::ApiClient;
use preview_proxy::auth::Authenticator;
use preview_proxy::config::{ProxyConfig, AUTH_COOKIE_PREFIX, AUTH_KEY_HEADER, AUTH_KEY_QUERY_PARAM};
use preview_proxy::cookie::CookieCodec;
use preview_proxy::server::{build_router, AppState};

const COOKIE_SECRET: &str = "integration-cookie-secret";

// =============================================================================
// Mock sandbox API
// =============================================================================

async fn validate_bearer(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({ "valid": body["token"] == "good-bearer" }))
}

async fn validate_auth_key(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({ "valid": body["authKey"] == "good-key" }))
}

async fn token_exchange(Json(body): Json<Value>) -> impl IntoResponse {
    if body["token"] == "signed-token" {
        (StatusCode::OK, Json(json!({ "sandboxId": "sbx42" }))).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "unknown token").into_response()
    }
}

async fn auth_url(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let state = params.get("state").cloned().unwrap_or_default();
    Json(json!({ "url": format!("https://auth.example.com/login?state={state}") }))
}

async fn start_mock_api() -> SocketAddr {
    let app = Router::new()
        .route("/preview/validate-bearer", post(validate_bearer))
        .route("/preview/validate-auth-key", post(validate_auth_key))
        .route("/preview/token-exchange", post(token_exchange))
        .route("/preview/auth-url", get(auth_url));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// =============================================================================
// Upstream echo server
// =============================================================================

/// What the sandbox upstream saw for the last request.
#[derive(Debug, Default, Clone)]
struct SeenRequest {
    path: String,
    query: Option<String>,
    auth_key_header: Option<String>,
}

type Seen = Arc<RwLock<Option<SeenRequest>>>;

async fn upstream_echo(State(seen): State<Seen>, req: Request) -> &'static str {
    let record = SeenRequest {
        path: req.uri().path().to_string(),
        query: req.uri().query().map(str::to_string),
        auth_key_header: req
            .headers()
            .get(AUTH_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    *seen.write().await = Some(record);
    "hello from sandbox"
}

async fn start_upstream() -> (SocketAddr, Seen) {
    let seen: Seen = Arc::default();
    let app = Router::new()
        .route("/", any(upstream_echo))
        .route("/*path", any(upstream_echo))
        .with_state(seen.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, seen)
}

// =============================================================================
// Proxy under test
// =============================================================================

struct Harness {
    proxy: SocketAddr,
    seen: Seen,
    client: reqwest::Client,
}

async fn start_proxy() -> Harness {
    let api_addr = start_mock_api().await;
    let (upstream_addr, seen) = start_upstream().await;

    let env = HashMap::from([
        ("PROXY_PORT", "0".to_string()),
        ("DAYTONA_API_URL", format!("http://{api_addr}")),
        ("DAYTONA_API_KEY", "api-secret".to_string()),
        ("COOKIE_HASH_KEY", COOKIE_SECRET.to_string()),
        ("PROXY_TARGET_PATTERN", format!("http://{upstream_addr}")),
    ]);
    let config = Arc::new(ProxyConfig::from_lookup(|name| env.get(name).cloned()).unwrap());

    let api = Arc::new(ApiClient::new(&config.daytona_api_url, &config.daytona_api_key));
    let auth = Arc::new(Authenticator {
        config: config.clone(),
        codec: CookieCodec::new(&config.cookie_hash_key),
        bearer: api.clone(),
        auth_keys: api.clone(),
        exchanger: api.clone(),
        auth_urls: api,
    });
    let state = AppState {
        config,
        auth,
        client: reqwest::Client::new(),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    Harness { proxy, seen, client }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn healthz_answers_ok() {
    let h = start_proxy().await;
    let response = h
        .client
        .get(format!("http://{}/healthz", h.proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn missing_credentials_redirect_to_the_auth_url() {
    let h = start_proxy().await;
    let response = h
        .client
        .get(format!("http://{}/sbx1/3000/app", h.proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 307);
    assert_eq!(
        response.headers()["location"],
        "https://auth.example.com/login?state=sbx1"
    );
}

#[tokio::test]
async fn token_exchange_forwards_and_sets_the_session_cookie() {
    let h = start_proxy().await;
    let response = h
        .client
        .get(format!("http://{}/signed-token/3000/index.html", h.proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let set_cookie = response.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(set_cookie.starts_with(&format!("{AUTH_COOKIE_PREFIX}sbx42=")));
    assert!(set_cookie.contains("Max-Age=3600"));
    assert!(set_cookie.contains("Path=/"));
    assert!(set_cookie.contains("HttpOnly"));
    assert_eq!(response.text().await.unwrap(), "hello from sandbox");

    // The cookie value decodes back to the resolved sandbox id.
    let value = set_cookie
        .split_once('=')
        .unwrap()
        .1
        .split(';')
        .next()
        .unwrap();
    let codec = CookieCodec::new(COOKIE_SECRET);
    assert_eq!(
        codec.decode(&format!("{AUTH_COOKIE_PREFIX}sbx42"), value).unwrap(),
        "sbx42"
    );

    // A follow-up request under the sandbox id authenticates via the
    // cookie alone and gets no fresh Set-Cookie.
    let response = h
        .client
        .get(format!("http://{}/sbx42/3000/index.html", h.proxy))
        .header(
            "cookie",
            format!("{AUTH_COOKIE_PREFIX}sbx42={value}"),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("set-cookie").is_none());
}

#[tokio::test]
async fn auth_key_header_is_not_forwarded_upstream() {
    let h = start_proxy().await;
    let response = h
        .client
        .get(format!("http://{}/sbx1/3000/private", h.proxy))
        .header(AUTH_KEY_HEADER, "good-key")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let seen = h.seen.read().await.clone().expect("upstream saw the request");
    assert_eq!(seen.path, "/private");
    assert_eq!(seen.auth_key_header, None);
}

#[tokio::test]
async fn auth_key_query_param_is_stripped_from_the_forwarded_query() {
    let h = start_proxy().await;
    let response = h
        .client
        .get(format!(
            "http://{}/sbx1/3000/list?{AUTH_KEY_QUERY_PARAM}=good-key&page=3",
            h.proxy
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let seen = h.seen.read().await.clone().expect("upstream saw the request");
    assert_eq!(seen.query.as_deref(), Some("page=3"));
}

#[tokio::test]
async fn invalid_credentials_still_redirect() {
    let h = start_proxy().await;
    let response = h
        .client
        .get(format!("http://{}/sbx1/3000/app", h.proxy))
        .bearer_auth("stale-bearer")
        .header(AUTH_KEY_HEADER, "wrong-key")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 307);
    assert!(response.headers().contains_key("location"));
}
