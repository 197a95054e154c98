//! Sandbox API client and the validation capabilities it provides.
//!
//! The proxy handler only sees the three capability traits plus the auth
//! URL lookup, so tests can stand in instrumented fakes for each.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Checks a bearer token against a sandbox.
#[async_trait]
pub trait BearerValidator: Send + Sync {
    async fn bearer_valid(&self, sandbox_id: &str, bearer: &str) -> Result<bool, ApiError>;
}

/// Checks a per-sandbox auth key, however the client presented it.
#[async_trait]
pub trait AuthKeyValidator: Send + Sync {
    async fn auth_key_valid(&self, sandbox_id: &str, auth_key: &str) -> Result<bool, ApiError>;
}

/// Trades a signed preview URL token for the sandbox id it grants.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, token: &str, port: u16) -> Result<String, ApiError>;
}

/// Resolves the auth URL unauthenticated clients are redirected to.
#[async_trait]
pub trait AuthUrlProvider: Send + Sync {
    async fn auth_url(&self, id_or_token: &str) -> Result<String, ApiError>;
}

/// REST client for the sandbox API preview endpoints.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateBearerRequest<'a> {
    sandbox_id: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateAuthKeyRequest<'a> {
    sandbox_id: &'a str,
    auth_key: &'a str,
}

#[derive(Serialize)]
struct TokenExchangeRequest<'a> {
    token: &'a str,
    port: u16,
}

#[derive(Deserialize)]
struct ValidResponse {
    valid: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenExchangeResponse {
    sandbox_id: String,
}

#[derive(Deserialize)]
struct AuthUrlResponse {
    url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn read_json<R: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<R, ApiError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl BearerValidator for ApiClient {
    async fn bearer_valid(&self, sandbox_id: &str, bearer: &str) -> Result<bool, ApiError> {
        let response: ValidResponse = self
            .post_json(
                "/preview/validate-bearer",
                &ValidateBearerRequest {
                    sandbox_id,
                    token: bearer,
                },
            )
            .await?;
        Ok(response.valid)
    }
}

#[async_trait]
impl AuthKeyValidator for ApiClient {
    async fn auth_key_valid(&self, sandbox_id: &str, auth_key: &str) -> Result<bool, ApiError> {
        let response: ValidResponse = self
            .post_json(
                "/preview/validate-auth-key",
                &ValidateAuthKeyRequest {
                    sandbox_id,
                    auth_key,
                },
            )
            .await?;
        Ok(response.valid)
    }
}

#[async_trait]
impl TokenExchanger for ApiClient {
    async fn exchange(&self, token: &str, port: u16) -> Result<String, ApiError> {
        let response: TokenExchangeResponse = self
            .post_json(
                "/preview/token-exchange",
                &TokenExchangeRequest { token, port },
            )
            .await?;
        Ok(response.sandbox_id)
    }
}

#[async_trait]
impl AuthUrlProvider for ApiClient {
    async fn auth_url(&self, id_or_token: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .get(format!("{}/preview/auth-url", self.base_url))
            .query(&[("state", id_or_token)])
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let parsed: AuthUrlResponse = Self::read_json(response).await?;
        Ok(parsed.url)
    }
}
