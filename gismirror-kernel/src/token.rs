//! Token provider for the feature service.
//!
//! Handles:
//! - Static token (dev, or token injected by the platform)
//! - `generateToken` exchange with username/password/referer, cached until
//!   shortly before expiry

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::now_ms;

/// Marge avant expiration en dessous de laquelle le token est renouvelé
const REFRESH_MARGIN_MS: i64 = 60_000;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint returned no token: {0}")]
    Rejected(String),
    #[error("no credentials configured for token exchange")]
    MissingCredentials,
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, TokenError>;
}

/// Token fixe, fourni par configuration
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, TokenError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
pub struct TokenCredentials {
    pub token_url: String,
    pub username: String,
    pub password: String,
    pub referer: String,
    pub expiration_minutes: u32,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    /// Epoch ms
    expires: Option<i64>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: i64,
}

pub struct ArcGisTokenProvider {
    client: reqwest::Client,
    credentials: TokenCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl ArcGisTokenProvider {
    pub fn new(credentials: TokenCredentials, timeout: Duration) -> Result<Self, TokenError> {
        if credentials.username.is_empty() || credentials.password.is_empty() {
            return Err(TokenError::MissingCredentials);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, credentials, cached: Mutex::new(None) })
    }

    fn cached_token(&self) -> Option<String> {
        let cached = self.cached.lock();
        cached
            .as_ref()
            .filter(|t| t.expires_at - REFRESH_MARGIN_MS > now_ms())
            .map(|t| t.value.clone())
    }

    async fn fetch(&self) -> Result<CachedToken, TokenError> {
        let creds = &self.credentials;
        let expiration = creds.expiration_minutes.to_string();
        let form = [
            ("f", "json"),
            ("username", creds.username.as_str()),
            ("password", creds.password.as_str()),
            ("request", "gettoken"),
            ("referer", creds.referer.as_str()),
            ("expiration", expiration.as_str()),
        ];

        let response = self
            .client
            .post(&creds.token_url)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;
        let body: TokenResponse = response.json().await?;

        match body.token {
            Some(value) => {
                let expires_at = body
                    .expires
                    .unwrap_or_else(|| now_ms() + i64::from(creds.expiration_minutes) * 60_000);
                Ok(CachedToken { value, expires_at })
            }
            None => Err(TokenError::Rejected(
                body.error.map(|e| e.to_string()).unwrap_or_else(|| "empty response".into()),
            )),
        }
    }
}

#[async_trait]
impl TokenProvider for ArcGisTokenProvider {
    async fn token(&self) -> Result<String, TokenError> {
        if let Some(token) = self.cached_token() {
            debug!("reusing cached feature service token");
            return Ok(token);
        }

        let fresh = self.fetch().await?;
        info!("obtained feature service token (expires at {})", fresh.expires_at);
        let value = fresh.value.clone();
        *self.cached.lock() = Some(fresh);
        Ok(value)
    }
}
