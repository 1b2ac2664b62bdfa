//! GitHub App installation authentication.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::client::{build_http_client, check};
use super::{Installation, InstallationProvider, RestClient};
use crate::error::GitHubError;

/// JWT lifetime. GitHub rejects anything above ten minutes.
const JWT_TTL_SECS: i64 = 9 * 60;

/// Backdate `iat` to absorb clock drift.
const JWT_BACKDATE_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct Claims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Deserialize)]
struct AccessToken {
    token: String,
}

/// Exchanges an App JWT for installation tokens.
#[derive(Clone)]
pub struct GitHubApp {
    http_client: reqwest::Client,
    api_url: String,
    app_id: u64,
    key: EncodingKey,
}

impl fmt::Debug for GitHubApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubApp")
            .field("api_url", &self.api_url)
            .field("app_id", &self.app_id)
            .field("key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl GitHubApp {
    /// Build from the App id and its PEM-encoded RSA private key.
    pub fn new(api_url: &str, app_id: u64, private_key_pem: &[u8]) -> Result<Self, GitHubError> {
        let key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| GitHubError::Auth(format!("invalid App private key: {e}")))?;

        Ok(Self {
            http_client: build_http_client()?,
            api_url: api_url.trim_end_matches('/').to_string(),
            app_id,
            key,
        })
    }

    /// Sign a short-lived App JWT.
    pub fn jwt(&self) -> Result<String, GitHubError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iat: now - JWT_BACKDATE_SECS,
            exp: now + JWT_TTL_SECS,
            iss: self.app_id.to_string(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| GitHubError::Auth(format!("failed to sign App JWT: {e}")))
    }

    /// Mint an installation access token.
    #[instrument(skip(self))]
    pub async fn installation_token(&self, installation_id: u64) -> Result<String, GitHubError> {
        let url = format!(
            "{}/app/installations/{installation_id}/access_tokens",
            self.api_url
        );

        let response = self
            .http_client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.jwt()?))
            .send()
            .await?;
        let response = check(response).await.map_err(|e| match e {
            GitHubError::Api { status, message } => {
                GitHubError::Auth(format!("token exchange failed ({status}): {message}"))
            }
            other => other,
        })?;

        let body: AccessToken = response.json().await?;
        debug!("Obtained installation token");
        Ok(body.token)
    }
}

#[async_trait]
impl InstallationProvider for GitHubApp {
    async fn connect(&self, installation_id: u64) -> Result<Installation, GitHubError> {
        let token = self.installation_token(installation_id).await?;
        let client = RestClient::new(&self.api_url, token.clone())?;
        Ok(Installation {
            api: Arc::new(client),
            token,
        })
    }
}
