//! Service configuration.
//!
//! Loaded once at startup and passed by value into the components that need
//! it. Nothing reads the environment after [`Config::from_env`] returns.

use base64::Engine;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::git::GitActor;

/// Timeout applied when a timeout setting is zero or negative.
const FALLBACK_TIMEOUT_SECS: u64 = 120;

/// autocherry configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// GitHub App id.
    pub app_id: u64,
    /// Webhook HMAC secret.
    pub webhook_secret: String,
    /// PEM-encoded App private key (already base64-decoded).
    pub private_key_pem: Vec<u8>,
    /// REST API base URL.
    pub api_url: String,
    /// Host used to build clone URLs.
    pub git_host: String,
    /// Parent of per-pick scratch directories. System temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    /// Identity used for cherry-pick commits.
    pub actor: GitActor,
    /// Budget for one pull_request event.
    pub cherry_timeout: Duration,
    /// Budget for one create or label event.
    pub event_timeout: Duration,
    /// Release labels kept per team. Zero or less disables retention.
    pub label_retention: i64,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load using an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let app_id = parse_value("GITHUB_APP_ID", &required("GITHUB_APP_ID")?)?;
        let webhook_secret = required("GITHUB_WEBHOOK_SECRET")?;

        let encoded_key = required("GITHUB_APP_PRIVATE_KEY_PEM_BASE64")?;
        let private_key_pem = base64::engine::general_purpose::STANDARD
            .decode(encoded_key.as_bytes())
            .map_err(|e| ConfigError::Invalid {
                key: "GITHUB_APP_PRIVATE_KEY_PEM_BASE64",
                reason: e.to_string(),
            })?;

        let port = match get("LISTEN_PORT") {
            Some(raw) => parse_port(&raw)?,
            None => 8080,
        };

        let cherry_secs: i64 = get("CHERRY_TIMEOUT_SECONDS")
            .map(|raw| parse_value("CHERRY_TIMEOUT_SECONDS", &raw))
            .transpose()?
            .unwrap_or(600);
        let event_secs: i64 = get("EVENT_TIMEOUT_SECONDS")
            .map(|raw| parse_value("EVENT_TIMEOUT_SECONDS", &raw))
            .transpose()?
            .unwrap_or(90);
        let label_retention = get("LABEL_RETENTION")
            .map(|raw| parse_value("LABEL_RETENTION", &raw))
            .transpose()?
            .unwrap_or(5);
        let max_body_bytes = get("MAX_BODY_BYTES")
            .map(|raw| parse_value("MAX_BODY_BYTES", &raw))
            .transpose()?
            .unwrap_or(25 * 1024 * 1024);

        Ok(Self {
            port,
            app_id,
            webhook_secret,
            private_key_pem,
            api_url: get("GITHUB_API_URL")
                .unwrap_or_else(|| "https://api.github.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            git_host: get("GIT_HOST").unwrap_or_else(|| "github.com".to_string()),
            scratch_dir: get("GIT_SCRATCH_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            actor: GitActor {
                name: get("GIT_USER_NAME").unwrap_or_else(|| "stabilisation-bot".to_string()),
                email: get("GIT_USER_EMAIL")
                    .unwrap_or_else(|| "stabilisation-bot@users.noreply.github.com".to_string()),
            },
            cherry_timeout: timeout_or_fallback(cherry_secs),
            event_timeout: timeout_or_fallback(event_secs),
            label_retention,
            max_body_bytes,
        })
    }
}

/// Zero or negative means "unset".
fn timeout_or_fallback(secs: i64) -> Duration {
    match u64::try_from(secs) {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => Duration::from_secs(FALLBACK_TIMEOUT_SECS),
    }
}

/// Accepts `8080` as well as `:8080`.
fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    parse_value("LISTEN_PORT", raw.trim_start_matches(':'))
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("app_id", &self.app_id)
            .field("webhook_secret", &"[REDACTED]")
            .field("private_key_pem", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("git_host", &self.git_host)
            .field("scratch_dir", &self.scratch_dir)
            .field("actor", &self.actor)
            .field("cherry_timeout", &self.cherry_timeout)
            .field("event_timeout", &self.event_timeout)
            .field("label_retention", &self.label_retention)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}
