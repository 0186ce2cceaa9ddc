//! FCM credentials and OAuth access tokens.
//!
//! Two credential sources are supported: a pre-minted bearer token, used as-is
//! for the life of the process, and a Google service-account key. For the
//! latter an RS256 JWT is exchanged at the key's `token_uri` for a short-lived
//! access token, which is cached until shortly before it expires.

use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// OAuth scope required by the FCM HTTP v1 API.
pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Cached tokens are replaced this long before their stated expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to read service account key at {path}: {reason}")]
    KeyRead { path: String, reason: String },
    #[error("failed to parse service account key: {reason}")]
    KeyParse { reason: String },
    #[error("failed to sign JWT: {reason}")]
    JwtSign { reason: String },
    #[error("token exchange failed ({status}): {message}")]
    TokenExchange { status: u16, message: String },
    #[error("token exchange request failed: {0}")]
    Network(String),
    #[error("failed to build HTTP client: {reason}")]
    ClientBuild { reason: String },
}

/// Parsed Google service-account key file.
#[derive(Clone)]
pub struct ServiceAccountKey {
    pub project_id: Option<String>,
    pub client_email: String,
    pub token_uri: String,
    encoding_key: EncodingKey,
}

#[derive(Deserialize)]
struct RawServiceAccountKey {
    project_id: Option<String>,
    client_email: String,
    private_key: String,
    token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let raw = std::fs::read_to_string(path).map_err(|e| AuthError::KeyRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AuthError> {
        let parsed: RawServiceAccountKey =
            serde_json::from_str(raw).map_err(|e| AuthError::KeyParse {
                reason: e.to_string(),
            })?;

        let encoding_key = EncodingKey::from_rsa_pem(parsed.private_key.as_bytes())
            .map_err(|e| AuthError::KeyParse {
                reason: e.to_string(),
            })?;

        Ok(Self {
            project_id: parsed.project_id.filter(|p| !p.is_empty()),
            client_email: parsed.client_email,
            token_uri: parsed
                .token_uri
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            encoding_key,
        })
    }

    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: FCM_SCOPE,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::JwtSign {
                reason: e.to_string(),
            })
    }
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

/// Where FCM bearer tokens come from.
pub enum FcmCredentials {
    AccessToken(SecretString),
    ServiceAccount(ServiceAccountKey),
}

impl FcmCredentials {
    pub fn access_token(token: impl Into<String>) -> Self {
        Self::AccessToken(SecretString::from(token.into()))
    }

    /// Project id embedded in a service-account key, if any.
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::AccessToken(_) => None,
            Self::ServiceAccount(key) => key.project_id.as_deref(),
        }
    }
}

impl std::fmt::Debug for FcmCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccessToken(_) => f.write_str("AccessToken([REDACTED])"),
            Self::ServiceAccount(key) => f.debug_tuple("ServiceAccount").field(key).finish(),
        }
    }
}

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Hands out bearer tokens, minting and caching them for service accounts.
pub struct TokenSource {
    credentials: FcmCredentials,
    client: reqwest::Client,
    cache: RwLock<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(credentials: FcmCredentials, client: reqwest::Client) -> Self {
        Self {
            credentials,
            client,
            cache: RwLock::new(None),
        }
    }

    pub fn credentials(&self) -> &FcmCredentials {
        &self.credentials
    }

    /// Current bearer token, exchanging a fresh one when the cache is stale.
    pub async fn bearer(&self) -> Result<String, AuthError> {
        let key = match &self.credentials {
            FcmCredentials::AccessToken(token) => return Ok(token.expose_secret().to_owned()),
            FcmCredentials::ServiceAccount(key) => key,
        };

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh(Utc::now())) {
                return Ok(cached.token.expose_secret().to_owned());
            }
        }

        let mut cache = self.cache.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh(Utc::now())) {
            return Ok(cached.token.expose_secret().to_owned());
        }

        let fresh = self.exchange(key).await?;
        let token = fresh.token.expose_secret().to_owned();
        *cache = Some(fresh);
        Ok(token)
    }

    /// Drop the cached token so the next call exchanges a new one.
    pub async fn invalidate(&self) {
        if matches!(self.credentials, FcmCredentials::ServiceAccount(_)) {
            debug!("invalidating cached FCM access token");
            *self.cache.write().await = None;
        }
    }

    #[tracing::instrument(skip_all, fields(token_uri = %key.token_uri))]
    async fn exchange(&self, key: &ServiceAccountKey) -> Result<CachedToken, AuthError> {
        let now = Utc::now();
        let assertion = key.sign_assertion(now)?;

        let resp = self
            .client
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchange { status, message });
        }

        let body: TokenResponse = resp.json().await.map_err(|e| AuthError::TokenExchange {
            status,
            message: format!("unreadable token response: {e}"),
        })?;

        info!(expires_in = body.expires_in, "FCM access token refreshed");

        Ok(CachedToken {
            token: SecretString::from(body.access_token),
            expires_at: now + ChronoDuration::seconds(body.expires_in.clamp(0, 86_400)),
        })
    }
}
