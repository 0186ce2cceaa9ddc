use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;
use tracing::{debug, warn};

use feedcast_core::{DeliveryError, DeliveryTarget, MessageId, NotificationPayload, PushProvider};

use crate::auth::{AuthError, FcmCredentials, TokenSource};

pub const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com";

#[derive(Clone, Debug)]
pub struct FcmConfig {
    pub project_id: String,
    /// Scheme and host only; the API path is appended.
    pub endpoint: String,
    pub request_timeout: Duration,
}

impl FcmConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.endpoint.trim_end_matches('/'),
            self.project_id
        )
    }
}

/// Firebase Cloud Messaging HTTP v1 provider. One `send` is one HTTP request.
pub struct FcmProvider {
    config: FcmConfig,
    client: reqwest::Client,
    tokens: TokenSource,
}

impl std::fmt::Debug for FcmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FcmProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FcmProvider {
    pub fn new(config: FcmConfig, credentials: FcmCredentials) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::ClientBuild {
                reason: e.to_string(),
            })?;

        debug!(
            project_id = %config.project_id,
            endpoint = %config.endpoint,
            credentials = ?credentials,
            "FCM provider initialized"
        );

        Ok(Self {
            tokens: TokenSource::new(credentials, client.clone()),
            config,
            client,
        })
    }

    fn build_body(payload: &NotificationPayload, target: &DeliveryTarget) -> Value {
        serde_json::json!({
            "message": {
                "token": target.as_str(),
                "notification": {
                    "title": payload.title,
                    "body": payload.content,
                },
            },
        })
    }
}

#[async_trait]
impl PushProvider for FcmProvider {
    fn name(&self) -> &str {
        "fcm"
    }

    async fn send(
        &self,
        payload: &NotificationPayload,
        target: &DeliveryTarget,
    ) -> Result<MessageId, DeliveryError> {
        let bearer = self.tokens.bearer().await.map_err(auth_failure)?;

        let result = self
            .client
            .post(self.config.send_url())
            .bearer_auth(bearer)
            .json(&Self::build_body(payload, target))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(DeliveryError::Timeout(self.config.request_timeout)),
            Err(e) => return Err(DeliveryError::NetworkError(e.to_string())),
        };

        let status = response.status().as_u16();
        if response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let name = message_name(&body).unwrap_or_else(|| {
                warn!(status, body = %body, "FCM accepted the message without a name");
                String::new()
            });
            return Ok(MessageId::new(name));
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();

        let error = classify_failure(status, retry_after, &body);
        warn!(
            status,
            error_kind = error.error_kind(),
            device = ?target,
            "FCM send failed"
        );

        if matches!(error, DeliveryError::Unauthenticated(_)) {
            self.tokens.invalidate().await;
        }

        Err(error)
    }
}

/// Token acquisition problems seen at send time.
fn auth_failure(e: AuthError) -> DeliveryError {
    match e {
        AuthError::Network(msg) => DeliveryError::NetworkError(msg),
        AuthError::TokenExchange { status, message } if status >= 500 => {
            DeliveryError::ServerError { status, body: message }
        }
        other => DeliveryError::AuthenticationFailed(other.to_string()),
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Map an FCM error response to a delivery error.
///
/// The FCM `errorCode` detail is more specific than the status and wins when
/// present.
/// `name` field of a successful send response.
fn message_name(body: &str) -> Option<String> {
    let body: Value = serde_json::from_str(body).ok()?;
    body.get("name").and_then(Value::as_str).map(str::to_string)
}

pub fn classify_failure(status: u16, retry_after: Option<Duration>, body: &str) -> DeliveryError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map_or_else(|| body.to_string(), str::to_string);

    let error_code = error
        .and_then(|e| e.get("details"))
        .and_then(Value::as_array)
        .and_then(|details| {
            details
                .iter()
                .find_map(|d| d.get("errorCode").and_then(Value::as_str))
        });

    match error_code {
        Some("UNREGISTERED" | "SENDER_ID_MISMATCH") => DeliveryError::InvalidTarget(message),
        Some("INVALID_ARGUMENT") => DeliveryError::InvalidMessage(message),
        Some("THIRD_PARTY_AUTH_ERROR") => DeliveryError::AuthenticationFailed(message),
        Some("QUOTA_EXCEEDED") => DeliveryError::RateLimited { retry_after },
        Some("UNAVAILABLE") => DeliveryError::Unavailable,
        Some("INTERNAL") => DeliveryError::ServerError { status, body: message },
        _ => match status {
            429 => DeliveryError::RateLimited { retry_after },
            _ => DeliveryError::from_status(status, message),
        },
    }
}
