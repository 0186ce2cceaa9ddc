use std::time::Duration;

use crate::feed::OperationKind;

/// Typed error hierarchy for push delivery.
/// Classifies errors as permanent (drop immediately) or retryable.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    // Permanent
    #[error("invalid delivery target: {0}")]
    InvalidTarget(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("provider unavailable")]
    Unavailable,
    #[error("credentials rejected, refreshing: {0}")]
    Unauthenticated(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::Unavailable
                | Self::Unauthenticated(_)
                | Self::NetworkError(_)
                | Self::Timeout(_)
        )
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidTarget(_) => "invalid_target",
            Self::InvalidMessage(_) => "invalid_message",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Unavailable => "unavailable",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::NetworkError(_) => "network_error",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify a bare HTTP status code.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 => Self::InvalidMessage(body),
            401 => Self::Unauthenticated(body),
            403 => Self::AuthenticationFailed(body),
            404 => Self::InvalidTarget(body),
            429 => Self::RateLimited { retry_after: None },
            503 => Self::Unavailable,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidMessage(format!("unexpected status {status}: {body}")),
        }
    }
}

/// Why a change event could not become a notification.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported operation kind: {0}")]
    UnsupportedOperation(OperationKind),
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

impl DecodeError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnsupportedOperation(_) => "unsupported operation kind",
            Self::MissingField(_) => "missing field",
        }
    }
}

/// Change-feed failures. All of them are recoverable by reopening.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("feed transport error: {0}")]
    Transport(String),
    #[error("cursor store error: {0}")]
    Cursor(String),
}
