use std::sync::Arc;

use tracing::{info, warn};

use feedcast_core::{
    BackoffPolicy, DeliveryError, DeliveryTarget, MessageId, NotificationPayload, PushProvider,
};

/// Final outcome of delivering one notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered {
        message_id: MessageId,
        attempts: u32,
    },
    /// Every attempt failed with a retryable error.
    RetryableFailure {
        error: DeliveryError,
        attempts: u32,
    },
    /// The provider rejected the message; no further attempts were made.
    PermanentFailure {
        error: DeliveryError,
        attempts: u32,
    },
}

impl DeliveryResult {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts, .. }
            | Self::RetryableFailure { attempts, .. }
            | Self::PermanentFailure { attempts, .. } => *attempts,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// Metric label for this outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::RetryableFailure { .. } => "retry_exhausted",
            Self::PermanentFailure { .. } => "rejected",
        }
    }
}

/// Sends one notification through a provider with capped exponential retry.
///
/// - Permanent errors stop immediately
/// - Retryable errors back off `base * 2^n`, capped at `max_delay`
/// - A provider `Retry-After` hint can lengthen a delay, never shorten it
/// - At most `max_attempts` provider calls per notification
///
/// The call is cancel-safe: dropping the future abandons the in-flight
/// attempt or backoff sleep.
pub struct NotificationDispatcher {
    provider: Arc<dyn PushProvider>,
    policy: BackoffPolicy,
}

impl NotificationDispatcher {
    pub fn new(provider: Arc<dyn PushProvider>, policy: BackoffPolicy) -> Self {
        Self {
            provider,
            policy,
        }
    }

    pub async fn dispatch(
        &self,
        payload: &NotificationPayload,
        target: &DeliveryTarget,
    ) -> DeliveryResult {
        let max_attempts = self.policy.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.provider.send(payload, target).await {
                Ok(message_id) => {
                    info!(
                        provider = self.provider.name(),
                        message_id = %message_id,
                        attempt,
                        "notification delivered"
                    );
                    return DeliveryResult::Delivered {
                        message_id,
                        attempts: attempt,
                    };
                }
                Err(e) => e,
            };

            if error.is_permanent() {
                warn!(
                    attempt,
                    error_kind = error.error_kind(),
                    error = %error,
                    "notification rejected"
                );
                return DeliveryResult::PermanentFailure {
                    error,
                    attempts: attempt,
                };
            }

            if attempt >= max_attempts {
                warn!(
                    attempt,
                    error_kind = error.error_kind(),
                    error = %error,
                    "delivery retries exhausted"
                );
                return DeliveryResult::RetryableFailure {
                    error,
                    attempts: attempt,
                };
            }

            let delay = self.policy.retry_delay(attempt - 1, error.suggested_delay());

            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error_kind = error.error_kind(),
                error = %error,
                "retrying delivery after error"
            );

            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPushProvider, MockResponse};
    use std::time::Duration;

    fn policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts,
        }
    }

    fn dispatcher(provider: &Arc<MockPushProvider>, max_attempts: u32) -> NotificationDispatcher {
        NotificationDispatcher::new(provider.clone(), policy(max_attempts))
    }

    fn send_args() -> (NotificationPayload, DeliveryTarget) {
        (NotificationPayload::new("A", "1"), DeliveryTarget::new("device"))
    }

    /// Gaps between consecutive provider calls.
    fn gaps(provider: &MockPushProvider) -> Vec<Duration> {
        provider
            .calls()
            .windows(2)
            .map(|w| w[1].at.duration_since(w[0].at))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success() {
        let provider = Arc::new(MockPushProvider::accepting());
        let (payload, target) = send_args();
        let result = dispatcher(&provider, 5).dispatch(&payload, &target).await;

        assert!(result.is_delivered());
        assert_eq!(result.attempts(), 1);
        assert_eq!(result.outcome(), "delivered");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_exponential_delays() {
        let provider = Arc::new(MockPushProvider::new(vec![
            MockResponse::Error(DeliveryError::Unavailable),
            MockResponse::Error(DeliveryError::NetworkError("reset".into())),
            MockResponse::Error(DeliveryError::ServerError {
                status: 500,
                body: String::new(),
            }),
        ]));
        let (payload, target) = send_args();
        let result = dispatcher(&provider, 5).dispatch(&payload, &target).await;

        assert!(result.is_delivered());
        assert_eq!(result.attempts(), 4);
        assert_eq!(
            gaps(&provider),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delays_are_capped() {
        let provider = Arc::new(MockPushProvider::new(
            (0..5).map(|_| MockResponse::Error(DeliveryError::Unavailable)).collect(),
        ));
        let (payload, target) = send_args();
        let result = dispatcher(&provider, 6).dispatch(&payload, &target).await;

        assert!(result.is_delivered());
        let gaps = gaps(&provider);
        assert_eq!(gaps[3], Duration::from_millis(800));
        assert_eq!(gaps[4], Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn longer_retry_after_hint_is_honored() {
        let provider = Arc::new(MockPushProvider::new(vec![MockResponse::Error(
            DeliveryError::RateLimited {
                retry_after: Some(Duration::from_millis(700)),
            },
        )]));
        let (payload, target) = send_args();
        let result = dispatcher(&provider, 3).dispatch(&payload, &target).await;

        assert_eq!(result.attempts(), 2);
        assert_eq!(gaps(&provider), vec![Duration::from_millis(700)]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_rate_limits_keep_growing() {
        let provider = Arc::new(MockPushProvider::new(
            (0..4)
                .map(|_| {
                    MockResponse::Error(DeliveryError::RateLimited {
                        retry_after: Some(Duration::from_millis(150)),
                    })
                })
                .collect(),
        ));
        let (payload, target) = send_args();
        let result = dispatcher(&provider, 4).dispatch(&payload, &target).await;

        assert!(matches!(result, DeliveryResult::RetryableFailure { attempts: 4, .. }));
        let gaps = gaps(&provider);
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(150),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
        assert!(gaps.windows(2).all(|w| w[1] > w[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_hint_is_capped() {
        let provider = Arc::new(MockPushProvider::new(vec![MockResponse::Error(
            DeliveryError::RateLimited {
                retry_after: Some(Duration::from_secs(3600)),
            },
        )]));
        let (payload, target) = send_args();
        dispatcher(&provider, 3).dispatch(&payload, &target).await;

        assert_eq!(gaps(&provider), vec![Duration::from_secs(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_stops_immediately() {
        let provider = Arc::new(MockPushProvider::new(vec![MockResponse::Error(
            DeliveryError::InvalidTarget("unregistered".into()),
        )]));
        let (payload, target) = send_args();
        let result = dispatcher(&provider, 5).dispatch(&payload, &target).await;

        assert!(matches!(
            result,
            DeliveryResult::PermanentFailure {
                error: DeliveryError::InvalidTarget(_),
                attempts: 1
            }
        ));
        assert_eq!(result.outcome(), "rejected");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_last_error() {
        let provider = Arc::new(MockPushProvider::new(vec![
            MockResponse::Error(DeliveryError::Unavailable),
            MockResponse::Error(DeliveryError::Unavailable),
            MockResponse::Error(DeliveryError::Timeout(Duration::from_secs(10))),
        ]));
        let (payload, target) = send_args();
        let result = dispatcher(&provider, 3).dispatch(&payload, &target).await;

        assert_eq!(
            result,
            DeliveryResult::RetryableFailure {
                error: DeliveryError::Timeout(Duration::from_secs(10)),
                attempts: 3,
            }
        );
        assert_eq!(result.outcome(), "retry_exhausted");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_never_retries() {
        let provider = Arc::new(MockPushProvider::new(vec![MockResponse::Error(
            DeliveryError::Unavailable,
        )]));
        let (payload, target) = send_args();
        let result = dispatcher(&provider, 1).dispatch(&payload, &target).await;

        assert!(matches!(result, DeliveryResult::RetryableFailure { attempts: 1, .. }));
        assert_eq!(provider.call_count(), 1);
    }
}
