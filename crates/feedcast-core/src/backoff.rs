use std::time::Duration;

/// Capped exponential backoff shared by delivery retries and feed reconnects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts, the first one included. Never below 1.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Like [`delay_for`](Self::delay_for), stretched to a server hint when
    /// the hint is longer. Never exceeds `max_delay`.
    pub fn retry_delay(&self, retry: u32, suggested: Option<Duration>) -> Duration {
        let computed = self.delay_for(retry);
        match suggested {
            Some(hint) => hint.max(computed).min(self.max_delay),
            None => computed,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
