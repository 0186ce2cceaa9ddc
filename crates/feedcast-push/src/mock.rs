use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use feedcast_core::{DeliveryError, DeliveryTarget, MessageId, NotificationPayload, PushProvider};

/// Pre-programmed provider outcomes, consumed one per call.
pub enum MockResponse {
    Success,
    Error(DeliveryError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Never resolve. Useful for cancellation tests.
    Hang,
}

impl MockResponse {
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// One observed `send` call.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub payload: NotificationPayload,
    pub target: DeliveryTarget,
    pub at: Instant,
}

type CallHook = Box<dyn Fn(&RecordedCall) + Send + Sync>;

/// Scripted push provider. Calls past the end of the script succeed.
#[derive(Default)]
pub struct MockPushProvider {
    script: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<RecordedCall>>,
    call_count: AtomicUsize,
    on_call: Option<CallHook>,
}

impl MockPushProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    /// Always succeeds.
    pub fn accepting() -> Self {
        Self::default()
    }

    /// Run `hook` at the start of every call, before the scripted outcome.
    pub fn with_hook(mut self, hook: impl Fn(&RecordedCall) + Send + Sync + 'static) -> Self {
        self.on_call = Some(Box::new(hook));
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Titles of every payload sent, in call order.
    pub fn titles(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.payload.title.clone()).collect()
    }
}

#[async_trait]
impl PushProvider for MockPushProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(
        &self,
        payload: &NotificationPayload,
        target: &DeliveryTarget,
    ) -> Result<MessageId, DeliveryError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        let call = RecordedCall {
            payload: payload.clone(),
            target: target.clone(),
            at: Instant::now(),
        };
        if let Some(hook) = &self.on_call {
            hook(&call);
        }
        self.calls.lock().push(call);

        let mut response = self.script.lock().pop_front().unwrap_or(MockResponse::Success);
        loop {
            match response {
                MockResponse::Success => return Ok(MessageId::new(format!("mock-{idx}"))),
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
                MockResponse::Hang => return std::future::pending().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn follows_script_then_succeeds() {
        let provider = MockPushProvider::new(vec![MockResponse::Error(DeliveryError::Unavailable)]);
        let payload = NotificationPayload::new("A", "1");
        let target = DeliveryTarget::new("t");

        assert_eq!(
            provider.send(&payload, &target).await,
            Err(DeliveryError::Unavailable)
        );
        assert_eq!(
            provider.send(&payload, &target).await.unwrap().as_str(),
            "mock-1"
        );
        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.titles(), vec!["A", "A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_response_waits() {
        let provider = MockPushProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(3),
            MockResponse::Success,
        )]);
        let start = Instant::now();
        provider
            .send(&NotificationPayload::new("A", ""), &DeliveryTarget::new("t"))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn hook_sees_every_call() {
        let seen = std::sync::Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let provider = MockPushProvider::accepting().with_hook(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        let target = DeliveryTarget::new("t");
        provider.send(&NotificationPayload::new("A", ""), &target).await.unwrap();
        provider.send(&NotificationPayload::new("B", ""), &target).await.unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }
}
