use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use feedcast_core::{
    BackoffPolicy, ChangeEvent, ChangeEventSource, ChangeSubscription, CursorStore, DeliveryTarget,
    FeedError, Position,
};
use feedcast_push::{DeliveryResult, NotificationDispatcher};
use feedcast_telemetry::MetricsRecorder;

use crate::decoder::EventDecoder;

/// Lifecycle of the relay, published on a watch channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayState {
    Starting,
    Subscribed,
    Processing,
    Reconnecting,
    Stopped,
}

/// Per-run event counts, returned when the loop stops.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub delivered: u64,
    pub retry_exhausted: u64,
    pub rejected: u64,
    pub skipped: u64,
    pub reconnects: u64,
}

impl RelayStats {
    fn record(&mut self, outcome: &str) {
        match outcome {
            "delivered" => self.delivered += 1,
            "retry_exhausted" => self.retry_exhausted += 1,
            "rejected" => self.rejected += 1,
            _ => self.skipped += 1,
        }
    }
}

/// Why event processing stopped short.
enum Interrupt {
    Cancelled,
    Cursor(FeedError),
}

/// Default reconnect backoff: 500 ms doubling to 30 s, unbounded attempts.
pub fn default_reconnect_policy() -> BackoffPolicy {
    BackoffPolicy {
        base_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(30),
        max_attempts: u32::MAX,
    }
}

/// Long-running pipeline from the change feed to the push provider.
///
/// Events are handled strictly one at a time, in feed order. A position is
/// persisted only after its event has reached a final outcome (delivered,
/// dropped after retries, rejected, or skipped), so after a crash or
/// shutdown at most the in-flight event is delivered again.
pub struct RelayLoop {
    source: Arc<dyn ChangeEventSource>,
    cursor: Arc<dyn CursorStore>,
    dispatcher: NotificationDispatcher,
    decoder: EventDecoder,
    target: DeliveryTarget,
    reconnect: BackoffPolicy,
    metrics: Option<Arc<MetricsRecorder>>,
    state: watch::Sender<RelayState>,
    resume_after: Option<Position>,
    stats: RelayStats,
}

impl RelayLoop {
    pub fn new(
        source: Arc<dyn ChangeEventSource>,
        cursor: Arc<dyn CursorStore>,
        dispatcher: NotificationDispatcher,
        target: DeliveryTarget,
    ) -> Self {
        let (state, _) = watch::channel(RelayState::Starting);
        Self {
            source,
            cursor,
            dispatcher,
            decoder: EventDecoder,
            target,
            reconnect: default_reconnect_policy(),
            metrics: None,
            state,
            resume_after: None,
            stats: RelayStats::default(),
        }
    }

    /// Backoff between feed reconnects. `max_attempts` is ignored.
    pub fn with_reconnect_policy(mut self, policy: BackoffPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: RelayState) {
        self.state.send_replace(state);
    }

    /// Run until `cancel` fires. Cancellation interrupts a pending feed read,
    /// provider call or backoff sleep; the interrupted event stays unpersisted.
    pub async fn run(mut self, cancel: CancellationToken) -> RelayStats {
        info!(device = ?self.target, "relay starting");
        let mut reconnect_attempt: u32 = 0;

        'connect: loop {
            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => break 'connect,
                opened = self.open() => opened,
            };

            let mut subscription = match opened {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!(error = %e, "failed to open change feed");
                    if !self.wait_reconnect(&cancel, &mut reconnect_attempt).await {
                        break 'connect;
                    }
                    continue 'connect;
                }
            };

            reconnect_attempt = 0;
            self.set_state(RelayState::Subscribed);
            info!(position = ?self.resume_after, "subscribed to change feed");

            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break 'connect,
                    next = subscription.next() => next,
                };

                match next {
                    Ok(Some(event)) => {
                        self.set_state(RelayState::Processing);
                        match self.process(event, &cancel).await {
                            Ok(()) => self.set_state(RelayState::Subscribed),
                            Err(Interrupt::Cancelled) => break 'connect,
                            Err(Interrupt::Cursor(e)) => {
                                error!(error = %e, "failed to persist relay position");
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        warn!("change feed ended");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "change feed read failed");
                        break;
                    }
                }
            }

            drop(subscription);
            if !self.wait_reconnect(&cancel, &mut reconnect_attempt).await {
                break 'connect;
            }
        }

        self.set_state(RelayState::Stopped);
        info!(
            delivered = self.stats.delivered,
            retry_exhausted = self.stats.retry_exhausted,
            rejected = self.stats.rejected,
            skipped = self.stats.skipped,
            reconnects = self.stats.reconnects,
            "relay stopped"
        );
        self.stats
    }

    /// Load the persisted position and open the feed after it.
    ///
    /// On a first run the feed starts at its head; that head is kept as the
    /// resume point so a reconnect before the first save does not jump past
    /// events written in between.
    async fn open(&mut self) -> Result<Box<dyn ChangeSubscription>, FeedError> {
        let stored = self.cursor.load().await?;
        self.resume_after = self.resume_after.max(stored);
        let subscription = self.source.open(self.resume_after).await?;
        if self.resume_after.is_none() {
            let start = subscription.start();
            debug!(position = %start, "first run, anchored at feed head");
            self.resume_after = Some(start);
        }
        Ok(subscription)
    }

    /// Sleep before the next reconnect. Returns false when cancelled.
    async fn wait_reconnect(&mut self, cancel: &CancellationToken, attempt: &mut u32) -> bool {
        self.set_state(RelayState::Reconnecting);
        let delay = self.reconnect.delay_for(*attempt);
        *attempt = attempt.saturating_add(1);
        self.stats.reconnects += 1;
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc("feed_reconnects_total", &[], 1);
        }

        warn!(
            attempt = *attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnecting to change feed"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    async fn process(
        &mut self,
        event: ChangeEvent,
        cancel: &CancellationToken,
    ) -> Result<(), Interrupt> {
        let position = event.position;
        if self.resume_after.is_some_and(|last| position <= last) {
            debug!(%position, "ignoring replayed event");
            return Ok(());
        }

        let record_id = event.record_id.as_ref().map(ToString::to_string);
        let outcome = match self.decoder.decode(&event) {
            Err(e) => {
                warn!(
                    %position,
                    record_id = ?record_id,
                    operation = %event.operation,
                    reason = e.reason(),
                    detail = %e,
                    "skipping change event"
                );
                "skipped"
            }
            Ok(payload) => {
                let started = Instant::now();
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        info!(%position, "delivery interrupted by shutdown");
                        return Err(Interrupt::Cancelled);
                    }
                    result = self.dispatcher.dispatch(&payload, &self.target) => result,
                };
                self.observe_delivery(&result, started.elapsed());

                match &result {
                    DeliveryResult::Delivered { message_id, attempts } => info!(
                        %position,
                        record_id = ?record_id,
                        message_id = %message_id,
                        attempts,
                        outcome = "delivered",
                        "notification sent"
                    ),
                    DeliveryResult::RetryableFailure { error, attempts } => error!(
                        %position,
                        record_id = ?record_id,
                        attempts,
                        error_kind = error.error_kind(),
                        error = %error,
                        outcome = "retry_exhausted",
                        "dropping notification after retries"
                    ),
                    DeliveryResult::PermanentFailure { error, attempts } => warn!(
                        %position,
                        record_id = ?record_id,
                        attempts,
                        error_kind = error.error_kind(),
                        error = %error,
                        outcome = "rejected",
                        "notification rejected by provider"
                    ),
                }
                result.outcome()
            }
        };

        self.stats.record(outcome);
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc("relay_events_total", &[("outcome", outcome)], 1);
        }

        self.cursor.save(position).await.map_err(Interrupt::Cursor)?;
        self.resume_after = Some(position);
        if let Some(metrics) = &self.metrics {
            metrics.gauge_set("relay_position", &[], position.as_i64() as f64);
        }
        Ok(())
    }

    fn observe_delivery(&self, result: &DeliveryResult, elapsed: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc("delivery_attempts_total", &[], u64::from(result.attempts()));
            metrics.histogram_observe("delivery_latency_ms", &[], elapsed.as_secs_f64() * 1000.0);
        }
    }
}

/// A relay running on its own task.
pub struct RelayHandle {
    state: watch::Receiver<RelayState>,
    cancel: CancellationToken,
    task: JoinHandle<RelayStats>,
}

impl RelayHandle {
    pub fn spawn(relay: RelayLoop, cancel: CancellationToken) -> Self {
        let state = relay.subscribe_state();
        let task = tokio::spawn(relay.run(cancel.clone()));
        Self {
            state,
            cancel,
            task,
        }
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<RelayState> {
        self.state.clone()
    }

    /// Cancel the relay and wait for it to stop.
    pub async fn shutdown(self) -> RelayStats {
        self.cancel.cancel();
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "relay task failed");
                RelayStats::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FeedFault, MemoryFeed};
    use feedcast_core::{DeliveryError, MemoryCursorStore};
    use feedcast_push::{MockPushProvider, MockResponse};

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            max_attempts: 3,
        }
    }

    fn relay(
        feed: &MemoryFeed,
        cursor: &Arc<MemoryCursorStore>,
        provider: &Arc<MockPushProvider>,
    ) -> RelayLoop {
        RelayLoop::new(
            Arc::new(feed.clone()),
            cursor.clone(),
            NotificationDispatcher::new(provider.clone(), fast_policy()),
            DeliveryTarget::new("device"),
        )
        .with_reconnect_policy(fast_policy())
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_and_persists_each_event() {
        let feed = MemoryFeed::new();
        let cursor = Arc::new(MemoryCursorStore::starting_at(Position::new(0)));
        let provider = Arc::new(MockPushProvider::accepting());

        let handle = RelayHandle::spawn(relay(&feed, &cursor, &provider), CancellationToken::new());
        let p1 = feed.push_insert("A", "1");
        let p2 = feed.push_insert("B", "2");

        wait_until(|| cursor.current() == Some(p2)).await;
        assert_eq!(provider.titles(), vec!["A", "B"]);
        assert_eq!(cursor.saves(), vec![p1, p2]);

        let stats = handle.shutdown().await;
        assert_eq!(stats.delivered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn state_transitions_are_published() {
        let feed = MemoryFeed::new();
        let cursor = Arc::new(MemoryCursorStore::new());
        let provider = Arc::new(MockPushProvider::accepting());

        let handle = RelayHandle::spawn(relay(&feed, &cursor, &provider), CancellationToken::new());
        let mut states = handle.state_receiver();
        states
            .wait_for(|s| *s == RelayState::Subscribed)
            .await
            .unwrap();
        assert_eq!(handle.state(), RelayState::Subscribed);

        handle.shutdown().await;
        assert_eq!(*states.borrow(), RelayState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_events_still_advance_position() {
        let feed = MemoryFeed::new();
        let cursor = Arc::new(MemoryCursorStore::starting_at(Position::new(0)));
        let provider = Arc::new(MockPushProvider::accepting());

        let handle = RelayHandle::spawn(relay(&feed, &cursor, &provider), CancellationToken::new());
        feed.push_raw(feedcast_core::OperationKind::Delete, None);
        let last = feed.push_raw(
            feedcast_core::OperationKind::Insert,
            Some(serde_json::json!({"title": "no content"})),
        );

        wait_until(|| cursor.current() == Some(last)).await;
        assert_eq!(provider.call_count(), 0);
        let stats = handle.shutdown().await;
        assert_eq!(stats.skipped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_refused_open() {
        let feed = MemoryFeed::new();
        feed.inject(FeedFault::RefuseOpen);
        feed.inject(FeedFault::RefuseOpen);
        let cursor = Arc::new(MemoryCursorStore::starting_at(Position::new(0)));
        let provider = Arc::new(MockPushProvider::accepting());

        let handle = RelayHandle::spawn(relay(&feed, &cursor, &provider), CancellationToken::new());
        let p1 = feed.push_insert("A", "1");

        wait_until(|| cursor.current() == Some(p1)).await;
        assert_eq!(feed.opens().len(), 3);
        let stats = handle.shutdown().await;
        assert_eq!(stats.reconnects, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_delivery_leaves_position_unpersisted() {
        let feed = MemoryFeed::new();
        let cursor = Arc::new(MemoryCursorStore::starting_at(Position::new(0)));
        let provider = Arc::new(MockPushProvider::new(vec![MockResponse::Hang]));

        let handle = RelayHandle::spawn(relay(&feed, &cursor, &provider), CancellationToken::new());
        feed.push_insert("A", "1");

        wait_until(|| provider.call_count() == 1).await;
        let stats = handle.shutdown().await;
        assert_eq!(stats, RelayStats::default());
        assert_eq!(cursor.current(), Some(Position::new(0)));
        assert!(cursor.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_retry_backoff() {
        let feed = MemoryFeed::new();
        let cursor = Arc::new(MemoryCursorStore::starting_at(Position::new(0)));
        let provider = Arc::new(MockPushProvider::new(vec![MockResponse::Error(
            DeliveryError::RateLimited {
                retry_after: Some(Duration::from_secs(3600)),
            },
        )]));

        let handle = RelayHandle::spawn(relay(&feed, &cursor, &provider), CancellationToken::new());
        feed.push_insert("A", "1");

        wait_until(|| provider.call_count() == 1).await;
        handle.shutdown().await;
        assert_eq!(provider.call_count(), 1);
        assert!(cursor.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_are_recorded() {
        let feed = MemoryFeed::new();
        let cursor = Arc::new(MemoryCursorStore::starting_at(Position::new(0)));
        let provider = Arc::new(MockPushProvider::new(vec![MockResponse::Error(
            DeliveryError::Unavailable,
        )]));
        let metrics = Arc::new(MetricsRecorder::new());
        feed.inject(FeedFault::DisconnectAfter(1));

        let relay = relay(&feed, &cursor, &provider).with_metrics(metrics.clone());
        let handle = RelayHandle::spawn(relay, CancellationToken::new());
        feed.push_insert("A", "1");
        let p2 = feed.push_raw(feedcast_core::OperationKind::Update, None);

        wait_until(|| cursor.current() == Some(p2)).await;
        handle.shutdown().await;

        assert_eq!(metrics.counter_get("relay_events_total", &[("outcome", "delivered")]), 1);
        assert_eq!(metrics.counter_get("relay_events_total", &[("outcome", "skipped")]), 1);
        assert_eq!(metrics.counter_get("delivery_attempts_total", &[]), 2);
        assert_eq!(metrics.counter_get("feed_reconnects_total", &[]), 1);
        assert_eq!(metrics.gauge_get("relay_position", &[]), p2.as_i64() as f64);
        assert_eq!(metrics.histogram_summary("delivery_latency_ms", &[]).count, 1);
    }
}
