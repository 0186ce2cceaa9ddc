use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;

use feedcast_core::{
    ChangeEvent, ChangeEventSource, ChangeSubscription, FeedError, OperationKind, Position,
    RecordId,
};

/// Failure injected into the next `open` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedFault {
    /// `open` itself fails.
    RefuseOpen,
    /// The subscription yields this many events, then a transport error.
    DisconnectAfter(usize),
    /// The subscription yields this many events, then reports end of stream.
    EndAfter(usize),
}

#[derive(Default)]
struct FeedState {
    events: Vec<ChangeEvent>,
    faults: VecDeque<FeedFault>,
    opens: Vec<Option<Position>>,
    replay_on_open: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<FeedState>,
    appended: Notify,
}

/// In-memory change feed with injectable faults.
#[derive(Clone, Default)]
pub struct MemoryFeed {
    shared: Arc<Shared>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `open` starts from the beginning regardless of the requested
    /// position, like an at-least-once source replaying history.
    pub fn replaying(self) -> Self {
        self.shared.state.lock().replay_on_open = true;
        self
    }

    fn head_of(state: &FeedState) -> Position {
        state
            .events
            .last()
            .map_or(Position::new(0), |e| e.position)
    }

    fn next_position(state: &FeedState) -> Position {
        Position::new(Self::head_of(state).as_i64() + 1)
    }

    /// Append an insert event for a record with this title and content.
    pub fn push_insert(&self, title: &str, content: &str) -> Position {
        let mut state = self.shared.state.lock();
        let position = Self::next_position(&state);
        let id = RecordId::new();
        state.events.push(ChangeEvent::insert(
            position,
            id.clone(),
            serde_json::json!({"id": id, "title": title, "content": content}),
        ));
        drop(state);
        self.shared.appended.notify_waiters();
        position
    }

    /// Append an arbitrary event.
    pub fn push_raw(&self, operation: OperationKind, document: Option<Value>) -> Position {
        let mut state = self.shared.state.lock();
        let position = Self::next_position(&state);
        state.events.push(ChangeEvent {
            position,
            operation,
            record_id: Some(RecordId::new()),
            document,
        });
        drop(state);
        self.shared.appended.notify_waiters();
        position
    }

    pub fn inject(&self, fault: FeedFault) {
        self.shared.state.lock().faults.push_back(fault);
    }

    /// Positions passed to every `open`, in call order.
    pub fn opens(&self) -> Vec<Option<Position>> {
        self.shared.state.lock().opens.clone()
    }

    pub fn head(&self) -> Position {
        Self::head_of(&self.shared.state.lock())
    }
}

#[async_trait]
impl ChangeEventSource for MemoryFeed {
    async fn open(
        &self,
        after: Option<Position>,
    ) -> Result<Box<dyn ChangeSubscription>, FeedError> {
        let mut state = self.shared.state.lock();
        state.opens.push(after);

        let fault = state.faults.pop_front();
        if fault == Some(FeedFault::RefuseOpen) {
            return Err(FeedError::Transport("feed refused open".into()));
        }

        let cursor = if state.replay_on_open {
            Position::new(0)
        } else {
            after.unwrap_or_else(|| Self::head_of(&state))
        };

        let limit = match fault {
            Some(FeedFault::DisconnectAfter(n)) => Some((n, false)),
            Some(FeedFault::EndAfter(n)) => Some((n, true)),
            _ => None,
        };

        Ok(Box::new(MemorySubscription {
            shared: self.shared.clone(),
            start: cursor,
            cursor,
            yielded: 0,
            limit,
        }))
    }
}

struct MemorySubscription {
    shared: Arc<Shared>,
    start: Position,
    cursor: Position,
    yielded: usize,
    /// (events before the fault, whether the fault is a clean end)
    limit: Option<(usize, bool)>,
}

#[async_trait]
impl ChangeSubscription for MemorySubscription {
    fn start(&self) -> Position {
        self.start
    }

    async fn next(&mut self) -> Result<Option<ChangeEvent>, FeedError> {
        if let Some((n, clean_end)) = self.limit {
            if self.yielded >= n {
                return if clean_end {
                    Ok(None)
                } else {
                    Err(FeedError::Transport("connection reset".into()))
                };
            }
        }

        loop {
            let appended = self.shared.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let found = {
                let state = self.shared.state.lock();
                state
                    .events
                    .iter()
                    .find(|e| e.position > self.cursor)
                    .cloned()
            };

            if let Some(event) = found {
                self.cursor = event.position;
                self.yielded += 1;
                return Ok(Some(event));
            }

            appended.await;
        }
    }
}
