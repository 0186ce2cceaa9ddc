use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::FeedError;
use crate::feed::Position;

/// Durable home of the relay's resume position.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last persisted position, `None` on first run.
    async fn load(&self) -> Result<Option<Position>, FeedError>;

    /// Persist `position`. Implementations never lower a stored position.
    async fn save(&self, position: Position) -> Result<(), FeedError>;
}

/// Process-local cursor store. Keeps every save for inspection.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    inner: Mutex<MemoryCursorState>,
}

#[derive(Debug, Default)]
struct MemoryCursorState {
    current: Option<Position>,
    saves: Vec<Position>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(position: Position) -> Self {
        Self {
            inner: Mutex::new(MemoryCursorState {
                current: Some(position),
                saves: Vec::new(),
            }),
        }
    }

    pub fn current(&self) -> Option<Position> {
        self.inner.lock().current
    }

    pub fn saves(&self) -> Vec<Position> {
        self.inner.lock().saves.clone()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<Position>, FeedError> {
        Ok(self.current())
    }

    async fn save(&self, position: Position) -> Result<(), FeedError> {
        let mut state = self.inner.lock();
        state.saves.push(position);
        if state.current.map_or(true, |current| position > current) {
            state.current = Some(position);
        }
        Ok(())
    }
}
