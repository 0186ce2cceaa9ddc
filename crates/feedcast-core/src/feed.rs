use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::FeedError;
use crate::ids::RecordId;

/// Ordered, persistable marker of a point in the change feed.
///
/// Callers treat it as opaque: compare, persist, hand back to
/// [`ChangeEventSource::open`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(i64);

impl Position {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutation kind recorded in the feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    Other,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = std::convert::Infallible;

    /// Unknown kinds map to `Other` so the feed never rejects a row.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "insert" => Self::Insert,
            "update" => Self::Update,
            "delete" => Self::Delete,
            _ => Self::Other,
        })
    }
}

/// A single entry read from the change feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub position: Position,
    pub operation: OperationKind,
    pub record_id: Option<RecordId>,
    /// Full document after the change; absent for deletes.
    pub document: Option<serde_json::Value>,
}

impl ChangeEvent {
    pub fn insert(position: Position, record_id: RecordId, document: serde_json::Value) -> Self {
        Self {
            position,
            operation: OperationKind::Insert,
            record_id: Some(record_id),
            document: Some(document),
        }
    }
}

/// Storage change-feed primitive.
#[async_trait]
pub trait ChangeEventSource: Send + Sync {
    /// Open a subscription that yields events strictly after `after`.
    /// With `None` the subscription starts at the current end of the feed.
    async fn open(&self, after: Option<Position>)
        -> Result<Box<dyn ChangeSubscription>, FeedError>;
}

/// Live cursor over the change feed.
#[async_trait]
pub trait ChangeSubscription: Send {
    /// Position this subscription yields events strictly after. For a
    /// subscription opened with `None`, the feed head at open time.
    fn start(&self) -> Position;

    /// Wait for the next event. `Ok(None)` means the feed was closed.
    /// Transport failures are returned as-is; no internal retry.
    async fn next(&mut self) -> Result<Option<ChangeEvent>, FeedError>;
}
