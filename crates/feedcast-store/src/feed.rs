use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use feedcast_core::{
    ChangeEvent, ChangeEventSource, ChangeSubscription, FeedError, OperationKind, Position,
    RecordId,
};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Change feed backed by the `change_log` table.
///
/// Subscriptions poll for rows past their cursor. The feed never ends on its
/// own; a subscription only stops yielding when a read fails.
#[derive(Clone)]
pub struct SqliteChangeSource {
    db: Database,
    poll_interval: Duration,
    batch_size: u32,
}

impl SqliteChangeSource {
    pub fn new(db: Database, poll_interval: Duration, batch_size: u32) -> Self {
        Self {
            db,
            poll_interval,
            batch_size: batch_size.max(1),
        }
    }

    /// Highest position written so far, 0 when the feed is empty.
    pub fn head(&self) -> Result<Position, StoreError> {
        self.db.with_conn(|conn| {
            let raw: i64 = conn.query_row(
                "SELECT COALESCE(MAX(position), 0) FROM change_log",
                [],
                |row| row.get(0),
            )?;
            Ok(Position::new(raw))
        })
    }
}

#[async_trait]
impl ChangeEventSource for SqliteChangeSource {
    async fn open(
        &self,
        after: Option<Position>,
    ) -> Result<Box<dyn ChangeSubscription>, FeedError> {
        let cursor = match after {
            Some(position) => position,
            None => self.head()?,
        };
        debug!(%cursor, "change feed opened");
        Ok(Box::new(SqliteSubscription {
            db: self.db.clone(),
            start: cursor,
            cursor,
            buffer: VecDeque::new(),
            poll_interval: self.poll_interval,
            batch_size: self.batch_size,
        }))
    }
}

/// Polling cursor over `change_log`.
pub struct SqliteSubscription {
    db: Database,
    start: Position,
    cursor: Position,
    buffer: VecDeque<ChangeEvent>,
    poll_interval: Duration,
    batch_size: u32,
}

impl SqliteSubscription {
    fn fetch(&self) -> Result<Vec<ChangeEvent>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT position, operation, record_id, document FROM change_log
                 WHERE position > ?1 ORDER BY position ASC LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![self.cursor.as_i64(), self.batch_size])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_event(row)?);
            }
            Ok(events)
        })
    }
}

#[async_trait]
impl ChangeSubscription for SqliteSubscription {
    fn start(&self) -> Position {
        self.start
    }

    async fn next(&mut self) -> Result<Option<ChangeEvent>, FeedError> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Ok(Some(event));
            }

            let batch = self.fetch()?;
            if let Some(last) = batch.last() {
                self.cursor = last.position;
                self.buffer.extend(batch);
                continue;
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<ChangeEvent, StoreError> {
    let position: i64 = row_helpers::get(row, 0, "change_log", "position")?;
    let operation: String = row_helpers::get(row, 1, "change_log", "operation")?;
    let record_id: Option<String> = row_helpers::get_opt(row, 2, "change_log", "record_id")?;
    let raw_document: Option<String> = row_helpers::get_opt(row, 3, "change_log", "document")?;

    // A bad document is the decoder's problem, not a transport failure.
    let document = raw_document.and_then(|raw| {
        match row_helpers::parse_json(&raw, "change_log", "document") {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(position, error = %e, "unreadable feed document");
                None
            }
        }
    });

    let operation = operation
        .parse::<OperationKind>()
        .unwrap_or(OperationKind::Other);

    Ok(ChangeEvent {
        position: Position::new(position),
        operation,
        record_id: record_id.map(RecordId::from_raw),
        document,
    })
}
