use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};

use feedcast_core::{CursorStore, FeedError, Position};

use crate::database::Database;
use crate::error::StoreError;

/// Cursor persisted in `relay_cursors`, keyed by relay name.
#[derive(Clone)]
pub struct SqliteCursorStore {
    db: Database,
    name: String,
}

impl SqliteCursorStore {
    pub const DEFAULT_NAME: &'static str = "push-relay";

    pub fn new(db: Database, name: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
        }
    }
}

fn cursor_error(e: StoreError) -> FeedError {
    FeedError::Cursor(e.to_string())
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn load(&self) -> Result<Option<Position>, FeedError> {
        self.db
            .with_conn(|conn| {
                let mut stmt =
                    conn.prepare_cached("SELECT position FROM relay_cursors WHERE name = ?1")?;
                let mut rows = stmt.query([&self.name])?;
                match rows.next()? {
                    Some(row) => Ok(Some(Position::new(row.get(0)?))),
                    None => Ok(None),
                }
            })
            .map_err(cursor_error)
    }

    async fn save(&self, position: Position) -> Result<(), FeedError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO relay_cursors (name, position, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE
                     SET position = excluded.position, updated_at = excluded.updated_at
                     WHERE excluded.position > relay_cursors.position",
                    rusqlite::params![self.name, position.as_i64(), now],
                )?;
                Ok(())
            })
            .map_err(cursor_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_before_first_save() {
        let store = SqliteCursorStore::new(Database::in_memory().unwrap(), "relay");
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_and_load() {
        let store = SqliteCursorStore::new(Database::in_memory().unwrap(), "relay");
        store.save(Position::new(5)).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(Position::new(5)));
        store.save(Position::new(9)).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(Position::new(9)));
    }

    #[tokio::test]
    async fn lower_position_is_ignored() {
        let store = SqliteCursorStore::new(Database::in_memory().unwrap(), "relay");
        store.save(Position::new(9)).await.unwrap();
        store.save(Position::new(4)).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(Position::new(9)));
    }

    #[tokio::test]
    async fn names_are_independent() {
        let db = Database::in_memory().unwrap();
        let a = SqliteCursorStore::new(db.clone(), "a");
        let b = SqliteCursorStore::new(db, "b");
        a.save(Position::new(3)).await.unwrap();
        assert_eq!(b.load().await.unwrap(), None);
        assert_eq!(a.load().await.unwrap(), Some(Position::new(3)));
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.db");
        {
            let store = SqliteCursorStore::new(Database::open(&path).unwrap(), "relay");
            store.save(Position::new(12)).await.unwrap();
        }
        let store = SqliteCursorStore::new(Database::open(&path).unwrap(), "relay");
        assert_eq!(store.load().await.unwrap(), Some(Position::new(12)));
    }
}
