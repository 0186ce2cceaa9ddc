use chrono::{SecondsFormat, Utc};
use tracing::instrument;

use feedcast_core::{NewRecord, Record, RecordId};

use crate::database::Database;
use crate::error::StoreError;

/// Storage write boundary for the ingestion endpoint.
///
/// Every successful insert surfaces exactly once in the change feed, ordered
/// after all earlier inserts (the feed row is written by a trigger in the
/// same statement).
#[derive(Clone)]
pub struct RecordRepo {
    db: Database,
}

impl RecordRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, new), fields(title_len = new.title.len()))]
    pub fn insert(&self, new: &NewRecord) -> Result<Record, StoreError> {
        let record = Record {
            id: RecordId::new(),
            title: new.title.clone(),
            content: new.content.clone(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO records (id, title, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    record.id.as_str(),
                    record.title,
                    record.content,
                    record.created_at,
                ],
            )?;
            Ok(())
        })?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RecordRepo {
        RecordRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn insert_assigns_id_and_timestamp() {
        let repo = repo();
        let record = repo.insert(&NewRecord::new("A", "1")).unwrap();
        assert!(record.id.as_str().starts_with("rec_"));
        assert!(record.created_at.ends_with('Z'));
        assert_eq!(record.title, "A");
    }

    #[test]
    fn insert_persists_fields() {
        let db = Database::in_memory().unwrap();
        let record = RecordRepo::new(db.clone())
            .insert(&NewRecord::new("A", "1"))
            .unwrap();

        let (title, content, created_at): (String, String, String) = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT title, content, created_at FROM records WHERE id = ?1",
                    [record.id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?)
            })
            .unwrap();
        assert_eq!(title, "A");
        assert_eq!(content, "1");
        assert_eq!(created_at, record.created_at);
    }

    #[test]
    fn insert_writes_one_feed_row() {
        let db = Database::in_memory().unwrap();
        let repo = RecordRepo::new(db.clone());
        let record = repo.insert(&NewRecord::new("A", "1")).unwrap();

        let (op, record_id, document): (String, String, String) = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT operation, record_id, document FROM change_log",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?)
            })
            .unwrap();
        assert_eq!(op, "insert");
        assert_eq!(record_id, record.id.as_str());
        let doc: serde_json::Value = serde_json::from_str(&document).unwrap();
        assert_eq!(doc["title"], "A");
        assert_eq!(doc["content"], "1");
    }
}
