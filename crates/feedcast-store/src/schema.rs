/// SQL DDL for the feedcast database.
/// WAL mode lets the relay read the feed while the ingestion connection writes.
pub const SCHEMA_VERSION: u32 = 1;

/// `change_log` is filled exclusively by the triggers on `records`, inside the
/// writing statement, so every committed mutation has exactly one feed row.
/// AUTOINCREMENT keeps positions monotonic even after rows are deleted.
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS change_log (
    position INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL,
    record_id TEXT,
    document TEXT,
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS relay_cursors (
    name TEXT PRIMARY KEY,
    position INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS records_feed_insert AFTER INSERT ON records
BEGIN
    INSERT INTO change_log (operation, record_id, document, recorded_at)
    VALUES (
        'insert',
        NEW.id,
        json_object('id', NEW.id, 'title', NEW.title, 'content', NEW.content, 'createdAt', NEW.created_at),
        strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
    );
END;

CREATE TRIGGER IF NOT EXISTS records_feed_update AFTER UPDATE ON records
BEGIN
    INSERT INTO change_log (operation, record_id, document, recorded_at)
    VALUES (
        'update',
        NEW.id,
        json_object('id', NEW.id, 'title', NEW.title, 'content', NEW.content, 'createdAt', NEW.created_at),
        strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
    );
END;

CREATE TRIGGER IF NOT EXISTS records_feed_delete AFTER DELETE ON records
BEGIN
    INSERT INTO change_log (operation, record_id, document, recorded_at)
    VALUES ('delete', OLD.id, NULL, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
END;

CREATE INDEX IF NOT EXISTS idx_records_created ON records(created_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
