pub mod cursor;
pub mod database;
pub mod error;
pub mod feed;
pub mod records;
pub mod row_helpers;
pub mod schema;

pub use cursor::SqliteCursorStore;
pub use database::Database;
pub use error::StoreError;
pub use feed::{SqliteChangeSource, SqliteSubscription};
pub use records::RecordRepo;
