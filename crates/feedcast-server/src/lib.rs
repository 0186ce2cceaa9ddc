//! HTTP ingestion endpoint: `POST /add` stores a record, whose insert the
//! relay later picks up from the change feed.

pub mod error;
pub mod handlers;
pub mod server;

pub use error::ServerError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
