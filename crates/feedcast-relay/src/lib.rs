//! Change-feed to push-notification relay.
//!
//! [`RelayLoop`] subscribes to a [`ChangeEventSource`], turns each inserted
//! record into a notification with [`EventDecoder`], delivers it through a
//! [`NotificationDispatcher`] and persists the event position in a
//! [`CursorStore`] so a restart resumes where the last run stopped.
//!
//! [`ChangeEventSource`]: feedcast_core::ChangeEventSource
//! [`CursorStore`]: feedcast_core::CursorStore
//! [`NotificationDispatcher`]: feedcast_push::NotificationDispatcher

pub mod decoder;
pub mod mock;
pub mod relay;

pub use decoder::EventDecoder;
pub use mock::{FeedFault, MemoryFeed};
pub use relay::{RelayHandle, RelayLoop, RelayState, RelayStats};
