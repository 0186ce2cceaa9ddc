pub mod backoff;
pub mod cursor;
pub mod errors;
pub mod feed;
pub mod ids;
pub mod notification;
pub mod provider;
pub mod records;

pub use backoff::BackoffPolicy;
pub use cursor::{CursorStore, MemoryCursorStore};
pub use errors::{DecodeError, DeliveryError, FeedError};
pub use feed::{ChangeEvent, ChangeEventSource, ChangeSubscription, OperationKind, Position};
pub use ids::RecordId;
pub use notification::{DeliveryTarget, MessageId, NotificationPayload};
pub use provider::PushProvider;
pub use records::{NewRecord, Record, ValidationError};
