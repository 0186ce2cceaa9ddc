pub mod auth;
pub mod dispatcher;
pub mod fcm;
pub mod mock;

pub use auth::{AuthError, FcmCredentials, ServiceAccountKey, TokenSource};
pub use dispatcher::{DeliveryResult, NotificationDispatcher};
pub use fcm::{FcmConfig, FcmProvider};
pub use mock::{MockPushProvider, MockResponse};
