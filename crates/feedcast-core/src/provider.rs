use async_trait::async_trait;

use crate::errors::DeliveryError;
use crate::notification::{DeliveryTarget, MessageId, NotificationPayload};

/// Push-delivery provider boundary. One call is one delivery attempt;
/// retries belong to the caller.
#[async_trait]
pub trait PushProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn send(
        &self,
        payload: &NotificationPayload,
        target: &DeliveryTarget,
    ) -> Result<MessageId, DeliveryError>;
}
