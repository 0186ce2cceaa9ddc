use std::fmt;

use serde::{Deserialize, Serialize};

/// Title and body of one push notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub content: String,
}

impl NotificationPayload {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Destination registration token. Resolved once at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct DeliveryTarget(String);

impl DeliveryTarget {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Registration tokens are long-lived credentials; only a prefix is printed.
impl fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "DeliveryTarget({prefix}…)")
    }
}

/// Provider-assigned identifier of an accepted message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_debug_is_redacted() {
        let target = DeliveryTarget::new("abcdefghijklmnopqrstuvwxyz");
        let printed = format!("{target:?}");
        assert!(printed.starts_with("DeliveryTarget(abcdef"));
        assert!(!printed.contains("xyz"));
        assert_eq!(target.as_str(), "abcdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn message_id_display() {
        let id = MessageId::new("projects/p/messages/1");
        assert_eq!(id.to_string(), "projects/p/messages/1");
    }
}
