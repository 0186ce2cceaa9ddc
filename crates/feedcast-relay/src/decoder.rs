use serde_json::Value;

use feedcast_core::{ChangeEvent, DecodeError, NotificationPayload, OperationKind};

/// Turns inserted records into notification payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventDecoder;

impl EventDecoder {
    pub fn decode(&self, event: &ChangeEvent) -> Result<NotificationPayload, DecodeError> {
        if event.operation != OperationKind::Insert {
            return Err(DecodeError::UnsupportedOperation(event.operation));
        }

        let document = event
            .document
            .as_ref()
            .ok_or(DecodeError::MissingField("document"))?;

        Ok(NotificationPayload::new(
            string_field(document, "title")?,
            string_field(document, "content")?,
        ))
    }
}

fn string_field<'a>(document: &'a Value, name: &'static str) -> Result<&'a str, DecodeError> {
    document
        .get(name)
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField(name))
}
