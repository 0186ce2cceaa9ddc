use serde::{Deserialize, Serialize};

use crate::ids::RecordId;

/// Longest accepted title, in characters.
pub const MAX_TITLE_CHARS: usize = 256;
/// Longest accepted content, in characters. FCM caps the whole message at 4 KiB.
pub const MAX_CONTENT_CHARS: usize = 4096;

/// A stored record. Created once on insert, never mutated by this system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    pub title: String,
    pub content: String,
    pub created_at: String,
}

/// Write request for a new record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub title: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("title must not be blank")]
    BlankTitle,
    #[error("title exceeds {MAX_TITLE_CHARS} characters")]
    TitleTooLong,
    #[error("content exceeds {MAX_CONTENT_CHARS} characters")]
    ContentTooLong,
}

impl NewRecord {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::BlankTitle);
        }
        if self.title.chars().count() > MAX_TITLE_CHARS {
            return Err(ValidationError::TitleTooLong);
        }
        if self.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ValidationError::ContentTooLong);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_record_passes() {
        assert!(NewRecord::new("A", "1").validate().is_ok());
    }

    #[test]
    fn empty_content_is_allowed() {
        assert!(NewRecord::new("Ping", "").validate().is_ok());
    }

    #[test]
    fn blank_title_rejected() {
        assert_eq!(
            NewRecord::new("   ", "body").validate(),
            Err(ValidationError::BlankTitle)
        );
    }

    #[test]
    fn oversized_fields_rejected() {
        let title = "t".repeat(MAX_TITLE_CHARS + 1);
        assert_eq!(
            NewRecord::new(title, "").validate(),
            Err(ValidationError::TitleTooLong)
        );

        let content = "c".repeat(MAX_CONTENT_CHARS + 1);
        assert_eq!(
            NewRecord::new("ok", content).validate(),
            Err(ValidationError::ContentTooLong)
        );
    }

    #[test]
    fn limits_count_characters_not_bytes() {
        let title = "é".repeat(MAX_TITLE_CHARS);
        assert!(NewRecord::new(title, "").validate().is_ok());
    }

    #[test]
    fn record_serializes_camel_case() {
        let record = Record {
            id: RecordId::from_raw("rec_1"),
            title: "A".into(),
            content: "1".into(),
            created_at: "2024-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["createdAt"], "2024-01-01T00:00:00Z");
        assert_eq!(json["id"], "rec_1");
    }
}
