use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One uploaded file (lecture notes, slides) stored inline as base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentItem {
    pub id: String,
    pub name: String,
    pub original_file_name: String,
    pub base64_payload: String,
    pub upload_timestamp: DateTime<Utc>,
}

/// Every attachment of one owner (a course). Saves replace `items` wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRecord {
    pub owner_id: String,
    pub items: Vec<AttachmentItem>,
}

impl AttachmentItem {
    /// Approximate decoded size, for display.
    #[must_use]
    pub fn payload_bytes(&self) -> usize {
        let padding = self
            .base64_payload
            .bytes()
            .rev()
            .take_while(|b| *b == b'=')
            .count();
        (self.base64_payload.len() / 4 * 3).saturating_sub(padding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_uses_camel_case_fields() {
        let record = AttachmentRecord {
            owner_id: "c1".to_string(),
            items: vec![AttachmentItem {
                id: "n1".to_string(),
                name: "Week 1".to_string(),
                original_file_name: "week1.pdf".to_string(),
                base64_payload: "aGVsbG8=".to_string(),
                upload_timestamp: Utc::now(),
            }],
        };
        let json = serde_json::to_value(&record)
            .unwrap_or_else(|err| panic!("record should serialize: {err}"));

        assert_eq!(json["ownerId"], "c1");
        assert_eq!(json["items"][0]["originalFileName"], "week1.pdf");
        assert_eq!(json["items"][0]["base64Payload"], "aGVsbG8=");
        assert!(json["items"][0]["uploadTimestamp"].is_string());
        assert_eq!(record.items[0].payload_bytes(), 5);
    }
}
