#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use coursetrack_core::AttachmentItem;
use tempfile::TempDir;

pub fn temp_dir() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"))
}

pub fn note(id: &str, body: &str) -> AttachmentItem {
    use base64::{engine::general_purpose, Engine as _};

    AttachmentItem {
        id: id.to_string(),
        name: format!("Lecture {id}"),
        original_file_name: format!("{id}.md"),
        base64_payload: general_purpose::STANDARD.encode(body),
        upload_timestamp: Utc
            .with_ymd_and_hms(2026, 3, 11, 9, 0, 0)
            .single()
            .unwrap_or_else(|| panic!("valid timestamp")),
    }
}

pub fn ids(items: &[AttachmentItem]) -> Vec<&str> {
    items.iter().map(|item| item.id.as_str()).collect()
}
