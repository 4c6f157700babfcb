use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type-class of an uploaded attachment. Stored as its lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Document,
    Other,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Document => "document",
            AttachmentKind::Other => "other",
        }
    }

    /// Classify by MIME type.
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            AttachmentKind::Image
        } else if crate::validation::SUPPORTED_DOCUMENT_MIMES.contains(&mime_type) {
            AttachmentKind::Document
        } else {
            AttachmentKind::Other
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    pub original_filename: String,
    pub stored_filename: String,
    pub file_path: String,
    pub mime_type: String,
    pub file_size: i64,
    pub file_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub message_id: i64,
    pub original_filename: String,
    pub stored_filename: String,
    pub file_path: String,
    pub mime_type: String,
    pub file_size: i64,
    pub file_type: String,
}
