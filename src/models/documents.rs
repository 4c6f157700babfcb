use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Document processing state machine:
/// pending -> processing -> (ready | failed); failed may be reprocessed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Document {
    pub id: i64,
    pub user_id: i64,
    pub original_filename: String,
    pub stored_filename: String,
    pub file_path: String,
    pub mime_type: String,
    pub file_size: i64,
    pub file_type: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub chunk_count: i32,
    pub total_tokens: i32,
    pub embedding_model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub user_id: i64,
    pub original_filename: String,
    pub stored_filename: String,
    pub file_path: String,
    pub mime_type: String,
    pub file_size: i64,
    pub file_type: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DocumentChunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i32,
    pub content: String,
    pub token_count: i32,
    pub start_char: Option<i32>,
    pub end_char: Option<i32>,
    pub page_number: Option<i32>,
    pub chroma_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDocumentChunk {
    pub document_id: i64,
    pub chunk_index: i32,
    pub content: String,
    pub token_count: i32,
    pub start_char: Option<i32>,
    pub end_char: Option<i32>,
    pub page_number: Option<i32>,
    pub chroma_id: Uuid,
}

/// A retrieval hit enriched with its parent document's name, as handed to
/// prompt formatting and the search endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub document_id: i64,
    pub document_name: Option<String>,
    pub chunk_index: i32,
    pub page_number: Option<i32>,
    pub similarity: f32,
    pub token_count: i32,
}
