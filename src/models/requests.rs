use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Attachment metadata echoed back by the client after upload and bound to
/// the user turn it accompanies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub original_filename: String,
    pub stored_filename: String,
    pub file_path: String,
    pub mime_type: String,
    pub file_size: i64,
    pub file_type: String,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_provider")]
    pub model: String,
    pub local_model_provider: Option<String>,
    pub session_id: Option<Uuid>,
    pub model_name: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    #[serde(default)]
    pub local_vision_enabled: bool,
    #[serde(default = "default_true")]
    pub use_rag: bool,
}

fn default_provider() -> String {
    "gemini".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameChatRequest {
    pub name: String,
}

/// Body of `POST /documents/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentSearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
    pub document_ids: Option<Vec<i64>>,
}

/// Body of `PUT /api/admin/settings/{key}`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSettingRequest {
    pub setting_value: serde_json::Value,
    pub setting_type: Option<crate::models::settings::SettingType>,
    pub description: Option<String>,
}

/// Body of `PUT /api/admin/api_keys/{provider}`. An empty key deletes the
/// stored secret.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateApiKeyRequest {
    #[serde(default)]
    pub api_key: String,
}
