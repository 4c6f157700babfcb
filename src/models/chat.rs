use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Chat {
    pub id: i64,
    pub session_id: Uuid,
    pub name: String,
    pub user_id: i64,
    pub model_provider: String,
    pub model_name: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub distilled_content: Option<String>,
    pub tokens_used: i32,
    pub model_used: Option<String>,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub tokens_estimated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub model_used: Option<String>,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub tokens_estimated: bool,
}

/// Chat list entry returned by the sessions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSummary {
    pub session_id: Uuid,
    pub name: String,
    pub model_provider: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Chat> for ChatSummary {
    fn from(chat: Chat) -> Self {
        Self {
            session_id: chat.session_id,
            name: chat.name,
            model_provider: chat.model_provider,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        }
    }
}
