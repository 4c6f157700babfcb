use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    middleware::auth::AuthenticatedUser,
    models::chat::{Chat, ChatSummary},
    models::requests::RenameChatRequest,
    queries,
    state::AppState,
};

async fn owned_chat(
    conn: &mut crate::DbConn,
    session_id: Uuid,
    user_id: i64,
) -> Result<Chat> {
    let chat = queries::chats::get_chat_by_session_id(conn, session_id)
        .await?
        .ok_or_else(|| Error::NotFound("Session not found".to_string()))?;
    if chat.user_id != user_id {
        return Err(Error::Forbidden("Not your chat".to_string()));
    }
    Ok(chat)
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub session_id: Uuid,
}

/// GET /api/history?session_id=…
pub async fn get_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let chat = owned_chat(&mut conn, params.session_id, user.id).await?;

    let messages = queries::messages::get_messages_for_chat(&mut conn, chat.id).await?;
    let mut history = Vec::with_capacity(messages.len());
    for msg in messages {
        let attachments =
            queries::attachments::get_attachments_for_message(&mut conn, msg.id).await?;
        let mut entry = serde_json::to_value(&msg)?;
        entry["attachments"] = serde_json::to_value(attachments)?;
        history.push(entry);
    }

    Ok(Json(serde_json::Value::Array(history)))
}

/// GET /api/sessions
pub async fn get_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<ChatSummary>>> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let chats = queries::chats::list_chats_for_user(&mut conn, user.id).await?;
    Ok(Json(chats.into_iter().map(ChatSummary::from).collect()))
}

/// DELETE /api/delete_chat/{session_id}
///
/// Removes the chat with its messages, attachment rows, and attachment
/// files on disk. The row cascade is the database's; the file cascade is
/// ours.
pub async fn delete_chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let chat = owned_chat(&mut conn, session_id, user.id).await?;

    let attachments = queries::attachments::get_attachments_for_chat(&mut conn, chat.id).await?;
    let mut deleted_files = 0usize;
    for attachment in &attachments {
        let path = state.upload_root().join(&attachment.file_path);
        if path.exists() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => deleted_files += 1,
                Err(e) => {
                    tracing::warn!(
                        "[Chats] Failed to remove attachment file {}: {}",
                        path.display(),
                        e
                    );
                }
            }
        }
    }

    queries::chats::delete_chat(&mut conn, chat.id).await?;
    tracing::info!(
        "[Chats] Deleted chat {} with {} attachment files",
        chat.id,
        deleted_files
    );

    Ok(Json(serde_json::json!({
        "status": "deleted",
        "deleted_files": deleted_files
    })))
}

/// DELETE /api/messages/{id}
///
/// Removes one message (and, via cascade, its attachments) from a chat
/// the caller owns.
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(message_id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;

    let message = queries::messages::get_message_by_id(&mut conn, message_id)
        .await?
        .ok_or_else(|| Error::NotFound("Message not found".to_string()))?;
    let chat = sqlx::query_as::<_, Chat>(
        "SELECT id, session_id, name, user_id, model_provider, model_name, is_deleted, \
         created_at, updated_at FROM chats WHERE id = $1",
    )
    .bind(message.chat_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(Error::Sqlx)?
    .ok_or_else(|| Error::NotFound("Chat not found".to_string()))?;

    if chat.user_id != user.id {
        return Err(Error::Forbidden("Not your message".to_string()));
    }

    let attachments =
        queries::attachments::get_attachments_for_message(&mut conn, message_id).await?;
    for attachment in &attachments {
        let path = state.upload_root().join(&attachment.file_path);
        if path.exists() {
            let _ = tokio::fs::remove_file(&path).await;
        }
    }

    queries::messages::delete_message(&mut conn, message_id).await?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

/// GET /api/export_chat/{session_id}
///
/// Full JSON export of one owned chat: the chat record plus every
/// message in turn order.
pub async fn export_chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let chat = owned_chat(&mut conn, session_id, user.id).await?;
    let messages = queries::messages::get_messages_for_chat(&mut conn, chat.id).await?;

    Ok(Json(serde_json::json!({
        "session_id": chat.session_id,
        "name": chat.name,
        "model_provider": chat.model_provider,
        "model_name": chat.model_name,
        "created_at": chat.created_at,
        "updated_at": chat.updated_at,
        "messages": messages,
    })))
}

/// PUT /api/rename_chat/{session_id}
pub async fn rename_chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<RenameChatRequest>,
) -> Result<Json<serde_json::Value>> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(Error::Validation("Chat name cannot be empty".to_string()));
    }
    if name.len() > 255 {
        return Err(Error::Validation("Chat name is too long".to_string()));
    }

    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let chat = owned_chat(&mut conn, session_id, user.id).await?;
    queries::chats::rename_chat(&mut conn, chat.id, name).await?;

    Ok(Json(serde_json::json!({
        "session_id": session_id,
        "name": name
    })))
}
