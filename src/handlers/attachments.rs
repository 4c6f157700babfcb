use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    middleware::auth::AuthenticatedUser,
    models::attachments::AttachmentKind,
    models::requests::AttachmentMeta,
    queries,
    state::AppState,
    validation,
};

/// POST /api/upload_attachment (multipart)
///
/// Stores the file under the kind-partitioned uploads tree and returns
/// the metadata the client echoes back on its next chat turn. The
/// attachment row itself is created when the message is persisted.
pub async fn upload_attachment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AttachmentMeta>)> {
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(String::from);
            content_type = field.content_type().map(String::from);
            bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("Failed to read upload: {}", e)))?
                    .to_vec(),
            );
        }
    }

    let filename = filename.ok_or_else(|| Error::Validation("No file provided".to_string()))?;
    let bytes = bytes.ok_or_else(|| Error::Validation("No file provided".to_string()))?;
    let original_filename = validation::sanitize_filename(&filename);
    let mime_type = content_type
        .filter(|ct| ct != "application/octet-stream")
        .unwrap_or_else(|| validation::mime_from_extension(&original_filename).to_string());

    validation::validate_attachment_upload(
        &mime_type,
        bytes.len() as u64,
        state.config.uploads.max_image_bytes,
        state.config.uploads.max_document_bytes,
    )?;

    let kind = AttachmentKind::from_mime(&mime_type);
    let subdir = match kind {
        AttachmentKind::Image => "images",
        _ => "documents",
    };

    let ext = validation::file_extension(&original_filename)
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    let stored_filename = format!("{}{}", Uuid::new_v4(), ext);
    let relative_path = format!("{}/{}", subdir, stored_filename);

    let dir = state.upload_root().join(subdir);
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(dir.join(&stored_filename), &bytes).await?;

    tracing::info!(
        "[Attachments] User {} uploaded {} ({} bytes)",
        user.id,
        original_filename,
        bytes.len()
    );

    Ok((
        StatusCode::CREATED,
        Json(AttachmentMeta {
            original_filename,
            stored_filename,
            file_path: relative_path,
            mime_type,
            file_size: bytes.len() as i64,
            file_type: kind.as_str().to_string(),
        }),
    ))
}

/// DELETE /api/attachments/{id}
pub async fn delete_attachment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(attachment_id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;

    let attachment = queries::attachments::get_attachment_by_id(&mut conn, attachment_id)
        .await?
        .ok_or_else(|| Error::NotFound("Attachment not found".to_string()))?;

    // Ownership chain: attachment -> message -> chat -> user.
    let message = queries::messages::get_message_by_id(&mut conn, attachment.message_id)
        .await?
        .ok_or_else(|| Error::NotFound("Message not found".to_string()))?;
    let chat = sqlx::query_as::<_, crate::models::chat::Chat>(
        "SELECT id, session_id, name, user_id, model_provider, model_name, is_deleted, \
         created_at, updated_at FROM chats WHERE id = $1",
    )
    .bind(message.chat_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(Error::Sqlx)?
    .ok_or_else(|| Error::NotFound("Chat not found".to_string()))?;

    if chat.user_id != user.id {
        return Err(Error::Forbidden("Not your attachment".to_string()));
    }

    let path = state.upload_root().join(&attachment.file_path);
    if path.exists() {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(
                "[Attachments] Failed to remove file {}: {}",
                path.display(),
                e
            );
        }
    }

    queries::attachments::delete_attachment(&mut conn, attachment_id).await?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}
