//! Administrative settings API: typed settings CRUD, provider model
//! configuration, and masked API-key management.

use axum::{
    Json,
    extract::{Path, State},
};
use std::str::FromStr;

use crate::{
    error::{Error, Result},
    models::requests::{UpdateApiKeyRequest, UpdateSettingRequest},
    models::settings::{Setting, SettingType, SettingValue},
    providers::Provider,
    services::settings,
    state::AppState,
};

/// GET /api/admin/settings
pub async fn list_settings(State(state): State<AppState>) -> Result<Json<Vec<Setting>>> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let mut all = settings::get_all(&mut conn).await?;
    // Sealed keys never leave the server, even for admins.
    for setting in &mut all {
        if setting.setting_key.starts_with("system_api_key_") {
            setting.setting_value = None;
        }
    }
    Ok(Json(all))
}

/// GET /api/admin/settings/{key}
pub async fn get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>> {
    if key.starts_with("system_api_key_") {
        return Err(Error::Forbidden(
            "API keys are read through the masked endpoint".to_string(),
        ));
    }

    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let value = settings::get(&mut conn, &key)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Setting not found: {}", key)))?;

    Ok(Json(serde_json::json!({
        "setting_key": key,
        "value": value,
    })))
}

/// PUT /api/admin/settings/{key}
pub async fn update_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<UpdateSettingRequest>,
) -> Result<Json<Setting>> {
    if key.starts_with("system_api_key_") {
        return Err(Error::Forbidden(
            "API keys are written through the key endpoint".to_string(),
        ));
    }

    let (value, inferred_type) = match &request.setting_value {
        serde_json::Value::Bool(b) => (SettingValue::Boolean(*b), SettingType::Boolean),
        serde_json::Value::Number(n) if n.is_i64() => (
            SettingValue::Integer(n.as_i64().unwrap_or_default()),
            SettingType::Integer,
        ),
        serde_json::Value::String(s) => (SettingValue::String(s.clone()), SettingType::String),
        other @ (serde_json::Value::Object(_) | serde_json::Value::Array(_)) => {
            (SettingValue::Json(other.clone()), SettingType::Json)
        }
        other => {
            return Err(Error::Validation(format!(
                "Unsupported setting value: {}",
                other
            )));
        }
    };
    let setting_type = request.setting_type.unwrap_or(inferred_type);

    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let setting = settings::set(
        &mut conn,
        &key,
        &value,
        setting_type,
        request.description.as_deref(),
    )
    .await?;

    tracing::info!("[Admin] Setting {} updated", key);
    Ok(Json(setting))
}

/// GET /api/admin/api_keys
///
/// Per-provider key status with a masked preview; plaintext never leaves
/// the settings service.
pub async fn api_key_status(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;

    let mut status = serde_json::Map::new();
    for provider in Provider::ALL {
        if provider.is_local() {
            continue;
        }
        let masked = settings::masked_secret(&mut conn, &state.cipher, provider, 8).await;
        status.insert(
            provider.as_str().to_string(),
            serde_json::json!({
                "configured": !masked.is_empty(),
                "masked": masked,
            }),
        );
    }

    Ok(Json(serde_json::Value::Object(status)))
}

/// DELETE /api/admin/users/{id}
///
/// Destroys a user. Database rows cascade; file and vector artifacts are
/// cleaned up at the application layer first.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    use crate::{queries, services::ingestion, services::vector_store};

    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    if queries::users::get_user_by_id(&mut conn, user_id).await?.is_none() {
        return Err(Error::NotFound("User not found".to_string()));
    }

    // Documents first: vectors, chunk rows, stored files.
    let documents = queries::documents::list_documents_for_user(&mut conn, user_id).await?;
    drop(conn);
    for document in documents {
        if let Err(e) = ingestion::delete_document(&state, user_id, document.id).await {
            tracing::warn!(
                "[Admin] Failed to delete document {} for user {}: {}",
                document.id,
                user_id,
                e
            );
        }
    }

    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    vector_store::drop_tenant(&mut conn, user_id).await?;

    // Attachment files across every chat the user owns.
    let chats = queries::chats::list_chats_for_user(&mut conn, user_id).await?;
    for chat in chats {
        let attachments =
            queries::attachments::get_attachments_for_chat(&mut conn, chat.id).await?;
        for attachment in attachments {
            let path = state.upload_root().join(&attachment.file_path);
            if path.exists() {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
    }

    queries::users::delete_user(&mut conn, user_id).await?;
    tracing::info!("[Admin] Deleted user {}", user_id);

    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

/// PUT /api/admin/api_keys/{provider}
///
/// An empty key deletes the stored secret.
pub async fn update_api_key(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(request): Json<UpdateApiKeyRequest>,
) -> Result<Json<serde_json::Value>> {
    let provider = Provider::from_str(&provider).map_err(Error::Validation)?;
    if provider.is_local() {
        return Err(Error::Validation(format!(
            "Provider '{}' does not use an API key",
            provider
        )));
    }

    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    settings::set_secret(&mut conn, &state.cipher, provider, request.api_key.trim()).await?;

    let masked = settings::masked_secret(&mut conn, &state.cipher, provider, 8).await;
    tracing::info!("[Admin] API key for {} updated", provider);

    Ok(Json(serde_json::json!({
        "provider": provider.as_str(),
        "configured": !masked.is_empty(),
        "masked": masked,
    })))
}
