use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
};

use crate::{
    error::{Error, Result},
    middleware::auth::AuthenticatedUser,
    models::documents::Document,
    models::requests::DocumentSearchRequest,
    queries,
    services::{chat as chat_service, ingestion, vector_store},
    state::AppState,
};

/// GET /documents
pub async fn list_documents(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<Document>>> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let documents = queries::documents::list_documents_for_user(&mut conn, user.id).await?;
    Ok(Json(documents))
}

/// POST /documents (multipart)
///
/// Upload succeeds as soon as the document row exists; processing errors
/// surface through the returned document's status, which the client
/// polls.
pub async fn upload_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let mut filename: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;
    let mut project_id: Option<i64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().map(String::from);
        match name.as_deref() {
            Some("file") => {
                filename = field.file_name().map(String::from);
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| Error::Validation(format!("Failed to read upload: {}", e)))?
                        .to_vec(),
                );
            }
            Some("project_id") => {
                project_id = field.text().await.ok().and_then(|v| v.parse().ok());
            }
            _ => {}
        }
    }

    let filename = filename.ok_or_else(|| Error::Validation("No file provided".to_string()))?;
    let bytes = bytes.ok_or_else(|| Error::Validation("No file provided".to_string()))?;

    let document = ingestion::upload(&state, user.id, &filename, &bytes, project_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "document_id": document.id,
            "status": document.status,
            "chunk_count": document.chunk_count,
            "total_tokens": document.total_tokens,
            "error_message": document.error_message,
        })),
    ))
}

/// GET /documents/{id}
pub async fn get_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(document_id): Path<i64>,
) -> Result<Json<Document>> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let document = queries::documents::get_document_by_id(&mut conn, document_id)
        .await?
        .ok_or_else(|| Error::NotFound("Document not found".to_string()))?;
    if document.user_id != user.id {
        return Err(Error::Forbidden("Not your document".to_string()));
    }
    Ok(Json(document))
}

/// DELETE /documents/{id}
pub async fn delete_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(document_id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    ingestion::delete_document(&state, user.id, document_id).await?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

/// POST /documents/{id}/reprocess
pub async fn reprocess_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(document_id): Path<i64>,
) -> Result<Json<Document>> {
    let document = ingestion::reprocess(&state, user.id, document_id).await?;
    Ok(Json(document))
}

/// POST /documents/search
pub async fn search_documents(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<DocumentSearchRequest>,
) -> Result<Json<serde_json::Value>> {
    if request.query.trim().is_empty() {
        return Err(Error::Validation("Query cannot be empty".to_string()));
    }

    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let chunks = chat_service::retrieve_context(
        &state,
        &mut conn,
        user.id,
        &request.query,
        None,
        request.top_k,
        request.min_score,
        request.document_ids.as_deref(),
    )
    .await?;

    Ok(Json(serde_json::json!({
        "query": request.query,
        "results": chunks,
    })))
}

/// GET /documents/stats
pub async fn document_stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let documents = queries::documents::list_documents_for_user(&mut conn, user.id).await?;
    let stats = vector_store::stats(&mut conn, user.id).await?;

    let ready = documents
        .iter()
        .filter(|d| d.status == crate::models::documents::DocumentStatus::Ready)
        .count();
    let total_tokens: i64 = documents.iter().map(|d| d.total_tokens as i64).sum();

    Ok(Json(serde_json::json!({
        "document_count": documents.len(),
        "ready_count": ready,
        "total_tokens": total_tokens,
        "vector_store": {
            "exists": stats.exists,
            "count": stats.count,
        }
    })))
}
