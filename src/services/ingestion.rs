//! Document ingestion pipeline: extract -> chunk -> embed -> store.
//!
//! Every failure short-circuits, writes its message onto the document row,
//! and leaves the document in `failed`; no partial-ready documents are
//! observable. Vector insertions are compensated with a targeted handle
//! delete if the chunk rows cannot be persisted afterwards.

use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::documents::{Document, DocumentStatus, NewDocument, NewDocumentChunk};
use crate::queries;
use crate::services::chunker;
use crate::services::embeddings::{self, EmbeddingProvider};
use crate::services::extractor;
use crate::services::settings;
use crate::services::vector_store;
use crate::state::AppState;
use crate::validation;

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub chunk_count: usize,
    pub total_tokens: i64,
}

/// Validate, persist and immediately process an uploaded RAG document.
///
/// The optional project id is accepted for forward compatibility and
/// ignored. Processing errors do not fail the upload; they are visible on
/// the returned document's status.
pub async fn upload(
    state: &AppState,
    user_id: i64,
    original_filename: &str,
    bytes: &[u8],
    _project_id: Option<i64>,
) -> Result<Document> {
    let original_filename = validation::sanitize_filename(original_filename);
    let ext = validation::validate_rag_extension(&original_filename)?;

    if bytes.is_empty() {
        return Err(Error::Validation("No file provided".to_string()));
    }
    if bytes.len() as u64 > state.config.uploads.max_document_bytes {
        return Err(Error::Validation(format!(
            "Document exceeds maximum size of {} bytes",
            state.config.uploads.max_document_bytes
        )));
    }

    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;

    // Quota check before any disk write.
    let rag = settings::rag_settings(&mut conn, &state.config.rag).await;
    if !rag.enabled {
        return Err(Error::Validation("RAG is disabled".to_string()));
    }
    let current = queries::documents::count_documents_for_user(&mut conn, user_id).await?;
    if current >= rag.max_documents_per_user {
        return Err(Error::Validation(format!(
            "Maximum document limit reached ({})",
            rag.max_documents_per_user
        )));
    }

    let stored_filename = format!("{}.{}", Uuid::new_v4(), ext);
    let relative_path = format!("rag_documents/{}", stored_filename);
    let dir = state.upload_root().join("rag_documents");
    tokio::fs::create_dir_all(&dir).await?;
    let full_path = dir.join(&stored_filename);
    tokio::fs::write(&full_path, bytes).await?;

    let document = queries::documents::create_document(
        &mut conn,
        NewDocument {
            user_id,
            original_filename: original_filename.clone(),
            stored_filename,
            file_path: relative_path,
            mime_type: validation::mime_from_extension(&original_filename).to_string(),
            file_size: bytes.len() as i64,
            file_type: ext,
        },
    )
    .await?;

    tracing::info!(
        "[Ingestion] Saved document {}: {}",
        document.id,
        document.original_filename
    );
    drop(conn);

    if let Err(e) = process(state, document.id).await {
        tracing::warn!("[Ingestion] Processing document {} failed: {}", document.id, e);
    }

    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    queries::documents::get_document_by_id(&mut conn, document.id)
        .await?
        .ok_or_else(|| Error::NotFound("Document disappeared during processing".to_string()))
}

/// Drive a document through pending -> processing -> (ready | failed).
pub async fn process(state: &AppState, document_id: i64) -> Result<ProcessOutcome> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;

    let document = queries::documents::get_document_by_id(&mut conn, document_id)
        .await?
        .ok_or_else(|| Error::NotFound("Document not found".to_string()))?;

    queries::documents::mark_processing(&mut conn, document_id).await?;

    match run_pipeline(state, &mut conn, &document).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            let message = e.to_string();
            queries::documents::mark_failed(&mut conn, document_id, &message).await?;
            Err(Error::Processing(message))
        }
    }
}

async fn run_pipeline(
    state: &AppState,
    conn: &mut crate::DbConn,
    document: &Document,
) -> Result<ProcessOutcome> {
    // Step 1: settings.
    let rag = settings::rag_settings(conn, &state.config.rag).await;
    let embedding_provider = EmbeddingProvider::from_str(&rag.embedding_provider)
        .unwrap_or(EmbeddingProvider::Gemini);

    // Step 2: extract.
    tracing::info!(
        "[Ingestion] Extracting text from document {}: {}",
        document.id,
        document.original_filename
    );
    let path: PathBuf = state.upload_root().join(&document.file_path);
    let file_type = document.file_type.clone();
    let extraction = tokio::task::spawn_blocking(move || extractor::extract(&path, &file_type))
        .await
        .map_err(|e| Error::Processing(format!("Extraction task failed: {}", e)))?;

    if let Some(error) = extraction.error {
        return Err(Error::Processing(format!("Extraction failed: {}", error)));
    }
    if extraction.text.trim().is_empty() {
        return Err(Error::Processing(
            "No text content in document".to_string(),
        ));
    }

    // Step 3: chunk.
    tracing::info!("[Ingestion] Chunking document {}", document.id);
    let pages = (!extraction.pages.is_empty()).then_some(extraction.pages.as_slice());
    let chunks = chunker::chunk_document(&extraction.text, rag.chunk_size, rag.chunk_overlap, pages);
    if chunks.is_empty() {
        return Err(Error::Processing("No chunks created".to_string()));
    }

    // Step 4: embed; the vector count must mirror the chunk count.
    tracing::info!(
        "[Ingestion] Generating embeddings for {} chunks",
        chunks.len()
    );
    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let embedding = embeddings::embed_with_fallback(
        &state.embedder,
        conn,
        &state.cipher,
        embedding_provider,
        &texts,
    )
    .await
    .map_err(|e| Error::Processing(format!("Embedding failed: {}", e)))?;

    if embedding.vectors.len() != chunks.len() {
        return Err(Error::Processing("Embedding count mismatch".to_string()));
    }

    // Step 5: vector store.
    tracing::info!(
        "[Ingestion] Storing {} chunks in vector store",
        chunks.len()
    );
    let handles = vector_store::add_chunks(
        conn,
        document.user_id,
        &chunks,
        &embedding.vectors,
        document.id,
    )
    .await
    .map_err(|e| Error::Processing(format!("Vector store failed: {}", e)))?;

    // Step 6: chunk rows, one transaction. A failure here must also undo
    // step 5 so no orphan vectors survive.
    tracing::info!("[Ingestion] Saving {} chunks to database", chunks.len());
    let mut total_tokens: i64 = 0;
    let persist_result = persist_chunks(conn, document.id, &chunks, &handles, &mut total_tokens).await;

    if let Err(e) = persist_result {
        if let Err(cleanup) = vector_store::delete_by_handles(conn, document.user_id, &handles).await
        {
            tracing::error!(
                "[Ingestion] Failed to roll back vectors for document {}: {}",
                document.id,
                cleanup
            );
        }
        return Err(e);
    }

    // Step 7: terminal ready.
    queries::documents::mark_ready(
        conn,
        document.id,
        chunks.len() as i32,
        total_tokens as i32,
        &embedding.model,
    )
    .await?;

    tracing::info!(
        "[Ingestion] Successfully processed document {}: {} chunks, {} tokens",
        document.id,
        chunks.len(),
        total_tokens
    );

    Ok(ProcessOutcome {
        chunk_count: chunks.len(),
        total_tokens,
    })
}

async fn persist_chunks(
    conn: &mut crate::DbConn,
    document_id: i64,
    chunks: &[chunker::Chunk],
    handles: &[Uuid],
    total_tokens: &mut i64,
) -> Result<()> {
    use sqlx::Connection;

    let mut tx = conn.begin().await.map_err(Error::Sqlx)?;
    for (index, (chunk, handle)) in chunks.iter().zip(handles).enumerate() {
        queries::documents::insert_chunk(
            tx.as_mut(),
            NewDocumentChunk {
                document_id,
                chunk_index: index as i32,
                content: chunk.content.clone(),
                token_count: chunk.token_count as i32,
                start_char: Some(chunk.start_char as i32),
                end_char: Some(chunk.end_char as i32),
                page_number: chunk.page_number,
                chroma_id: *handle,
            },
        )
        .await?;
        *total_tokens += chunk.token_count as i64;
    }
    tx.commit().await.map_err(Error::Sqlx)?;
    Ok(())
}

/// Re-drive a failed (or stuck) document through the pipeline.
pub async fn reprocess(state: &AppState, user_id: i64, document_id: i64) -> Result<Document> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let document = queries::documents::get_document_by_id(&mut conn, document_id)
        .await?
        .ok_or_else(|| Error::NotFound("Document not found".to_string()))?;
    if document.user_id != user_id {
        return Err(Error::Forbidden("Not your document".to_string()));
    }

    // Clear previous derived state before re-running.
    vector_store::delete_document(&mut conn, user_id, document_id).await?;
    queries::documents::delete_chunks_for_document(&mut conn, document_id).await?;
    drop(conn);

    if let Err(e) = process(state, document_id).await {
        tracing::warn!(
            "[Ingestion] Reprocessing document {} failed: {}",
            document_id,
            e
        );
    }

    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    queries::documents::get_document_by_id(&mut conn, document_id)
        .await?
        .ok_or_else(|| Error::NotFound("Document not found".to_string()))
}

/// Delete a document and all derived artifacts: vectors, chunk rows, the
/// stored file, and finally the row itself.
pub async fn delete_document(state: &AppState, user_id: i64, document_id: i64) -> Result<()> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let document = queries::documents::get_document_by_id(&mut conn, document_id)
        .await?
        .ok_or_else(|| Error::NotFound("Document not found".to_string()))?;
    if document.user_id != user_id {
        return Err(Error::Forbidden("Not your document".to_string()));
    }

    vector_store::delete_document(&mut conn, user_id, document_id).await?;

    let path = state.upload_root().join(&document.file_path);
    if path.exists() {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("[Ingestion] Failed to remove file {}: {}", path.display(), e);
        }
    }

    queries::documents::delete_document(&mut conn, document_id).await?;
    tracing::info!("[Ingestion] Deleted document {}", document_id);
    Ok(())
}

/// Whether a document satisfies the ready-state invariant: SQL chunk rows
/// and stored vectors both match the recorded chunk count.
pub async fn verify_ready_invariant(state: &AppState, document: &Document) -> Result<bool> {
    if document.status != DocumentStatus::Ready {
        return Ok(true);
    }
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let chunk_rows =
        queries::documents::count_chunks_for_document(&mut conn, document.id).await?;
    Ok(chunk_rows == document.chunk_count as i64)
}
