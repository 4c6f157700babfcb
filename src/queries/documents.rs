use crate::{
    DbConn,
    error::{Error, Result},
    models::documents::{Document, DocumentChunk, DocumentStatus, NewDocument, NewDocumentChunk},
};

const DOCUMENT_COLUMNS: &str = "id, user_id, original_filename, stored_filename, file_path, \
     mime_type, file_size, file_type, status, error_message, chunk_count, total_tokens, \
     embedding_model, created_at, updated_at, processed_at";

const CHUNK_COLUMNS: &str = "id, document_id, chunk_index, content, token_count, start_char, \
     end_char, page_number, chroma_id, created_at";

pub async fn create_document(conn: &mut DbConn, new_doc: NewDocument) -> Result<Document> {
    let sql = format!(
        "INSERT INTO documents \
         (user_id, original_filename, stored_filename, file_path, mime_type, file_size, file_type) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {DOCUMENT_COLUMNS}"
    );
    let doc = sqlx::query_as::<_, Document>(&sql)
        .bind(new_doc.user_id)
        .bind(&new_doc.original_filename)
        .bind(&new_doc.stored_filename)
        .bind(&new_doc.file_path)
        .bind(&new_doc.mime_type)
        .bind(new_doc.file_size)
        .bind(&new_doc.file_type)
        .fetch_one(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(doc)
}

pub async fn get_document_by_id(conn: &mut DbConn, document_id: i64) -> Result<Option<Document>> {
    let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1");
    let doc = sqlx::query_as::<_, Document>(&sql)
        .bind(document_id)
        .fetch_optional(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(doc)
}

pub async fn list_documents_for_user(conn: &mut DbConn, user_id: i64) -> Result<Vec<Document>> {
    let sql = format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE user_id = $1 ORDER BY created_at DESC"
    );
    let docs = sqlx::query_as::<_, Document>(&sql)
        .bind(user_id)
        .fetch_all(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(docs)
}

pub async fn count_documents_for_user(conn: &mut DbConn, user_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(count)
}

pub async fn count_ready_documents_for_user(conn: &mut DbConn, user_id: i64) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE user_id = $1 AND status = $2")
            .bind(user_id)
            .bind(DocumentStatus::Ready)
            .fetch_one(conn)
            .await
            .map_err(Error::Sqlx)?;
    Ok(count)
}

/// Moves the document into `processing`, clearing any previous error.
pub async fn mark_processing(conn: &mut DbConn, document_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE documents SET status = $2, error_message = NULL, updated_at = NOW() WHERE id = $1",
    )
    .bind(document_id)
    .bind(DocumentStatus::Processing)
    .execute(conn)
    .await
    .map_err(Error::Sqlx)?;
    Ok(())
}

/// Terminal success: records chunk/token counts and the embedding model.
pub async fn mark_ready(
    conn: &mut DbConn,
    document_id: i64,
    chunk_count: i32,
    total_tokens: i32,
    embedding_model: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE documents SET status = $2, chunk_count = $3, total_tokens = $4, \
         embedding_model = $5, error_message = NULL, processed_at = NOW(), updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(document_id)
    .bind(DocumentStatus::Ready)
    .bind(chunk_count)
    .bind(total_tokens)
    .bind(embedding_model)
    .execute(conn)
    .await
    .map_err(Error::Sqlx)?;
    Ok(())
}

/// Terminal failure: persists the error string for the status endpoint.
pub async fn mark_failed(conn: &mut DbConn, document_id: i64, error_message: &str) -> Result<()> {
    sqlx::query(
        "UPDATE documents SET status = $2, error_message = $3, updated_at = NOW() WHERE id = $1",
    )
    .bind(document_id)
    .bind(DocumentStatus::Failed)
    .bind(error_message)
    .execute(conn)
    .await
    .map_err(Error::Sqlx)?;
    Ok(())
}

pub async fn delete_document(conn: &mut DbConn, document_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM documents WHERE id = $1")
        .bind(document_id)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(())
}

pub async fn insert_chunk(conn: &mut DbConn, chunk: NewDocumentChunk) -> Result<DocumentChunk> {
    let sql = format!(
        "INSERT INTO document_chunks \
         (document_id, chunk_index, content, token_count, start_char, end_char, page_number, chroma_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {CHUNK_COLUMNS}"
    );
    let row = sqlx::query_as::<_, DocumentChunk>(&sql)
        .bind(chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.content)
        .bind(chunk.token_count)
        .bind(chunk.start_char)
        .bind(chunk.end_char)
        .bind(chunk.page_number)
        .bind(chunk.chroma_id)
        .fetch_one(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(row)
}

pub async fn get_chunks_for_document(
    conn: &mut DbConn,
    document_id: i64,
) -> Result<Vec<DocumentChunk>> {
    let sql = format!(
        "SELECT {CHUNK_COLUMNS} FROM document_chunks WHERE document_id = $1 ORDER BY chunk_index ASC"
    );
    let chunks = sqlx::query_as::<_, DocumentChunk>(&sql)
        .bind(document_id)
        .fetch_all(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(chunks)
}

pub async fn count_chunks_for_document(conn: &mut DbConn, document_id: i64) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE document_id = $1")
            .bind(document_id)
            .fetch_one(conn)
            .await
            .map_err(Error::Sqlx)?;
    Ok(count)
}

pub async fn delete_chunks_for_document(conn: &mut DbConn, document_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
        .bind(document_id)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(result.rows_affected())
}
