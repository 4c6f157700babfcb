//! Tenant-scoped vector storage over pgvector.
//!
//! Each user's chunks live in rows keyed by `user_id`; the opaque handle
//! is the row UUID. Absent tenants simply query as empty. Distance is the
//! native L2 metric; `similarity = 1 / (1 + distance)`.

use pgvector::Vector;
use sqlx::Connection;
use uuid::Uuid;

use crate::DbConn;
use crate::error::{Error, Result};
use crate::services::chunker::Chunk;

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub handle: Uuid,
    pub content: String,
    pub document_id: i64,
    pub chunk_index: i32,
    pub page_number: Option<i32>,
    pub token_count: i32,
    pub distance: f32,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct TenantStats {
    pub exists: bool,
    pub count: i64,
}

#[derive(sqlx::FromRow)]
struct HitRow {
    id: Uuid,
    content: String,
    document_id: i64,
    chunk_index: i32,
    page_number: Option<i32>,
    token_count: i32,
    distance: f64,
}

/// Insert a document's chunks with their vectors. All rows land or none:
/// the insert runs in its own transaction and returns the generated
/// handles in chunk order.
pub async fn add_chunks(
    conn: &mut DbConn,
    user_id: i64,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
    document_id: i64,
) -> Result<Vec<Uuid>> {
    if chunks.len() != vectors.len() {
        return Err(Error::VectorStore(
            "Chunks and embeddings count mismatch".to_string(),
        ));
    }

    let mut tx = conn.begin().await.map_err(Error::Sqlx)?;
    let mut handles = Vec::with_capacity(chunks.len());

    for (index, (chunk, vector)) in chunks.iter().zip(vectors).enumerate() {
        let handle = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO rag_vectors \
             (id, user_id, document_id, chunk_index, content, dim, embedding, page_number, token_count, start_char, end_char) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(handle)
        .bind(user_id)
        .bind(document_id)
        .bind(index as i32)
        .bind(&chunk.content)
        .bind(vector.len() as i32)
        .bind(Vector::from(vector.clone()))
        .bind(chunk.page_number)
        .bind(chunk.token_count as i32)
        .bind(chunk.start_char as i32)
        .bind(chunk.end_char as i32)
        .execute(tx.as_mut())
        .await
        .map_err(Error::Sqlx)?;
        handles.push(handle);
    }

    tx.commit().await.map_err(Error::Sqlx)?;

    tracing::info!(
        "[VectorStore] Added {} chunks for user {}, document {}",
        handles.len(),
        user_id,
        document_id
    );

    Ok(handles)
}

/// Nearest-neighbor query within a tenant, optionally restricted to a set
/// of documents. Only vectors matching the query's dimensionality are
/// compared. Returns up to `k` hits by ascending distance.
pub async fn query(
    conn: &mut DbConn,
    user_id: i64,
    query_vector: &[f32],
    k: usize,
    document_ids: Option<&[i64]>,
) -> Result<Vec<VectorHit>> {
    let dim = query_vector.len() as i32;

    let rows: Vec<HitRow> = if let Some(ids) = document_ids {
        sqlx::query_as::<_, HitRow>(
            "SELECT id, content, document_id, chunk_index, page_number, token_count, \
             (embedding <-> $2)::float8 AS distance \
             FROM rag_vectors \
             WHERE user_id = $1 AND dim = $3 AND document_id = ANY($4) \
             ORDER BY distance ASC LIMIT $5",
        )
        .bind(user_id)
        .bind(Vector::from(query_vector.to_vec()))
        .bind(dim)
        .bind(ids.to_vec())
        .bind(k as i64)
        .fetch_all(conn)
        .await
        .map_err(Error::Sqlx)?
    } else {
        sqlx::query_as::<_, HitRow>(
            "SELECT id, content, document_id, chunk_index, page_number, token_count, \
             (embedding <-> $2)::float8 AS distance \
             FROM rag_vectors \
             WHERE user_id = $1 AND dim = $3 \
             ORDER BY distance ASC LIMIT $4",
        )
        .bind(user_id)
        .bind(Vector::from(query_vector.to_vec()))
        .bind(dim)
        .bind(k as i64)
        .fetch_all(conn)
        .await
        .map_err(Error::Sqlx)?
    };

    Ok(rows
        .into_iter()
        .map(|row| {
            let distance = row.distance as f32;
            VectorHit {
                handle: row.id,
                content: row.content,
                document_id: row.document_id,
                chunk_index: row.chunk_index,
                page_number: row.page_number,
                token_count: row.token_count,
                distance,
                similarity: 1.0 / (1.0 + distance),
            }
        })
        .collect())
}

/// Remove every vector belonging to one document. Returns the count.
pub async fn delete_document(conn: &mut DbConn, user_id: i64, document_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM rag_vectors WHERE user_id = $1 AND document_id = $2")
        .bind(user_id)
        .bind(document_id)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;

    let deleted = result.rows_affected();
    if deleted > 0 {
        tracing::info!(
            "[VectorStore] Deleted {} vectors for document {}",
            deleted,
            document_id
        );
    }
    Ok(deleted)
}

/// Targeted removal by handle, used to compensate a failed ingestion.
pub async fn delete_by_handles(conn: &mut DbConn, user_id: i64, handles: &[Uuid]) -> Result<()> {
    if handles.is_empty() {
        return Ok(());
    }
    sqlx::query("DELETE FROM rag_vectors WHERE user_id = $1 AND id = ANY($2)")
        .bind(user_id)
        .bind(handles.to_vec())
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(())
}

pub async fn stats(conn: &mut DbConn, user_id: i64) -> Result<TenantStats> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rag_vectors WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(TenantStats {
        exists: count > 0,
        count,
    })
}

/// Remove a user's entire vector set (account deletion cascade).
pub async fn drop_tenant(conn: &mut DbConn, user_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM rag_vectors WHERE user_id = $1")
        .bind(user_id)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_from_distance() {
        let similarity = |d: f32| 1.0 / (1.0 + d);
        assert_eq!(similarity(0.0), 1.0);
        assert!((similarity(1.0) - 0.5).abs() < f32::EPSILON);
        assert!(similarity(3.0) < similarity(1.0));
    }

}
