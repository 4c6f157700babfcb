use crate::{
    DbConn,
    error::{Error, Result},
    models::chat::Chat,
};
use uuid::Uuid;

const CHAT_COLUMNS: &str = "id, session_id, name, user_id, model_provider, model_name, \
     is_deleted, created_at, updated_at";

/// Creates a new chat container bound to its owning user.
pub async fn create_chat(
    conn: &mut DbConn,
    session_id: Uuid,
    name: &str,
    user_id: i64,
    model_provider: &str,
    model_name: Option<&str>,
) -> Result<Chat> {
    let sql = format!(
        "INSERT INTO chats (session_id, name, user_id, model_provider, model_name) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {CHAT_COLUMNS}"
    );
    let chat = sqlx::query_as::<_, Chat>(&sql)
        .bind(session_id)
        .bind(name)
        .bind(user_id)
        .bind(model_provider)
        .bind(model_name)
        .fetch_one(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(chat)
}

pub async fn get_chat_by_session_id(conn: &mut DbConn, session_id: Uuid) -> Result<Option<Chat>> {
    let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE session_id = $1");
    let chat = sqlx::query_as::<_, Chat>(&sql)
        .bind(session_id)
        .fetch_optional(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(chat)
}

/// Non-deleted chats of a user, most recently updated first.
pub async fn list_chats_for_user(conn: &mut DbConn, user_id: i64) -> Result<Vec<Chat>> {
    let sql = format!(
        "SELECT {CHAT_COLUMNS} FROM chats \
         WHERE user_id = $1 AND is_deleted = FALSE ORDER BY updated_at DESC"
    );
    let chats = sqlx::query_as::<_, Chat>(&sql)
        .bind(user_id)
        .fetch_all(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(chats)
}

pub async fn rename_chat(conn: &mut DbConn, chat_id: i64, name: &str) -> Result<()> {
    sqlx::query("UPDATE chats SET name = $2, updated_at = NOW() WHERE id = $1")
        .bind(chat_id)
        .bind(name)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(())
}

pub async fn touch_chat(conn: &mut DbConn, chat_id: i64) -> Result<()> {
    sqlx::query("UPDATE chats SET updated_at = NOW() WHERE id = $1")
        .bind(chat_id)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(())
}

/// Hard-deletes the chat row; messages and attachments cascade in the
/// database, file artifacts are the caller's responsibility.
pub async fn delete_chat(conn: &mut DbConn, chat_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM chats WHERE id = $1")
        .bind(chat_id)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(())
}
