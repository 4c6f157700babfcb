use crate::{
    DbConn,
    error::{Error, Result},
    models::chat::{Message, MessageRole, NewMessage},
};

const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, distilled_content, tokens_used, \
     model_used, input_tokens, output_tokens, tokens_estimated, created_at";

/// Inserts a message row for one side of a turn.
pub async fn insert_message(conn: &mut DbConn, new_msg: NewMessage) -> Result<Message> {
    let sql = format!(
        "INSERT INTO messages \
         (chat_id, role, content, model_used, input_tokens, output_tokens, tokens_used, tokens_estimated) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {MESSAGE_COLUMNS}"
    );
    let tokens_used = new_msg.input_tokens.max(new_msg.output_tokens);
    let msg = sqlx::query_as::<_, Message>(&sql)
        .bind(new_msg.chat_id)
        .bind(new_msg.role)
        .bind(&new_msg.content)
        .bind(&new_msg.model_used)
        .bind(new_msg.input_tokens)
        .bind(new_msg.output_tokens)
        .bind(tokens_used)
        .bind(new_msg.tokens_estimated)
        .fetch_one(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(msg)
}

/// Messages of a chat in turn order.
pub async fn get_messages_for_chat(conn: &mut DbConn, chat_id: i64) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = $1 ORDER BY created_at ASC, id ASC"
    );
    let messages = sqlx::query_as::<_, Message>(&sql)
        .bind(chat_id)
        .fetch_all(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(messages)
}

pub async fn get_message_by_id(conn: &mut DbConn, message_id: i64) -> Result<Option<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
    let msg = sqlx::query_as::<_, Message>(&sql)
        .bind(message_id)
        .fetch_optional(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(msg)
}

/// Writes the compressed rewrite used for context substitution.
pub async fn set_distilled_content(
    conn: &mut DbConn,
    message_id: i64,
    distilled: &str,
) -> Result<()> {
    sqlx::query("UPDATE messages SET distilled_content = $2 WHERE id = $1")
        .bind(message_id)
        .bind(distilled)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(())
}

pub async fn delete_message(conn: &mut DbConn, message_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM messages WHERE id = $1")
        .bind(message_id)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(())
}

/// Count of messages with the given role in a chat.
pub async fn count_messages_with_role(
    conn: &mut DbConn,
    chat_id: i64,
    role: MessageRole,
) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE chat_id = $1 AND role = $2")
            .bind(chat_id)
            .bind(role)
            .fetch_one(conn)
            .await
            .map_err(Error::Sqlx)?;
    Ok(count)
}
