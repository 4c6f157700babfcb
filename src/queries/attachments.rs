use crate::{
    DbConn,
    error::{Error, Result},
    models::attachments::{Attachment, NewAttachment},
};

const ATTACHMENT_COLUMNS: &str = "id, message_id, original_filename, stored_filename, file_path, \
     mime_type, file_size, file_type, created_at";

pub async fn insert_attachment(conn: &mut DbConn, new_att: NewAttachment) -> Result<Attachment> {
    let sql = format!(
        "INSERT INTO attachments \
         (message_id, original_filename, stored_filename, file_path, mime_type, file_size, file_type) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {ATTACHMENT_COLUMNS}"
    );
    let att = sqlx::query_as::<_, Attachment>(&sql)
        .bind(new_att.message_id)
        .bind(&new_att.original_filename)
        .bind(&new_att.stored_filename)
        .bind(&new_att.file_path)
        .bind(&new_att.mime_type)
        .bind(new_att.file_size)
        .bind(&new_att.file_type)
        .fetch_one(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(att)
}

pub async fn get_attachment_by_id(
    conn: &mut DbConn,
    attachment_id: i64,
) -> Result<Option<Attachment>> {
    let sql = format!("SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE id = $1");
    let att = sqlx::query_as::<_, Attachment>(&sql)
        .bind(attachment_id)
        .fetch_optional(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(att)
}

pub async fn get_attachments_for_message(
    conn: &mut DbConn,
    message_id: i64,
) -> Result<Vec<Attachment>> {
    let sql = format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE message_id = $1 ORDER BY id ASC"
    );
    let atts = sqlx::query_as::<_, Attachment>(&sql)
        .bind(message_id)
        .fetch_all(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(atts)
}

/// All attachments across a chat's messages, used for file cleanup when a
/// chat is deleted.
pub async fn get_attachments_for_chat(conn: &mut DbConn, chat_id: i64) -> Result<Vec<Attachment>> {
    let sql = format!(
        "SELECT a.id, a.message_id, a.original_filename, a.stored_filename, a.file_path, \
         a.mime_type, a.file_size, a.file_type, a.created_at \
         FROM attachments a JOIN messages m ON m.id = a.message_id WHERE m.chat_id = $1"
    );
    let atts = sqlx::query_as::<_, Attachment>(&sql)
        .bind(chat_id)
        .fetch_all(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(atts)
}

pub async fn delete_attachment(conn: &mut DbConn, attachment_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM attachments WHERE id = $1")
        .bind(attachment_id)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(())
}
