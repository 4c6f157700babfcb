use crate::{
    DbConn,
    error::{Error, Result},
    models::users::{NewUser, User},
};

const USER_COLUMNS: &str = "id, username, email, password_hash, is_active, is_admin, \
     twofa_enabled, twofa_secret, date_of_birth, failed_login_attempts, \
     account_locked_until, session_token, created_at, last_login";

/// Inserts a new user row.
pub async fn create_user(conn: &mut DbConn, new_user: NewUser) -> Result<User> {
    let sql = format!(
        "INSERT INTO users (username, email, password_hash, date_of_birth) \
         VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
    );
    let user = sqlx::query_as::<_, User>(&sql)
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(new_user.date_of_birth)
        .fetch_one(conn)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict("Username or email already exists".to_string())
            }
            _ => Error::Sqlx(e),
        })?;

    Ok(user)
}

pub async fn get_user_by_id(conn: &mut DbConn, id: i64) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let user = sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(user)
}

pub async fn get_user_by_username(conn: &mut DbConn, username: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
    let user = sqlx::query_as::<_, User>(&sql)
        .bind(username)
        .fetch_optional(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(user)
}

/// Stores the new session token and stamps last_login. Passing None clears
/// the token (logout / eviction).
pub async fn set_session_token(
    conn: &mut DbConn,
    user_id: i64,
    token: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE users SET session_token = $2, last_login = NOW() WHERE id = $1")
        .bind(user_id)
        .bind(token)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(())
}

pub async fn clear_session_token(conn: &mut DbConn, user_id: i64) -> Result<()> {
    sqlx::query("UPDATE users SET session_token = NULL WHERE id = $1")
        .bind(user_id)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(())
}

pub async fn delete_user(conn: &mut DbConn, user_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(conn)
        .await
        .map_err(Error::Sqlx)?;
    Ok(())
}
