//! Single-active-session enforcement.
//!
//! A user has at most one valid session token; login rotates it, which
//! invalidates every other device's cookie on its next request.

use rand::Rng;
use subtle::ConstantTimeEq;

use crate::DbConn;
use crate::error::{Error, Result};
use crate::models::users::{LoginUser, User};
use crate::queries;
use crate::services::users::verify_password;

/// 64-character hex session token.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

/// Constant-time comparison of a presented token against the stored one.
pub fn token_matches(stored: Option<&str>, presented: &str) -> bool {
    match stored {
        Some(stored) if !stored.is_empty() && !presented.is_empty() => {
            stored.as_bytes().ct_eq(presented.as_bytes()).into()
        }
        _ => false,
    }
}

/// Authenticate and rotate the session token.
pub async fn login(conn: &mut DbConn, request: LoginUser) -> Result<(User, String)> {
    let user = queries::users::get_user_by_username(conn, request.username.trim())
        .await?
        .ok_or_else(|| Error::Authentication("Invalid username or password".to_string()))?;

    if !user.is_active {
        return Err(Error::Authentication("Account is disabled".to_string()));
    }

    if !verify_password(&request.password, &user.password_hash)? {
        return Err(Error::Authentication(
            "Invalid username or password".to_string(),
        ));
    }

    let token = generate_token();
    queries::users::set_session_token(conn, user.id, Some(&token)).await?;

    tracing::info!("[Sessions] User {} logged in, session rotated", user.id);
    Ok((user, token))
}

/// Clear the stored token; any outstanding cookie becomes invalid.
pub async fn logout(conn: &mut DbConn, user_id: i64) -> Result<()> {
    queries::users::clear_session_token(conn, user_id).await?;
    tracing::info!("[Sessions] User {} logged out", user_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_token_matches() {
        assert!(token_matches(Some("abc123"), "abc123"));
        assert!(!token_matches(Some("abc123"), "abc124"));
        assert!(!token_matches(Some(""), ""));
        assert!(!token_matches(None, "abc123"));
        assert!(!token_matches(Some("abc123"), ""));
    }
}
