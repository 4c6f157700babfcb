//! Session-guard middleware.
//!
//! Every authenticated request must present the session cookie holding
//! the user's current token. A stale token (rotated by a newer login)
//! clears nothing server-side; the request is rejected with
//! `SESSION_INVALIDATED` so the client can drop its cookie and re-login.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde::Serialize;

use crate::{
    error::{Error, Result},
    models::users::User,
    services::sessions,
    state::AppState,
};

pub const SESSION_COOKIE: &str = "session_token";

/// Authenticated user attached to request extensions after the guard has
/// accepted the session token.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub date_of_birth: Option<chrono::NaiveDate>,
}

impl From<User> for AuthenticatedUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            is_admin: user.is_admin,
            date_of_birth: user.date_of_birth,
        }
    }
}

impl AuthenticatedUser {
    pub fn age_group(&self) -> crate::models::users::AgeGroup {
        use chrono::Datelike;
        let Some(dob) = self.date_of_birth else {
            return crate::models::users::AgeGroup::Unknown;
        };
        let today = chrono::Utc::now().date_naive();
        let mut age = today.year() - dob.year();
        if (today.month(), today.day()) < (dob.month(), dob.day()) {
            age -= 1;
        }
        match age {
            a if a < 12 => crate::models::users::AgeGroup::Child,
            a if a < 18 => crate::models::users::AgeGroup::Teen,
            _ => crate::models::users::AgeGroup::Adult,
        }
    }
}

/// Session authentication middleware for API routes.
///
/// The cookie value is compared in constant time against the stored
/// token. Requests are rejected when:
/// - no cookie or an empty token is presented (plain 401), or
/// - the token no longer matches the stored one — a newer login rotated
///   it — which returns 401 with `code=SESSION_INVALIDATED`.
pub async fn session_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let cookie_header = headers.get("cookie").and_then(|h| h.to_str().ok());
    let token = cookie_header
        .and_then(|h| extract_cookie_value(h, SESSION_COOKIE))
        .unwrap_or_default();

    if token.is_empty() {
        return Err(Error::Authentication("Authentication required".to_string()));
    }

    let mut conn = state.pool.acquire().await?;
    let user = find_user_by_token(&mut conn, &token).await?;

    let Some(user) = user else {
        // Token exists but matches no stored session: it was rotated by a
        // login elsewhere or cleared by logout.
        return Err(Error::SessionInvalidated(
            "Your session has been signed out because your account logged in elsewhere."
                .to_string(),
        ));
    };

    if !user.is_active {
        return Err(Error::Authentication("Account is disabled".to_string()));
    }

    let authenticated: AuthenticatedUser = user.into();
    request.extensions_mut().insert(authenticated);
    Ok(next.run(request).await)
}

async fn find_user_by_token(
    conn: &mut crate::DbConn,
    token: &str,
) -> Result<Option<User>> {
    // Indexed lookup narrows to the candidate row; the constant-time
    // compare makes the final decision.
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, is_active, is_admin, twofa_enabled, \
         twofa_secret, date_of_birth, failed_login_attempts, account_locked_until, \
         session_token, created_at, last_login \
         FROM users WHERE session_token = $1",
    )
    .bind(token)
    .fetch_optional(conn)
    .await
    .map_err(Error::Sqlx)?;

    Ok(user.filter(|u| sessions::token_matches(u.session_token.as_deref(), token)))
}

/// Admin gate layered on top of session auth.
pub async fn admin_middleware(request: Request, next: Next) -> Result<Response> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| Error::Authentication("Authentication required".to_string()))?;

    if !user.is_admin {
        return Err(Error::Forbidden("Admin privileges required".to_string()));
    }

    Ok(next.run(request).await)
}

/// Extract specific cookie value from Cookie header
fn extract_cookie_value(cookie_str: &str, cookie_name: &str) -> Option<String> {
    cookie_str
        .split(';')
        .map(|s| s.trim())
        .find(|cookie| cookie.starts_with(&format!("{}=", cookie_name)))
        .and_then(|cookie| cookie.split('=').nth(1).map(|s| s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_cookie_value() {
        let cookie_str = "session_token=abc123; theme=dark";
        assert_eq!(
            extract_cookie_value(cookie_str, "session_token"),
            Some("abc123".to_string())
        );
        assert_eq!(
            extract_cookie_value(cookie_str, "theme"),
            Some("dark".to_string())
        );
        assert_eq!(extract_cookie_value(cookie_str, "nonexistent"), None);
    }

    #[test]
    fn test_extract_cookie_value_with_spaces() {
        let cookie_str = "other=x;  session_token=token123";
        assert_eq!(
            extract_cookie_value(cookie_str, "session_token"),
            Some("token123".to_string())
        );
    }

    #[test]
    fn test_extract_cookie_value_empty() {
        let cookie_str = "session_token=; other=value";
        assert_eq!(
            extract_cookie_value(cookie_str, "session_token"),
            Some("".to_string())
        );
    }
}
