use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderValue, header::SET_COOKIE},
    response::{IntoResponse, Response},
};

use crate::{
    error::{Error, Result},
    middleware::auth::{AuthenticatedUser, SESSION_COOKIE},
    models::users::{LoginUser, RegisterUser},
    services::{sessions, users},
    state::AppState,
};

/// Response that carries the session cookie alongside a JSON body.
pub struct SessionResponse {
    json_body: serde_json::Value,
    cookie: String,
}

impl IntoResponse for SessionResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.json_body).into_response();
        if let Ok(cookie) = HeaderValue::from_str(&self.cookie) {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        response
    }
}

fn session_cookie(token: &str, ttl_hours: i64) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE,
        token,
        ttl_hours * 3600
    )
}

fn clear_session_cookie() -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", SESSION_COOKIE)
}

/// POST /auth/register
///
/// Creates a user. Two-factor enrollment and role seeding are separate
/// administrative concerns; registration only establishes the identity.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterUser>,
) -> Result<Json<serde_json::Value>> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let user = users::register_user(&mut conn, request).await?;

    Ok(Json(serde_json::json!({ "user": user })))
}

/// POST /auth/login
///
/// Authenticates and rotates the session token: a successful login on one
/// device invalidates every other device's session.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginUser>,
) -> Result<SessionResponse> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    let (user, token) = sessions::login(&mut conn, request).await?;

    Ok(SessionResponse {
        json_body: serde_json::json!({ "user": user }),
        cookie: session_cookie(&token, state.config.security.session_ttl_hours),
    })
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<SessionResponse> {
    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
    sessions::logout(&mut conn, user.id).await?;

    Ok(SessionResponse {
        json_body: serde_json::json!({ "status": "logged_out" }),
        cookie: clear_session_cookie(),
    })
}

/// GET /api/me
pub async fn me(Extension(user): Extension<AuthenticatedUser>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "user": user }))
}
