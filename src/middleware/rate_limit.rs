//! Advisory per-route rate limiting.
//!
//! Counters are in-process, keyed by (limit name, user). The per-minute
//! budgets come from the settings store (`rate_limit_<name>`); when the
//! global `rate_limit_enabled` flag is off the hooks pass everything
//! through untouched.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::{
    error::{Error, Result},
    middleware::auth::AuthenticatedUser,
    services::settings,
    state::AppState,
};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Copy)]
struct Window {
    started: Instant,
    count: i64,
}

fn counters() -> &'static scc::HashMap<String, Window> {
    static COUNTERS: OnceLock<scc::HashMap<String, Window>> = OnceLock::new();
    COUNTERS.get_or_init(scc::HashMap::new)
}

/// Record one hit and report whether the caller is over budget.
async fn over_budget(key: String, limit: i64) -> bool {
    let now = Instant::now();
    let map = counters();

    if let Some(over) = map
        .update_async(&key, |_, window| {
            if now.duration_since(window.started) >= WINDOW {
                window.started = now;
                window.count = 0;
            }
            window.count += 1;
            window.count > limit
        })
        .await
    {
        return over;
    }

    let _ = map
        .insert_async(
            key,
            Window {
                started: now,
                count: 1,
            },
        )
        .await;
    1 > limit
}

/// Rate-limit hook for a named route budget. Applied after session auth
/// so the key is per-user.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    limit_name: &'static str,
    request: Request,
    next: Next,
) -> Result<Response> {
    let mut conn = state.pool.acquire().await?;
    if !settings::is_rate_limit_enabled(&mut conn).await {
        return Ok(next.run(request).await);
    }

    let limit = settings::rate_limit(&mut conn, limit_name).await;
    drop(conn);
    if limit <= 0 {
        return Ok(next.run(request).await);
    }

    let user_key = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.id.to_string())
        .unwrap_or_else(|| "anonymous".to_string());
    let key = format!("{}:{}", limit_name, user_key);

    if over_budget(key, limit).await {
        return Err(Error::RateLimitExceeded(format!(
            "Too many requests; the {} limit is {} per minute",
            limit_name, limit
        )));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_budget_window_counts() {
        let key = format!("test:{}", uuid::Uuid::new_v4());
        for _ in 0..5 {
            assert!(!over_budget(key.clone(), 5).await);
        }
        assert!(over_budget(key, 5).await);
    }

    #[tokio::test]
    async fn test_distinct_keys_have_distinct_budgets() {
        let a = format!("test:{}", uuid::Uuid::new_v4());
        let b = format!("test:{}", uuid::Uuid::new_v4());
        assert!(!over_budget(a, 1).await);
        assert!(!over_budget(b, 1).await);
    }
}
