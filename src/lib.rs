pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod queries;
pub mod services;
pub mod state;
pub mod validation;

pub use config::Config;
pub use database::{DbConn, DbPool};
pub use error::{Error, Result};
pub use middleware::auth::AuthenticatedUser;
pub use state::AppState;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::HeaderName;
use axum::middleware::Next;
use axum::response::Response;
use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post, put},
};
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::middleware::auth::session_auth_middleware;
use crate::middleware::rate_limit::rate_limit_middleware;

/// Load configuration from environment variables
pub fn load_config() -> Result<Config> {
    Ok(Config::load()?)
}

/// Initialize tracing subscriber with environment filter
///
/// The level comes from RUST_LOG, falling back to LOG_LEVEL, then "info".
/// When LOG_FILE is set, output is appended there instead of stderr.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| {
            std::env::var("LOG_LEVEL").map(tracing_subscriber::EnvFilter::new)
        })
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match std::env::var("LOG_FILE").ok().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    }) {
        Some(file) => {
            let file = std::sync::Arc::new(file);
            builder
                .with_ansi(false)
                .with_writer(move || std::sync::Arc::clone(&file))
                .init();
        }
        None => builder.init(),
    }
}

/// Middleware to add request ID to response headers
async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            let id = Uuid::now_v7().to_string();
            if let Ok(value) = id.parse() {
                req.headers_mut()
                    .insert(HeaderName::from_static("x-request-id"), value);
            }
            id
        });

    let mut response = next.run(req).await;
    if let Ok(value) = request_id.parse() {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-request-id"), value);
    }

    response
}

/// Create the application router.
///
/// Route groups:
/// - `/auth/*` — registration and session management
/// - `/api/*` — chat API (session-guarded)
/// - `/api/admin/*` — settings administration (session + admin)
/// - `/documents*` — retrieval document management (session-guarded)
pub fn create_api_router(state: AppState) -> Router<AppState> {
    use handlers::{admin, attachments, auth, chat, chats, documents, health};

    let public = Router::new()
        .route("/health", get(health::health_check))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    // Rate-limit hooks sit inside the session guard so budgets are keyed
    // per user. Each limited route lives on its own sub-router to scope
    // the hook.
    let rate_limited = Router::new()
        .route("/api/chat", post(chat::chat))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            |state: axum::extract::State<AppState>, req: Request, next: Next| {
                rate_limit_middleware(state, "chat", req, next)
            },
        ))
        .merge(
            Router::new()
                .route(
                    "/api/upload_attachment",
                    post(attachments::upload_attachment),
                )
                .route_layer(axum_middleware::from_fn_with_state(
                    state.clone(),
                    |state: axum::extract::State<AppState>, req: Request, next: Next| {
                        rate_limit_middleware(state, "attachment_upload", req, next)
                    },
                )),
        )
        .merge(
            Router::new()
                .route("/documents", post(documents::upload_document))
                .route_layer(axum_middleware::from_fn_with_state(
                    state.clone(),
                    |state: axum::extract::State<AppState>, req: Request, next: Next| {
                        rate_limit_middleware(state, "document_upload", req, next)
                    },
                )),
        );

    let chat_api = Router::new()
        .route("/api/me", get(auth::me))
        .route("/api/history", get(chats::get_history))
        .route("/api/sessions", get(chats::get_sessions))
        .route("/api/delete_chat/{session_id}", delete(chats::delete_chat))
        .route("/api/rename_chat/{session_id}", put(chats::rename_chat))
        .route("/api/export_chat/{session_id}", get(chats::export_chat))
        .route("/api/messages/{id}", delete(chats::delete_message))
        .route(
            "/api/attachments/{id}",
            delete(attachments::delete_attachment),
        )
        .route("/auth/logout", post(auth::logout));

    let documents_api = Router::new()
        .route("/documents", get(documents::list_documents))
        .route("/documents/search", post(documents::search_documents))
        .route("/documents/stats", get(documents::document_stats))
        .route(
            "/documents/{id}",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route(
            "/documents/{id}/reprocess",
            post(documents::reprocess_document),
        );

    let admin_api = Router::new()
        .route("/api/admin/settings", get(admin::list_settings))
        .route(
            "/api/admin/settings/{key}",
            get(admin::get_setting).put(admin::update_setting),
        )
        .route("/api/admin/api_keys", get(admin::api_key_status))
        .route("/api/admin/api_keys/{provider}", put(admin::update_api_key))
        .route("/api/admin/users/{id}", delete(admin::delete_user))
        .route_layer(axum_middleware::from_fn(
            crate::middleware::auth::admin_middleware,
        ));

    let authenticated = rate_limited
        .merge(chat_api)
        .merge(documents_api)
        .merge(admin_api)
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            session_auth_middleware,
        ));

    public
        .merge(authenticated)
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024))
}

/// Create the uploads directory tree.
async fn init_upload_dirs(state: &AppState) -> Result<()> {
    for subdir in ["images", "documents", "rag_documents"] {
        tokio::fs::create_dir_all(state.upload_root().join(subdir)).await?;
    }
    Ok(())
}

/// Start the API server
///
/// Connects the pool, runs migrations, builds the router, and serves
/// until a shutdown signal arrives.
pub async fn run_server(config: Config) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(config.database.connection_string().expose_secret())
        .await
        .map_err(|e| Error::Internal(format!("Failed to connect to database: {}", e)))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| Error::Internal(format!("Failed to run migrations: {}", e)))?;

    let state = AppState::new(pool, config.clone());
    init_upload_dirs(&state).await?;

    let api_routes = create_api_router(state.clone());

    let app = Router::new().merge(api_routes).layer(
        ServiceBuilder::new()
            .layer(axum_middleware::from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(|request: &Request<_>| {
                        let request_id = request
                            .headers()
                            .get("x-request-id")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("unknown");

                        tracing::info_span!(
                            "http_request",
                            method = %request.method(),
                            path = %request.uri().path(),
                            request_id = %request_id,
                        )
                    })
                    .on_request(
                        tower_http::trace::DefaultOnRequest::new().level(tracing::Level::DEBUG),
                    )
                    .on_response(
                        tower_http::trace::DefaultOnResponse::new().level(tracing::Level::DEBUG),
                    ),
            )
            .layer(SetResponseHeaderLayer::if_not_present(
                axum::http::header::X_CONTENT_TYPE_OPTIONS,
                axum::http::HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                axum::http::header::X_FRAME_OPTIONS,
                axum::http::HeaderValue::from_static("DENY"),
            ))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(CompressionLayer::new()),
    )
    .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        "API server listening on http://{} ({})",
        addr,
        config.server.environment
    );

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install CTRL+C handler: {}", e);
        }
        tracing::info!("Shutdown signal received");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}
