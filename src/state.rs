use crate::config::Config;
use crate::database::DbPool;
use crate::services::crypto::SecretCipher;
use crate::services::embeddings::Embedder;

/// Application state shared across all HTTP handlers
///
/// Holds the process-wide handles: the connection pool, the resolved
/// configuration, the secret cipher, and the shared upstream HTTP client.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Config,
    pub cipher: SecretCipher,
    pub http: reqwest::Client,
    pub embedder: Embedder,
}

impl AppState {
    pub fn new(pool: DbPool, config: Config) -> Self {
        let cipher = SecretCipher::new(&config.security.secret_key);
        let http = reqwest::Client::new();
        let embedder = Embedder::new(http.clone());
        Self {
            pool,
            config,
            cipher,
            http,
            embedder,
        }
    }

    /// Root of the uploads tree; kind-partitioned subdirectories live
    /// below it.
    pub fn upload_root(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(&self.config.uploads.root)
    }
}
