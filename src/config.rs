use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use std::fmt;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub uploads: UploadsConfig,
    pub rag: RagConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub user: String,
    #[serde(skip_serializing)]
    pub password: SecretString,
    pub host: String,
    pub port: u16,
    pub database: String,
    /// Maximum connections in the pool (default: 10)
    pub max_connections: u32,
    /// Full connection URL; overrides the individual fields when set
    /// (populated from DATABASE_URL).
    #[serde(default, skip_serializing)]
    pub url: Option<SecretString>,
}

impl Config {
    /// Load configuration from environment variables, with defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            // Override with environment variables using `FIRESIDE` prefix and `__` separator
            // e.g., FIRESIDE__DATABASE__USER="my_user" or FIRESIDE__SECURITY__SECRET_KEY
            .add_source(
                config::Environment::with_prefix("FIRESIDE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let mut config: Config = config.try_deserialize()?;

        // Bare variables recognized for compatibility with conventional
        // deployments; the prefixed form wins only when these are unset.
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = Some(SecretString::from(url));
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(secret) = std::env::var("SECRET_KEY") {
            config.security.secret_key = SecretString::from(secret);
        }
        if let Ok(folder) = std::env::var("UPLOAD_FOLDER") {
            config.uploads.root = folder;
        }
        if let Ok(environment) = std::env::var("APP_ENV") {
            config.server.environment = environment;
        }

        config.validate().map_err(|e| {
            config::ConfigError::Message(format!("Configuration validation failed: {}", e))
        })?;

        Ok(config)
    }

    /// Validates the process secret meets minimum requirements.
    ///
    /// The secret key seals provider API keys at rest, so a weak or default
    /// value silently downgrades every stored credential.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let secret = self.security.secret_key.expose_secret();
        if secret.len() < 32 {
            return Err(format!(
                "FIRESIDE__SECURITY__SECRET_KEY must be at least 32 characters (got {} chars). \
                 Set a strong secret in your .env file or environment.",
                secret.len()
            )
            .into());
        }

        let weak_patterns = ["change-this", "secret", "password", "123456", "example"];
        for pattern in weak_patterns {
            if secret.to_lowercase().contains(pattern) {
                return Err(format!(
                    "FIRESIDE__SECURITY__SECRET_KEY contains weak pattern '{}'. Use a cryptographically random secret.",
                    pattern
                )
                .into());
            }
        }

        Ok(())
    }
}

impl DatabaseConfig {
    /// Constructs the database connection string.
    pub fn connection_string(&self) -> SecretString {
        if let Some(url) = &self.url {
            return url.clone();
        }
        SecretString::from(format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user,
            self.password.expose_secret(),
            self.host,
            self.port,
            self.database
        ))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host address to bind to (default: "0.0.0.0")
    pub host: String,
    /// Port to listen on (default: 3000)
    pub port: u16,
    /// Deployment environment: development, testing, production
    pub environment: String,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Process secret; key-derivation input for sealing stored API keys
    /// (minimum 32 characters).
    #[serde(skip_serializing)]
    pub secret_key: SecretString,
    /// Session token time-to-live in hours (default: 720 = 30 days)
    pub session_ttl_hours: i64,
}

// Custom Debug implementation to redact secrets
impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("secret_key", &"<REDACTED>")
            .field("session_ttl_hours", &self.session_ttl_hours)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadsConfig {
    /// Root directory for uploaded files. Kind-partitioned subdirectories
    /// (images/, documents/, rag_documents/) are created below it.
    pub root: String,
    /// Maximum image attachment size in bytes (default: 10 MiB)
    pub max_image_bytes: u64,
    /// Maximum document size in bytes (default: 20 MiB)
    pub max_document_bytes: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RagConfig {
    /// Default chunk size in tokens
    pub chunk_size: usize,
    /// Default chunk overlap in tokens
    pub chunk_overlap: usize,
    /// Default number of chunks retrieved per query
    pub top_k: usize,
    /// Default minimum similarity score for retrieval hits
    pub min_score: f32,
    /// Default per-user document quota
    pub max_documents_per_user: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: "development".to_string(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        // Require explicit configuration - no weak defaults
        Self {
            secret_key: SecretString::from(String::new()),
            session_ttl_hours: 720,
        }
    }
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            root: "uploads".to_string(),
            max_image_bytes: 10 * 1024 * 1024,
            max_document_bytes: 20 * 1024 * 1024,
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            top_k: 5,
            min_score: 0.7,
            max_documents_per_user: 50,
        }
    }
}

// Default values for the database configuration
impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: "password".to_string().into(),
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            max_connections: 10,
            url: None,
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secrets are skipped by #[serde(skip_serializing)]
        match serde_json::to_string_pretty(&self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "Error serializing config"),
        }
    }
}
