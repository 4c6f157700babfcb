//! Text embedding generation across the gemini / openai / local providers.
//!
//! Batch calls preserve input order and return vectors of one uniform
//! dimensionality. Callers that can tolerate provider failure use
//! [`embed_with_fallback`], which walks the gemini -> openai -> local
//! chain.

use serde_json::{Value, json};
use std::str::FromStr;
use std::time::Duration;

use crate::DbConn;
use crate::error::{Error, Result};
use crate::providers::Provider;
use crate::services::crypto::SecretCipher;
use crate::services::settings;

pub const GEMINI_MODEL: &str = "gemini-embedding-001";
pub const GEMINI_DIMENSIONS: usize = 3072;
pub const OPENAI_MODEL: &str = "text-embedding-3-small";
pub const OPENAI_DIMENSIONS: usize = 1536;
pub const LOCAL_MODEL: &str = "all-MiniLM-L12-v2";
pub const LOCAL_DIMENSIONS: usize = 384;

const SINGLE_TIMEOUT: Duration = Duration::from_secs(30);
const BATCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Gemini,
    OpenAi,
    Local,
}

impl EmbeddingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingProvider::Gemini => "gemini",
            EmbeddingProvider::OpenAi => "openai",
            EmbeddingProvider::Local => "local",
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            EmbeddingProvider::Gemini => GEMINI_DIMENSIONS,
            EmbeddingProvider::OpenAi => OPENAI_DIMENSIONS,
            EmbeddingProvider::Local => LOCAL_DIMENSIONS,
        }
    }

    pub fn model_name(&self) -> &'static str {
        match self {
            EmbeddingProvider::Gemini => GEMINI_MODEL,
            EmbeddingProvider::OpenAi => OPENAI_MODEL,
            EmbeddingProvider::Local => LOCAL_MODEL,
        }
    }

    /// Embedder matching a chat provider: OpenAI chats embed with OpenAI,
    /// everything else starts from Gemini.
    pub fn for_chat_provider(provider: Provider) -> Self {
        match provider {
            Provider::OpenAi => EmbeddingProvider::OpenAi,
            _ => EmbeddingProvider::Gemini,
        }
    }
}

impl FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(EmbeddingProvider::Gemini),
            "openai" => Ok(EmbeddingProvider::OpenAi),
            "local" => Ok(EmbeddingProvider::Local),
            other => Err(format!("Unknown embedding provider: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vectors: Vec<Vec<f32>>,
    pub dimensions: usize,
    pub model: String,
}

/// Stateless embedding client. The heavy local model (when compiled in)
/// is initialized lazily and shared process-wide.
#[derive(Clone)]
pub struct Embedder {
    http: reqwest::Client,
}

impl Embedder {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn embed(
        &self,
        provider: EmbeddingProvider,
        api_key: Option<&str>,
        text: &str,
    ) -> Result<(Vec<f32>, String)> {
        if text.trim().is_empty() {
            return Err(Error::Embedding("Empty text provided".to_string()));
        }
        let result = self
            .embed_batch(provider, api_key, std::slice::from_ref(&text.to_string()))
            .await?;
        let vector = result
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("Provider returned no embedding".to_string()))?;
        Ok((vector, result.model))
    }

    pub async fn embed_batch(
        &self,
        provider: EmbeddingProvider,
        api_key: Option<&str>,
        texts: &[String],
    ) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Err(Error::Embedding("No texts provided".to_string()));
        }
        let valid: Vec<&String> = texts.iter().filter(|t| !t.trim().is_empty()).collect();
        if valid.is_empty() {
            return Err(Error::Embedding("All texts were empty".to_string()));
        }

        // One retry on transient failure.
        match self.embed_batch_once(provider, api_key, texts).await {
            Ok(result) => Ok(result),
            Err(first) => {
                tracing::warn!("[Embeddings] {} attempt failed, retrying once: {}", provider.as_str(), first);
                self.embed_batch_once(provider, api_key, texts).await
            }
        }
    }

    async fn embed_batch_once(
        &self,
        provider: EmbeddingProvider,
        api_key: Option<&str>,
        texts: &[String],
    ) -> Result<EmbeddingResult> {
        match provider {
            EmbeddingProvider::Gemini => self.gemini_batch(api_key, texts).await,
            EmbeddingProvider::OpenAi => self.openai_batch(api_key, texts).await,
            EmbeddingProvider::Local => local_batch(texts).await,
        }
    }

    async fn gemini_batch(&self, api_key: Option<&str>, texts: &[String]) -> Result<EmbeddingResult> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Embedding("Gemini API key not configured".to_string()))?;

        let requests: Vec<Value> = texts
            .iter()
            .map(|text| {
                json!({
                    "model": format!("models/{}", GEMINI_MODEL),
                    "content": { "parts": [{ "text": text }] }
                })
            })
            .collect();

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:batchEmbedContents",
            GEMINI_MODEL
        );

        let timeout = if texts.len() > 1 { BATCH_TIMEOUT } else { SINGLE_TIMEOUT };
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .timeout(timeout)
            .json(&json!({ "requests": requests }))
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Gemini embedding failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "Gemini embedding API error {}: {}",
                status.as_u16(),
                details
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Gemini embedding failed: {}", e)))?;

        let vectors: Vec<Vec<f32>> = data["embeddings"]
            .as_array()
            .ok_or_else(|| Error::Embedding("Unexpected Gemini embedding payload".to_string()))?
            .iter()
            .map(|emb| {
                emb["values"]
                    .as_array()
                    .map(|vals| {
                        vals.iter()
                            .filter_map(|v| v.as_f64())
                            .map(|v| v as f32)
                            .collect()
                    })
                    .ok_or_else(|| Error::Embedding("Unexpected Gemini embedding payload".to_string()))
            })
            .collect::<Result<_>>()?;

        let dimensions = vectors.first().map(|v| v.len()).unwrap_or(0);
        Ok(EmbeddingResult {
            vectors,
            dimensions,
            model: GEMINI_MODEL.to_string(),
        })
    }

    async fn openai_batch(&self, api_key: Option<&str>, texts: &[String]) -> Result<EmbeddingResult> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Embedding("OpenAI API key not configured".to_string()))?;

        let timeout = if texts.len() > 1 { BATCH_TIMEOUT } else { SINGLE_TIMEOUT };
        let response = self
            .http
            .post("https://api.openai.com/v1/embeddings")
            .bearer_auth(api_key)
            .timeout(timeout)
            .json(&json!({ "input": texts, "model": OPENAI_MODEL }))
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("OpenAI embedding failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "OpenAI embedding API error {}: {}",
                status.as_u16(),
                details
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("OpenAI embedding failed: {}", e)))?;

        // Responses carry an index per item; sort to restore input order.
        let mut indexed: Vec<(i64, Vec<f32>)> = data["data"]
            .as_array()
            .ok_or_else(|| Error::Embedding("Unexpected OpenAI embedding payload".to_string()))?
            .iter()
            .map(|item| {
                let index = item["index"].as_i64().unwrap_or(0);
                let vector = item["embedding"]
                    .as_array()
                    .map(|vals| {
                        vals.iter()
                            .filter_map(|v| v.as_f64())
                            .map(|v| v as f32)
                            .collect()
                    })
                    .ok_or_else(|| Error::Embedding("Unexpected OpenAI embedding payload".to_string()))?;
                Ok((index, vector))
            })
            .collect::<Result<_>>()?;
        indexed.sort_by_key(|(index, _)| *index);

        let vectors: Vec<Vec<f32>> = indexed.into_iter().map(|(_, v)| v).collect();
        let dimensions = vectors.first().map(|v| v.len()).unwrap_or(0);
        Ok(EmbeddingResult {
            vectors,
            dimensions,
            model: OPENAI_MODEL.to_string(),
        })
    }
}

#[cfg(feature = "local-embeddings")]
async fn local_batch(texts: &[String]) -> Result<EmbeddingResult> {
    use std::sync::{Mutex, OnceLock};

    static MODEL: OnceLock<std::result::Result<Mutex<fastembed::TextEmbedding>, String>> =
        OnceLock::new();

    let texts: Vec<String> = texts.to_vec();
    let vectors = tokio::task::spawn_blocking(move || {
        let model = MODEL.get_or_init(|| {
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML12V2),
            )
            .map(Mutex::new)
            .map_err(|e| format!("Failed to load local embedding model: {}", e))
        });

        let model = model.as_ref().map_err(|e| Error::Embedding(e.clone()))?;
        let mut model = model
            .lock()
            .map_err(|_| Error::Embedding("Local embedding model poisoned".to_string()))?;
        model
            .embed(texts, None)
            .map_err(|e| Error::Embedding(format!("Local embedding failed: {}", e)))
    })
    .await
    .map_err(|e| Error::Embedding(format!("Local embedding task failed: {}", e)))??;

    let dimensions = vectors.first().map(|v| v.len()).unwrap_or(0);
    Ok(EmbeddingResult {
        vectors,
        dimensions,
        model: LOCAL_MODEL.to_string(),
    })
}

#[cfg(not(feature = "local-embeddings"))]
async fn local_batch(_texts: &[String]) -> Result<EmbeddingResult> {
    Err(Error::Embedding(
        "Local embedding model not available. Rebuild with the local-embeddings feature."
            .to_string(),
    ))
}

/// Resolve the API key a given embedding provider needs.
async fn api_key_for(
    conn: &mut DbConn,
    cipher: &SecretCipher,
    provider: EmbeddingProvider,
) -> Result<Option<String>> {
    match provider {
        EmbeddingProvider::Gemini => settings::get_secret(conn, cipher, Provider::Gemini).await,
        EmbeddingProvider::OpenAi => settings::get_secret(conn, cipher, Provider::OpenAi).await,
        EmbeddingProvider::Local => Ok(None),
    }
}

/// Embed with the preferred provider, falling back down the
/// gemini -> openai -> local chain on provider error.
pub async fn embed_with_fallback(
    embedder: &Embedder,
    conn: &mut DbConn,
    cipher: &SecretCipher,
    preferred: EmbeddingProvider,
    texts: &[String],
) -> Result<EmbeddingResult> {
    let mut chain = vec![preferred];
    for candidate in [
        EmbeddingProvider::Gemini,
        EmbeddingProvider::OpenAi,
        EmbeddingProvider::Local,
    ] {
        if !chain.contains(&candidate) {
            chain.push(candidate);
        }
    }

    let mut last_error = Error::Embedding("No embedding provider available".to_string());
    for provider in chain {
        let api_key = api_key_for(conn, cipher, provider).await?;
        match embedder.embed_batch(provider, api_key.as_deref(), texts).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                tracing::warn!(
                    "[Embeddings] {} embedding failed, trying next provider: {}",
                    provider.as_str(),
                    e
                );
                last_error = e;
            }
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_dimensions() {
        assert_eq!(EmbeddingProvider::Gemini.dimensions(), 3072);
        assert_eq!(EmbeddingProvider::OpenAi.dimensions(), 1536);
        assert_eq!(EmbeddingProvider::Local.dimensions(), 384);
    }

    #[test]
    fn test_chat_provider_mapping() {
        assert_eq!(
            EmbeddingProvider::for_chat_provider(Provider::OpenAi),
            EmbeddingProvider::OpenAi
        );
        assert_eq!(
            EmbeddingProvider::for_chat_provider(Provider::Gemini),
            EmbeddingProvider::Gemini
        );
        assert_eq!(
            EmbeddingProvider::for_chat_provider(Provider::Ollama),
            EmbeddingProvider::Gemini
        );
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(
            EmbeddingProvider::from_str("LOCAL").unwrap(),
            EmbeddingProvider::Local
        );
        assert!(EmbeddingProvider::from_str("cohere").is_err());
    }

    #[tokio::test]
    async fn test_empty_batch_is_an_error() {
        let embedder = Embedder::new(reqwest::Client::new());
        let err = embedder
            .embed_batch(EmbeddingProvider::Gemini, Some("key"), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No texts provided"));
    }

    #[tokio::test]
    async fn test_empty_text_is_an_error() {
        let embedder = Embedder::new(reqwest::Client::new());
        let err = embedder
            .embed(EmbeddingProvider::OpenAi, Some("key"), "   ")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Empty text"));
    }

    #[tokio::test]
    async fn test_missing_key_is_an_error() {
        let embedder = Embedder::new(reqwest::Client::new());
        let err = embedder
            .embed_batch(EmbeddingProvider::OpenAi, None, &["hello".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
