//! Typed configuration store with an encrypted-secret subset.
//!
//! Reads never fail the caller: a missing row, a type mismatch, or a
//! decrypt failure all degrade to the requested default (logging where it
//! matters). Provider API keys are sealed by [`SecretCipher`] before they
//! touch a row; callers only ever see plaintext or a masked form.

use crate::DbConn;
use crate::config::RagConfig;
use crate::error::Result;
use crate::models::settings::{Setting, SettingType, SettingValue};
use crate::models::users::AgeGroup;
use crate::providers::Provider;
use crate::queries;
use crate::services::crypto::{SecretCipher, mask_secret};

// ---- Generic typed access ----

pub async fn get(conn: &mut DbConn, key: &str) -> Result<Option<SettingValue>> {
    let setting = queries::settings::get_setting(conn, key).await?;
    Ok(setting.and_then(|s| {
        s.setting_value
            .map(|raw| SettingValue::from_stored(&raw, s.setting_type))
    }))
}

pub async fn set(
    conn: &mut DbConn,
    key: &str,
    value: &SettingValue,
    setting_type: SettingType,
    description: Option<&str>,
) -> Result<Setting> {
    queries::settings::upsert_setting(conn, key, &value.to_stored(), setting_type, description)
        .await
}

pub async fn get_all(conn: &mut DbConn) -> Result<Vec<Setting>> {
    queries::settings::list_settings(conn).await
}

pub async fn get_bool(conn: &mut DbConn, key: &str, default: bool) -> bool {
    match get(conn, key).await {
        Ok(Some(value)) => value.as_bool().unwrap_or(default),
        _ => default,
    }
}

pub async fn get_i64(conn: &mut DbConn, key: &str, default: i64) -> i64 {
    match get(conn, key).await {
        Ok(Some(value)) => value.as_i64().unwrap_or(default),
        _ => default,
    }
}

pub async fn get_string(conn: &mut DbConn, key: &str) -> Option<String> {
    match get(conn, key).await {
        Ok(Some(SettingValue::String(s))) if !s.is_empty() => Some(s),
        _ => None,
    }
}

/// Float knobs are stored in string form.
pub async fn get_f32(conn: &mut DbConn, key: &str, default: f32) -> f32 {
    match get_string(conn, key).await {
        Some(raw) => raw.parse().unwrap_or(default),
        None => default,
    }
}

// ---- Feature flags ----

pub async fn is_sensitive_filter_enabled(conn: &mut DbConn) -> bool {
    get_bool(conn, "sensitive_info_filter_enabled", false).await
}

pub async fn is_distilled_context_enabled(conn: &mut DbConn) -> bool {
    get_bool(conn, "distilled_context_enabled", false).await
}

pub async fn is_child_safety_enabled(conn: &mut DbConn) -> bool {
    get_bool(conn, "child_safety_enabled", true).await
}

pub async fn is_vision_enabled(conn: &mut DbConn, provider: Provider) -> bool {
    match provider {
        Provider::LmStudio => get_bool(conn, "lm_studio_vision_capable", false).await,
        Provider::Ollama => get_bool(conn, "ollama_vision_capable", false).await,
        _ => true,
    }
}

// ---- Child safety prompts ----

pub async fn age_based_system_prompt(conn: &mut DbConn, age_group: AgeGroup) -> Option<String> {
    if !is_child_safety_enabled(conn).await {
        return None;
    }
    match age_group {
        AgeGroup::Child => get_string(conn, "child_system_prompt").await,
        AgeGroup::Teen => get_string(conn, "teen_system_prompt").await,
        AgeGroup::Adult | AgeGroup::Unknown => None,
    }
}

// ---- Provider model configuration ----

pub async fn system_model_id(conn: &mut DbConn, provider: Provider) -> String {
    let key = format!("system_model_id_{}", provider.as_str());
    get_string(conn, &key)
        .await
        .unwrap_or_else(|| provider.default_model_id().to_string())
}

pub async fn local_model_url(conn: &mut DbConn, provider: Provider) -> String {
    let key = format!("system_model_url_{}", provider.as_str());
    get_string(conn, &key)
        .await
        .unwrap_or_else(|| provider.default_local_url().to_string())
}

// ---- Secret API ----

fn api_key_setting(provider: Provider) -> String {
    format!("system_api_key_{}", provider.as_str())
}

/// Store a provider API key, sealed. An empty plaintext deletes the key.
pub async fn set_secret(
    conn: &mut DbConn,
    cipher: &SecretCipher,
    provider: Provider,
    plaintext: &str,
) -> Result<()> {
    let key = api_key_setting(provider);
    if plaintext.is_empty() {
        queries::settings::delete_setting(conn, &key).await?;
        return Ok(());
    }

    let sealed = cipher.seal(plaintext)?;
    queries::settings::upsert_setting(
        conn,
        &key,
        &sealed,
        SettingType::String,
        Some("Encrypted provider API key"),
    )
    .await?;
    Ok(())
}

/// Fetch and unseal a provider API key. Decrypt failures log and read as
/// absent; raw ciphertext never leaves this module.
pub async fn get_secret(
    conn: &mut DbConn,
    cipher: &SecretCipher,
    provider: Provider,
) -> Result<Option<String>> {
    let key = api_key_setting(provider);
    let Some(sealed) = get_string(conn, &key).await else {
        return Ok(None);
    };

    match cipher.open(&sealed) {
        Ok(plaintext) if !plaintext.is_empty() => Ok(Some(plaintext)),
        Ok(_) => Ok(None),
        Err(e) => {
            tracing::error!("[Settings] Failed to decrypt API key for {}: {}", provider, e);
            Ok(None)
        }
    }
}

pub async fn has_secret(conn: &mut DbConn, cipher: &SecretCipher, provider: Provider) -> bool {
    matches!(get_secret(conn, cipher, provider).await, Ok(Some(_)))
}

/// Masked display form: first `show_chars` characters plus an ellipsis,
/// or empty when no key is stored.
pub async fn masked_secret(
    conn: &mut DbConn,
    cipher: &SecretCipher,
    provider: Provider,
    show_chars: usize,
) -> String {
    match get_secret(conn, cipher, provider).await {
        Ok(Some(plaintext)) => mask_secret(&plaintext, show_chars),
        _ => String::new(),
    }
}

// ---- Retrieval settings ----

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub enabled: bool,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub min_score: f32,
    pub embedding_provider: String,
    pub max_documents_per_user: i64,
}

pub async fn rag_settings(conn: &mut DbConn, defaults: &RagConfig) -> RagSettings {
    RagSettings {
        enabled: get_bool(conn, "rag_enabled", true).await,
        chunk_size: get_i64(conn, "rag_default_chunk_size", defaults.chunk_size as i64).await
            as usize,
        chunk_overlap: get_i64(conn, "rag_default_overlap", defaults.chunk_overlap as i64).await
            as usize,
        top_k: get_i64(conn, "rag_default_top_k", defaults.top_k as i64).await as usize,
        min_score: get_f32(conn, "rag_min_similarity_score", defaults.min_score).await,
        embedding_provider: get_string(conn, "rag_embedding_model")
            .await
            .unwrap_or_else(|| "gemini".to_string()),
        max_documents_per_user: get_i64(
            conn,
            "rag_max_documents_per_user",
            defaults.max_documents_per_user,
        )
        .await,
    }
}

// ---- Rate limits ----

/// Advisory per-route request budgets (requests per minute).
pub const DEFAULT_RATE_LIMITS: &[(&str, i64)] = &[
    ("chat", 30),
    ("attachment_upload", 20),
    ("document_upload", 10),
    ("document_search", 30),
];

pub async fn is_rate_limit_enabled(conn: &mut DbConn) -> bool {
    get_bool(conn, "rate_limit_enabled", false).await
}

pub async fn rate_limit(conn: &mut DbConn, limit_name: &str) -> i64 {
    let default = DEFAULT_RATE_LIMITS
        .iter()
        .find(|(name, _)| *name == limit_name)
        .map(|(_, v)| *v)
        .unwrap_or(0);
    let key = format!("rate_limit_{}", limit_name);
    get_i64(conn, &key, default).await
}
