//! Chat turn helpers: provider resolution, history assembly, retrieval
//! context, and post-turn distillation.

use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::DbConn;
use crate::error::{Error, Result};
use crate::models::chat::MessageRole;
use crate::models::documents::RetrievedChunk;
use crate::models::requests::AttachmentMeta;
use crate::providers::{self, Provider, ProviderMessage, ProviderRequest};
use crate::queries;
use crate::services::embeddings::{self, EmbeddingProvider};
use crate::services::settings;
use crate::services::vector_store;
use crate::state::AppState;

/// Chat display names are seeded from the first words of the opening
/// message.
pub fn derive_chat_name(message: &str) -> String {
    let name: Vec<&str> = message.split_whitespace().take(5).collect();
    if name.is_empty() {
        "New Chat".to_string()
    } else {
        name.join(" ")
    }
}

/// Resolve provider configuration into a request: API key from the
/// settings store, model override or the configured system model, and the
/// endpoint URL for local providers.
pub async fn resolve_provider_request(
    state: &AppState,
    conn: &mut DbConn,
    provider: Provider,
    model_override: Option<&str>,
    messages: Vec<ProviderMessage>,
    vision_enabled: bool,
) -> Result<ProviderRequest> {
    let model = match model_override.filter(|m| !m.is_empty()) {
        Some(model) => model.to_string(),
        None => settings::system_model_id(conn, provider).await,
    };

    let api_key = if provider.is_local() {
        None
    } else {
        settings::get_secret(conn, &state.cipher, provider).await?
    };

    let endpoint_url = provider
        .is_local()
        .then_some(settings::local_model_url(conn, provider).await);

    Ok(ProviderRequest {
        provider,
        model,
        api_key,
        endpoint_url,
        messages,
        vision_enabled,
    })
}

/// Read the prior turns of a chat as provider messages, substituting
/// distilled content when enabled, and resolving stored attachments.
pub async fn build_history(
    state: &AppState,
    conn: &mut DbConn,
    chat_id: i64,
    use_distilled: bool,
    native_pdf: bool,
) -> Result<Vec<ProviderMessage>> {
    let rows = queries::messages::get_messages_for_chat(conn, chat_id).await?;
    let mut history = Vec::with_capacity(rows.len());

    for row in rows {
        let content = if use_distilled {
            row.distilled_content.clone().unwrap_or(row.content.clone())
        } else {
            row.content.clone()
        };

        let attachments = queries::attachments::get_attachments_for_message(conn, row.id).await?;
        let metas: Vec<AttachmentMeta> = attachments
            .into_iter()
            .map(|a| AttachmentMeta {
                original_filename: a.original_filename,
                stored_filename: a.stored_filename,
                file_path: a.file_path,
                mime_type: a.mime_type,
                file_size: a.file_size,
                file_type: a.file_type,
            })
            .collect();

        let parts = if metas.is_empty() {
            Vec::new()
        } else {
            providers::attachments::resolve_parts(&state.upload_root(), &metas, native_pdf).await
        };

        history.push(ProviderMessage {
            role: row.role,
            content: Some(content),
            parts,
        });
    }

    Ok(history)
}

/// Retrieve top-k document chunks relevant to a query, enriched with
/// their document names. Returns an empty list when retrieval is disabled
/// or fails; the turn proceeds without context.
pub async fn retrieve_context(
    state: &AppState,
    conn: &mut DbConn,
    user_id: i64,
    query: &str,
    chat_provider: Option<Provider>,
    top_k: Option<usize>,
    min_score: Option<f32>,
    document_ids: Option<&[i64]>,
) -> Result<Vec<RetrievedChunk>> {
    let rag = settings::rag_settings(conn, &state.config.rag).await;
    if !rag.enabled {
        return Ok(Vec::new());
    }

    let top_k = top_k.unwrap_or(rag.top_k);
    let min_score = min_score.unwrap_or(rag.min_score);

    let preferred = match chat_provider {
        Some(provider) => EmbeddingProvider::for_chat_provider(provider),
        None => EmbeddingProvider::from_str(&rag.embedding_provider)
            .unwrap_or(EmbeddingProvider::Gemini),
    };

    let embedding = embeddings::embed_with_fallback(
        &state.embedder,
        conn,
        &state.cipher,
        preferred,
        std::slice::from_ref(&query.to_string()),
    )
    .await?;

    let query_vector = embedding
        .vectors
        .into_iter()
        .next()
        .ok_or_else(|| Error::Embedding("Query embedding was empty".to_string()))?;

    let hits = vector_store::query(conn, user_id, &query_vector, top_k, document_ids).await?;

    let filtered: Vec<_> = hits
        .into_iter()
        .filter(|hit| hit.similarity >= min_score)
        .collect();

    // Enrich with document names, one lookup per distinct document.
    let mut names: HashMap<i64, Option<String>> = HashMap::new();
    let mut results = Vec::with_capacity(filtered.len());
    for hit in filtered {
        let name = match names.get(&hit.document_id) {
            Some(name) => name.clone(),
            None => {
                let name = queries::documents::get_document_by_id(conn, hit.document_id)
                    .await?
                    .map(|d| d.original_filename);
                names.insert(hit.document_id, name.clone());
                name
            }
        };
        results.push(RetrievedChunk {
            content: hit.content,
            document_id: hit.document_id,
            document_name: name,
            chunk_index: hit.chunk_index,
            page_number: hit.page_number,
            similarity: hit.similarity,
            token_count: hit.token_count,
        });
    }

    Ok(results)
}

/// Format retrieved chunks as the document-context block prepended to the
/// prompt.
pub fn format_context_for_prompt(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return String::new();
    }

    let mut parts = vec!["=== DOCUMENT CONTEXT ===\n".to_string()];
    for (i, chunk) in chunks.iter().enumerate() {
        let doc_name = chunk
            .document_name
            .as_deref()
            .unwrap_or("Unknown Document");
        let mut header = format!("[Source {}: {}", i + 1, doc_name);
        if let Some(page) = chunk.page_number {
            header.push_str(&format!(", Page {}", page));
        }
        header.push(']');

        parts.push(header);
        parts.push(chunk.content.clone());
        parts.push(String::new());
    }
    parts.push("=== END DOCUMENT CONTEXT ===".to_string());

    parts.join("\n")
}

/// Wrap the document context in the retrieval system prompt.
pub fn rag_system_message(context: &str) -> String {
    format!(
        "You have access to the following document context that may be relevant to the \
         user's questions. Use this information to provide accurate, informed responses. \
         If the context doesn't contain relevant information, you can still answer based \
         on your knowledge, but mention that the provided documents didn't contain \
         specific information about that topic.\n\n{}\n\nRemember to cite the source \
         documents when using information from them.",
        context
    )
}

// ---- Distillation ----

const DISTILL_USER_TRUNCATE: usize = 2000;
const DISTILL_RESPONSE_TRUNCATE: usize = 4000;

/// Remove `<think>…</think>` passages before summarization.
pub fn strip_think_tags(text: &str) -> String {
    static THINK: OnceLock<Regex> = OnceLock::new();
    let think = THINK.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("think pattern"));
    think.replace_all(text, "").trim().to_string()
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn distillation_prompt(user_message: &str, response: &str) -> String {
    let user_message = truncate_chars(user_message, DISTILL_USER_TRUNCATE);
    let response = truncate_chars(response, DISTILL_RESPONSE_TRUNCATE);

    format!(
        "Summarize the following conversation exchange. Be extremely brief - aim for 1-2 \
         sentences each.\n\nIMPORTANT: Write summaries as direct statements, NOT \
         descriptions of what was said.\n- WRONG: \"The user asked about the capital\" or \
         \"The assistant explained that...\"\n- CORRECT: \"What is the capital of \
         France?\" or \"The capital of France is Paris.\"\n\nThe user's message: \
         {}\n\nThe response given: {}\n\nProvide two ultra-brief summaries in this exact \
         format:\nUSER: [Restate the user's question/request directly]\nASSISTANT: \
         [State the key information from the response directly, as facts]",
        user_message, response
    )
}

/// Parse `USER:` / `ASSISTANT:` lines out of the summarizer's reply. When
/// neither label is present, the raw reply is split in half as a coarse
/// fallback.
pub fn parse_distilled_summaries(summary_text: &str) -> (String, String) {
    let mut user_summary = String::new();
    let mut assistant_summary = String::new();

    for line in summary_text.trim().lines() {
        let line = line.trim();
        let upper = line.to_uppercase();
        // The labels are ASCII, so the prefix length is stable across the
        // case fold.
        if upper.starts_with("USER:") {
            user_summary = line[5..].trim().to_string();
        } else if upper.starts_with("ASSISTANT:") {
            assistant_summary = line[10..].trim().to_string();
        }
    }

    if user_summary.is_empty() && assistant_summary.is_empty() {
        let mut halves = summary_text.splitn(2, "\n\n");
        let first = halves.next().unwrap_or_default();
        let second = halves.next().unwrap_or(first);
        user_summary = truncate_chars(first, 300).to_string();
        assistant_summary = truncate_chars(second, 300).to_string();
    }

    // A summary longer than this is no longer a summary.
    const MAX_SUMMARY_CHARS: usize = 400;
    (
        truncate_chars(&user_summary, MAX_SUMMARY_CHARS).to_string(),
        truncate_chars(&assistant_summary, MAX_SUMMARY_CHARS).to_string(),
    )
}

/// Generate distilled summaries for a completed turn and store them on
/// the two message rows. Failures log and leave the turn untouched.
pub async fn distill_exchange(
    state: AppState,
    provider: Provider,
    model_name: Option<String>,
    user_message_id: i64,
    bot_message_id: i64,
    user_content: String,
    bot_content: String,
) {
    let result = async {
        let cleaned = strip_think_tags(&bot_content);
        let prompt = distillation_prompt(&user_content, &cleaned);

        let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
        let request = resolve_provider_request(
            &state,
            &mut conn,
            provider,
            model_name.as_deref(),
            vec![ProviderMessage::text(MessageRole::User, prompt)],
            false,
        )
        .await?;
        drop(conn);

        let reply = providers::respond(&state.http, request).await?;
        let summary_text = strip_think_tags(&reply);
        let (user_summary, assistant_summary) = parse_distilled_summaries(&summary_text);

        let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;
        if !user_summary.is_empty() {
            queries::messages::set_distilled_content(&mut conn, user_message_id, &user_summary)
                .await?;
        }
        if !assistant_summary.is_empty() {
            queries::messages::set_distilled_content(&mut conn, bot_message_id, &assistant_summary)
                .await?;
        }

        Ok::<(), Error>(())
    }
    .await;

    match result {
        Ok(()) => tracing::info!(
            "[Chat] Distilled context generated for messages {}, {}",
            user_message_id,
            bot_message_id
        ),
        Err(e) => tracing::warn!("[Chat] Distilled context generation failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_chat_name() {
        assert_eq!(derive_chat_name("Hello"), "Hello");
        assert_eq!(
            derive_chat_name("What is the capital of France today?"),
            "What is the capital of"
        );
        assert_eq!(derive_chat_name("   "), "New Chat");
    }

    #[test]
    fn test_strip_think_tags() {
        let text = "prefix <think>internal\nreasoning</think> answer";
        assert_eq!(strip_think_tags(text), "prefix  answer");
        assert_eq!(strip_think_tags("no tags here"), "no tags here");
    }

    #[test]
    fn test_parse_distilled_summaries() {
        let reply = "USER: What is the capital of France?\nASSISTANT: The capital of France is Paris.";
        let (user, assistant) = parse_distilled_summaries(reply);
        assert_eq!(user, "What is the capital of France?");
        assert_eq!(assistant, "The capital of France is Paris.");
    }

    #[test]
    fn test_parse_distilled_summaries_case_insensitive() {
        let reply = "user: a question\nAssistant: an answer";
        let (user, assistant) = parse_distilled_summaries(reply);
        assert_eq!(user, "a question");
        assert_eq!(assistant, "an answer");
    }

    #[test]
    fn test_parse_distilled_summaries_clamped() {
        let reply = format!("USER: {}\nASSISTANT: ok", "q".repeat(1000));
        let (user, assistant) = parse_distilled_summaries(&reply);
        assert!(user.chars().count() <= 400);
        assert_eq!(assistant, "ok");
    }

    #[test]
    fn test_parse_distilled_summaries_fallback() {
        let reply = "first part of summary\n\nsecond part of summary";
        let (user, assistant) = parse_distilled_summaries(reply);
        assert_eq!(user, "first part of summary");
        assert_eq!(assistant, "second part of summary");
    }

    #[test]
    fn test_format_context_for_prompt() {
        let chunks = vec![RetrievedChunk {
            content: "The capital of France is Paris.".into(),
            document_id: 1,
            document_name: Some("geography.pdf".into()),
            chunk_index: 0,
            page_number: Some(3),
            similarity: 0.92,
            token_count: 8,
        }];
        let context = format_context_for_prompt(&chunks);
        assert!(context.starts_with("=== DOCUMENT CONTEXT ==="));
        assert!(context.contains("[Source 1: geography.pdf, Page 3]"));
        assert!(context.contains("Paris"));
        assert!(context.ends_with("=== END DOCUMENT CONTEXT ==="));
    }

    #[test]
    fn test_empty_context_formats_empty() {
        assert_eq!(format_context_for_prompt(&[]), "");
    }

    #[test]
    fn test_distillation_prompt_truncates() {
        let long_user = "u".repeat(5000);
        let long_response = "r".repeat(9000);
        let prompt = distillation_prompt(&long_user, &long_response);
        assert!(prompt.len() < 5000 + 4000);
        assert!(prompt.contains("USER:"));
        assert!(prompt.contains("ASSISTANT:"));
    }
}
