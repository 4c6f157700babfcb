//! Uniform streaming interface over the supported LLM providers.
//!
//! Each provider module turns a prepared request into a lazy, finite event
//! sequence with exactly one terminal event. Faults never cross the module
//! boundary as panics or `Err` during streaming; they become `Error`
//! events the orchestrator can forward inline.

pub mod anthropic;
pub mod attachments;
pub mod gemini;
pub mod ollama;
pub mod openai_compat;

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::chat::MessageRole;
use crate::services::tokens;

pub use attachments::AttachmentPart;

/// The closed set of chat providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Gemini,
    OpenAi,
    Anthropic,
    Xai,
    LmStudio,
    Ollama,
}

impl Provider {
    /// Canonical identifier, used in settings keys and persisted rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Xai => "xai",
            Provider::LmStudio => "lm_studio",
            Provider::Ollama => "ollama",
        }
    }

    pub const ALL: [Provider; 6] = [
        Provider::Gemini,
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Xai,
        Provider::LmStudio,
        Provider::Ollama,
    ];

    /// Local providers require the caller's vision opt-in for images and
    /// use longer read timeouts.
    pub fn is_local(&self) -> bool {
        matches!(self, Provider::LmStudio | Provider::Ollama)
    }

    /// Providers that accept raw documents natively, so retrieval context
    /// is not prepended for them.
    pub fn accepts_native_documents(&self) -> bool {
        matches!(self, Provider::Anthropic | Provider::Xai)
    }

    /// Default model identifier used when no setting is stored.
    pub fn default_model_id(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-3-flash-preview",
            Provider::OpenAi => "gpt-5-mini-2025-08-07",
            Provider::Anthropic => "claude-haiku-4-5-20251001",
            Provider::Xai => "grok-4-1-fast-non-reasoning-latest",
            Provider::LmStudio | Provider::Ollama => "",
        }
    }

    /// Default endpoint for local providers.
    pub fn default_local_url(&self) -> &'static str {
        match self {
            Provider::LmStudio => "http://localhost:1234/v1/chat/completions",
            Provider::Ollama => "http://localhost:11434/api/chat",
            _ => "",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Gemini => "Gemini",
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Xai => "xAI",
            Provider::LmStudio => "LM Studio",
            Provider::Ollama => "Ollama",
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "xai" | "grok" => Ok(Provider::Xai),
            // Legacy label synonym.
            "lm_studio" | "lmstudio" => Ok(Provider::LmStudio),
            "ollama" => Ok(Provider::Ollama),
            other => Err(format!("Unknown provider: {}", other)),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Token usage reported with a completed stream.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub total_tokens: i32,
    pub estimated: bool,
}

/// One event of a provider stream. The sequence is finite, ordered, and
/// carries exactly one terminal event (`Done` or `Error`).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Content(String),
    Done { full_content: String, usage: Usage },
    Error(String),
}

pub type ChatStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// A normalized inbound message before provider-specific encoding.
#[derive(Debug, Clone)]
pub struct ProviderMessage {
    pub role: MessageRole,
    pub content: Option<String>,
    pub parts: Vec<AttachmentPart>,
}

impl ProviderMessage {
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            parts: Vec::new(),
        }
    }

    pub fn has_image(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, AttachmentPart::Image { .. }))
    }
}

/// Fully resolved request handed to a provider module: configuration has
/// already been read, attachments already loaded.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub provider: Provider,
    pub model: String,
    pub api_key: Option<String>,
    /// Endpoint for local providers; cloud providers use fixed URLs.
    pub endpoint_url: Option<String>,
    pub messages: Vec<ProviderMessage>,
    /// Caller's assertion that a local model accepts image inputs.
    pub vision_enabled: bool,
}

impl ProviderRequest {
    pub fn has_images(&self) -> bool {
        self.messages.iter().any(ProviderMessage::has_image)
    }
}

/// Streaming read window. Local providers get a longer one, and
/// reasoning models effectively stream for as long as they think.
pub fn stream_timeout(provider: Provider) -> Duration {
    match provider {
        Provider::Xai => Duration::from_secs(3600),
        p if p.is_local() => Duration::from_secs(120),
        _ => Duration::from_secs(60),
    }
}

/// Open a streaming completion. Setup failures (missing key, images
/// without vision support) surface as a single `Error` event.
pub fn stream(http: reqwest::Client, request: ProviderRequest) -> ChatStream {
    if let Some(message) = precheck_error(&request) {
        return single_error_stream(message);
    }

    match request.provider {
        Provider::Gemini => gemini::stream(http, request),
        Provider::OpenAi | Provider::Xai | Provider::LmStudio => {
            openai_compat::stream(http, request)
        }
        Provider::Anthropic => anthropic::stream(http, request),
        Provider::Ollama => ollama::stream(http, request),
    }
}

/// Single-shot completion, used for distillation.
pub async fn respond(http: &reqwest::Client, request: ProviderRequest) -> Result<String> {
    if let Some(message) = precheck_error(&request) {
        return Err(Error::Provider(message));
    }

    match request.provider {
        Provider::Gemini => gemini::respond(http, request).await,
        Provider::OpenAi | Provider::Xai | Provider::LmStudio => {
            openai_compat::respond(http, request).await
        }
        Provider::Anthropic => anthropic::respond(http, request).await,
        Provider::Ollama => ollama::respond(http, request).await,
    }
}

/// Shared setup validation: API keys for cloud providers, image
/// acceptance per provider/model.
fn precheck_error(request: &ProviderRequest) -> Option<String> {
    if !request.provider.is_local() && request.api_key.as_deref().unwrap_or("").is_empty() {
        return Some(format!(
            "{} API key not configured. Please add your API key in your application settings.",
            request.provider.display_name()
        ));
    }

    if request.has_images() {
        match request.provider {
            Provider::OpenAi => {
                let model = request.model.to_ascii_lowercase();
                if !["gpt-4", "gpt-5", "vision"].iter().any(|m| model.contains(m)) {
                    return Some(format!(
                        "Model '{}' doesn't support image inputs. Please use a vision-capable model.",
                        request.model
                    ));
                }
            }
            Provider::LmStudio | Provider::Ollama => {
                if !request.vision_enabled {
                    return Some(
                        "Enable vision support using the eye icon button next to attachments \
                         if using a vision-capable model."
                            .to_string(),
                    );
                }
            }
            _ => {}
        }
    }

    None
}

pub(crate) fn single_error_stream(message: String) -> ChatStream {
    Box::pin(futures::stream::once(async move {
        StreamEvent::Error(message)
    }))
}

/// Apply the usage sanity check: absent usage is estimated locally, and a
/// wildly inflated output count is recomputed and flagged as estimated.
pub(crate) fn finalize_usage(
    usage: Option<Usage>,
    full_content: &str,
    messages: &[ProviderMessage],
) -> Usage {
    match usage {
        Some(usage) => {
            let max_reasonable = (full_content.len() as i32 * 2).max(50);
            if !full_content.is_empty() && usage.output_tokens > max_reasonable {
                let output = tokens::count_tokens(full_content) as i32;
                Usage {
                    input_tokens: usage.input_tokens,
                    output_tokens: output,
                    total_tokens: usage.input_tokens + output,
                    estimated: true,
                }
            } else {
                usage
            }
        }
        None => {
            let output = tokens::count_tokens(full_content) as i32;
            let input = tokens::count_conversation_tokens(messages) as i32;
            Usage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
                estimated: true,
            }
        }
    }
}

/// Split a streaming HTTP body into lines, yielding them as they arrive.
/// Used for both SSE (`data: ` framed) and NDJSON bodies.
pub(crate) fn body_lines(
    response: reqwest::Response,
) -> impl Stream<Item = std::result::Result<String, reqwest::Error>> {
    use futures::StreamExt;

    async_stream::stream! {
        let mut buffer: Vec<u8> = Vec::new();
        let mut bytes = response.bytes_stream();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    buffer.extend_from_slice(&chunk);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line)
                            .trim_end_matches(['\n', '\r'])
                            .to_string();
                        yield Ok(line);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        if !buffer.is_empty() {
            yield Ok(String::from_utf8_lossy(&buffer).to_string());
        }
    }
}

/// Describe a reqwest failure the way the error table expects.
pub(crate) fn describe_request_error(provider: Provider, err: &reqwest::Error) -> String {
    let name = provider.display_name();
    if err.is_timeout() {
        format!("Request to {} timed out", name)
    } else if err.is_connect() {
        match provider {
            Provider::LmStudio | Provider::Ollama => format!(
                "Connection Error to {}: Please ensure the local server is running and the model is loaded.",
                name
            ),
            _ => format!("Connection Error to {} API", name),
        }
    } else {
        format!("Error communicating with {} API: {}", name, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse_synonyms() {
        assert_eq!(Provider::from_str("lm_studio").unwrap(), Provider::LmStudio);
        assert_eq!(Provider::from_str("lmstudio").unwrap(), Provider::LmStudio);
        assert_eq!(Provider::from_str("GEMINI").unwrap(), Provider::Gemini);
        assert!(Provider::from_str("bard").is_err());
    }

    #[test]
    fn test_native_document_providers_skip_rag() {
        assert!(Provider::Anthropic.accepts_native_documents());
        assert!(Provider::Xai.accepts_native_documents());
        assert!(!Provider::Gemini.accepts_native_documents());
        assert!(!Provider::OpenAi.accepts_native_documents());
    }

    #[test]
    fn test_stream_timeouts() {
        assert_eq!(stream_timeout(Provider::OpenAi), Duration::from_secs(60));
        assert_eq!(stream_timeout(Provider::Xai), Duration::from_secs(3600));
        assert_eq!(stream_timeout(Provider::Ollama), Duration::from_secs(120));
    }

    #[test]
    fn test_precheck_requires_api_key_for_cloud() {
        let request = ProviderRequest {
            provider: Provider::OpenAi,
            model: "gpt-5-mini".into(),
            api_key: None,
            endpoint_url: None,
            messages: vec![ProviderMessage::text(MessageRole::User, "hi")],
            vision_enabled: false,
        };
        let msg = precheck_error(&request).unwrap();
        assert!(msg.contains("OpenAI API key not configured"));
    }

    #[test]
    fn test_precheck_allows_local_without_key() {
        let request = ProviderRequest {
            provider: Provider::Ollama,
            model: "llama3".into(),
            api_key: None,
            endpoint_url: Some("http://localhost:11434/api/chat".into()),
            messages: vec![ProviderMessage::text(MessageRole::User, "hi")],
            vision_enabled: false,
        };
        assert!(precheck_error(&request).is_none());
    }

    #[test]
    fn test_precheck_blocks_local_images_without_opt_in() {
        let mut message = ProviderMessage::text(MessageRole::User, "look");
        message.parts.push(AttachmentPart::Image {
            mime_type: "image/png".into(),
            base64: "aGk".into(),
            filename: "pic.png".into(),
        });
        let mut request = ProviderRequest {
            provider: Provider::LmStudio,
            model: "llava".into(),
            api_key: None,
            endpoint_url: Some("http://localhost:1234/v1/chat/completions".into()),
            messages: vec![message],
            vision_enabled: false,
        };
        assert!(precheck_error(&request).is_some());

        request.vision_enabled = true;
        assert!(precheck_error(&request).is_none());
    }

    #[test]
    fn test_precheck_blocks_non_vision_openai_model() {
        let mut message = ProviderMessage::text(MessageRole::User, "look");
        message.parts.push(AttachmentPart::Image {
            mime_type: "image/png".into(),
            base64: "aGk".into(),
            filename: "pic.png".into(),
        });
        let request = ProviderRequest {
            provider: Provider::OpenAi,
            model: "gpt-3.5-turbo".into(),
            api_key: Some("sk-test".into()),
            endpoint_url: None,
            messages: vec![message],
            vision_enabled: false,
        };
        assert!(precheck_error(&request).is_some());
    }

    #[test]
    fn test_finalize_usage_estimates_when_absent() {
        let messages = vec![ProviderMessage::text(MessageRole::User, "Hello there")];
        let usage = finalize_usage(None, "some response text", &messages);
        assert!(usage.estimated);
        assert!(usage.output_tokens > 0);
        assert_eq!(
            usage.total_tokens,
            usage.input_tokens + usage.output_tokens
        );
    }

    #[test]
    fn test_finalize_usage_recomputes_inflated_counts() {
        let messages = vec![ProviderMessage::text(MessageRole::User, "hi")];
        let reported = Usage {
            input_tokens: 10,
            output_tokens: 5_000,
            total_tokens: 5_010,
            estimated: false,
        };
        let usage = finalize_usage(Some(reported), "short", &messages);
        assert!(usage.estimated);
        assert!(usage.output_tokens < 100);
    }

    #[test]
    fn test_finalize_usage_keeps_reasonable_counts() {
        let messages = vec![ProviderMessage::text(MessageRole::User, "hi")];
        let reported = Usage {
            input_tokens: 10,
            output_tokens: 4,
            total_tokens: 14,
            estimated: false,
        };
        let usage = finalize_usage(Some(reported), "short response here", &messages);
        assert!(!usage.estimated);
        assert_eq!(usage.output_tokens, 4);
    }
}
