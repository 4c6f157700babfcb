//! Gemini REST adapter.
//!
//! Gemini accepts only `user` and `model` roles; system content is lifted
//! into the request-level `systemInstruction` field, double-newline-joined
//! when several system messages are present.

use futures::StreamExt;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::models::chat::MessageRole;
use crate::providers::{
    AttachmentPart, ChatStream, ProviderRequest, StreamEvent, Usage, body_lines,
    describe_request_error, finalize_usage, stream_timeout,
};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

struct GeminiPayload {
    body: Value,
}

fn build_payload(request: &ProviderRequest) -> GeminiPayload {
    let mut system_instructions: Vec<String> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for msg in &request.messages {
        if msg.role == MessageRole::System {
            if let Some(text) = msg.content.as_deref() {
                if !text.is_empty() {
                    system_instructions.push(text.to_string());
                }
            }
            continue;
        }

        let role = match msg.role {
            MessageRole::Assistant => "model",
            _ => "user",
        };

        let mut parts: Vec<Value> = Vec::new();
        if let Some(text) = msg.content.as_deref() {
            if !text.is_empty() {
                parts.push(json!({ "text": text }));
            }
        }
        for part in &msg.parts {
            match part {
                AttachmentPart::Image {
                    mime_type, base64, ..
                } => {
                    parts.push(json!({
                        "inline_data": { "mime_type": mime_type, "data": base64 }
                    }));
                }
                AttachmentPart::TextDocument { filename, content } => {
                    parts.push(json!({
                        "text": AttachmentPart::formatted_text(filename, content)
                    }));
                }
                AttachmentPart::NativePdf { .. } => {}
            }
        }

        contents.push(json!({ "role": role, "parts": parts }));
    }

    let mut body = json!({ "contents": contents });
    if !system_instructions.is_empty() {
        body["systemInstruction"] = json!({
            "parts": [{ "text": system_instructions.join("\n\n") }]
        });
    }

    GeminiPayload { body }
}

/// Map common Gemini failure bodies to the messages users actually need.
fn friendly_error(status: u16, details: &str) -> String {
    let lowered = details.to_ascii_lowercase();
    if details.contains("API_KEY_INVALID") || lowered.contains("invalid_api_key") {
        "Invalid Gemini API key. Please check your API key in application settings.".to_string()
    } else if lowered.contains("quota") {
        "Gemini API quota exceeded. Please check your API usage.".to_string()
    } else {
        format!("Gemini API HTTP Error {}: {}", status, details)
    }
}

fn parse_usage(value: &Value) -> Option<Usage> {
    let metadata = value.get("usageMetadata")?;
    let input = metadata["promptTokenCount"].as_i64().unwrap_or(0) as i32;
    let output = metadata["candidatesTokenCount"].as_i64().unwrap_or(0) as i32;
    let total = metadata["totalTokenCount"].as_i64().unwrap_or(0) as i32;
    if input == 0 && output == 0 && total == 0 {
        return None;
    }
    Some(Usage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: total,
        estimated: false,
    })
}

fn chunk_text(value: &Value) -> Option<String> {
    let parts = value["candidates"][0]["content"]["parts"].as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect();
    if text.is_empty() { None } else { Some(text) }
}

pub fn stream(http: reqwest::Client, request: ProviderRequest) -> ChatStream {
    Box::pin(async_stream::stream! {
        let payload = build_payload(&request);
        let url = format!(
            "{}/{}:streamGenerateContent?alt=sse",
            BASE_URL, request.model
        );
        let api_key = request.api_key.clone().unwrap_or_default();

        let response = match http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .timeout(stream_timeout(request.provider))
            .json(&payload.body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                yield StreamEvent::Error(describe_request_error(request.provider, &e));
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let details = response.text().await.unwrap_or_default();
            yield StreamEvent::Error(friendly_error(status, &details));
            return;
        }

        let mut full_content = String::new();
        let mut usage: Option<Usage> = None;
        let mut lines = std::pin::pin!(body_lines(response));

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    yield StreamEvent::Error(describe_request_error(request.provider, &e));
                    return;
                }
            };

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            let Ok(chunk) = serde_json::from_str::<Value>(data) else {
                continue;
            };

            // Usage metadata rides on the trailing chunk.
            if let Some(parsed) = parse_usage(&chunk) {
                usage = Some(parsed);
            }

            if let Some(text) = chunk_text(&chunk) {
                full_content.push_str(&text);
                yield StreamEvent::Content(text);
            }
        }

        let usage = finalize_usage(usage, &full_content, &request.messages);
        yield StreamEvent::Done { full_content, usage };
    })
}

pub async fn respond(http: &reqwest::Client, request: ProviderRequest) -> Result<String> {
    let payload = build_payload(&request);
    let url = format!("{}/{}:generateContent", BASE_URL, request.model);
    let api_key = request.api_key.clone().unwrap_or_default();

    let response = http
        .post(&url)
        .header("x-goog-api-key", api_key)
        .timeout(stream_timeout(request.provider))
        .json(&payload.body)
        .send()
        .await
        .map_err(|e| Error::Provider(describe_request_error(request.provider, &e)))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let details = response.text().await.unwrap_or_default();
        return Err(Error::Provider(friendly_error(status, &details)));
    }

    let data: Value = response
        .json()
        .await
        .map_err(|e| Error::Provider(format!("Invalid response payload: {}", e)))?;

    chunk_text(&data).ok_or_else(|| {
        Error::Provider(format!("Unexpected Gemini API response format: {}", data))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Provider, ProviderMessage};

    fn request() -> ProviderRequest {
        ProviderRequest {
            provider: Provider::Gemini,
            model: "gemini-test".into(),
            api_key: Some("key".into()),
            endpoint_url: None,
            messages: vec![
                ProviderMessage::text(MessageRole::System, "stay safe"),
                ProviderMessage::text(MessageRole::System, "cite sources"),
                ProviderMessage::text(MessageRole::User, "hello"),
                ProviderMessage::text(MessageRole::Assistant, "hi there"),
            ],
            vision_enabled: false,
        }
    }

    #[test]
    fn test_system_messages_fold_into_instruction() {
        let payload = build_payload(&request());
        let instruction = payload.body["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap();
        assert_eq!(instruction, "stay safe\n\ncite sources");

        let contents = payload.body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
    }

    #[test]
    fn test_no_system_instruction_when_absent() {
        let mut req = request();
        req.messages.retain(|m| m.role != MessageRole::System);
        let payload = build_payload(&req);
        assert!(payload.body.get("systemInstruction").is_none());
    }

    #[test]
    fn test_image_part_inlined() {
        let mut req = request();
        req.messages[2].parts.push(AttachmentPart::Image {
            mime_type: "image/webp".into(),
            base64: "AAAA".into(),
            filename: "img.webp".into(),
        });
        let payload = build_payload(&req);
        let parts = payload.body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/webp");
    }

    #[test]
    fn test_friendly_errors() {
        assert!(friendly_error(400, "API_KEY_INVALID: nope").contains("Invalid Gemini API key"));
        assert!(friendly_error(429, "Quota exceeded for project").contains("quota exceeded"));
        assert!(friendly_error(500, "boom").contains("HTTP Error 500"));
    }

    #[test]
    fn test_chunk_text_concatenates_parts() {
        let chunk = json!({
            "candidates": [{ "content": { "parts": [{"text": "Hel"}, {"text": "lo"}] } }]
        });
        assert_eq!(chunk_text(&chunk).unwrap(), "Hello");
        assert!(chunk_text(&json!({"candidates": []})).is_none());
    }

    #[test]
    fn test_parse_usage_metadata() {
        let chunk = json!({
            "usageMetadata": {
                "promptTokenCount": 5,
                "candidatesTokenCount": 9,
                "totalTokenCount": 14
            }
        });
        let usage = parse_usage(&chunk).unwrap();
        assert_eq!(usage.total_tokens, 14);
        assert!(parse_usage(&json!({})).is_none());
    }
}
