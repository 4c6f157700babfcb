//! Anthropic Messages API adapter.
//!
//! System messages move into the top-level `system` field; images and
//! PDFs ride natively as base64 source blocks.

use futures::StreamExt;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::models::chat::MessageRole;
use crate::providers::{
    AttachmentPart, ChatStream, ProviderRequest, StreamEvent, Usage, body_lines,
    describe_request_error, finalize_usage, stream_timeout,
};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: i32 = 8192;

fn build_payload(request: &ProviderRequest, stream: bool) -> Value {
    let mut system_messages: Vec<String> = Vec::new();
    let mut messages: Vec<Value> = Vec::new();

    for msg in &request.messages {
        if msg.role == MessageRole::System {
            if let Some(text) = msg.content.as_deref() {
                if !text.is_empty() {
                    system_messages.push(text.to_string());
                }
            }
            continue;
        }

        let mut content_parts: Vec<Value> = Vec::new();
        if let Some(text) = msg.content.as_deref() {
            if !text.is_empty() {
                content_parts.push(json!({ "type": "text", "text": text }));
            }
        }

        for part in &msg.parts {
            match part {
                AttachmentPart::Image {
                    mime_type, base64, ..
                } => {
                    content_parts.push(json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": mime_type,
                            "data": base64
                        }
                    }));
                }
                AttachmentPart::NativePdf { base64, .. } => {
                    content_parts.push(json!({
                        "type": "document",
                        "source": {
                            "type": "base64",
                            "media_type": "application/pdf",
                            "data": base64
                        }
                    }));
                }
                AttachmentPart::TextDocument { filename, content } => {
                    content_parts.push(json!({
                        "type": "text",
                        "text": AttachmentPart::formatted_text(filename, content)
                    }));
                }
            }
        }

        let content: Value = match content_parts.as_slice() {
            [only] if only["type"] == "text" => only["text"].clone(),
            [] => Value::String(msg.content.clone().unwrap_or_default()),
            _ => Value::Array(content_parts),
        };

        messages.push(json!({ "role": msg.role.to_string(), "content": content }));
    }

    let mut payload = json!({
        "model": request.model,
        "messages": messages,
        "max_tokens": MAX_TOKENS,
    });
    if stream {
        payload["stream"] = json!(true);
    }
    if !system_messages.is_empty() {
        payload["system"] = json!(system_messages.join("\n\n"));
    }

    payload
}

pub fn stream(http: reqwest::Client, request: ProviderRequest) -> ChatStream {
    Box::pin(async_stream::stream! {
        let payload = build_payload(&request, true);
        let api_key = request.api_key.clone().unwrap_or_default();

        let response = match http
            .post(API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(stream_timeout(request.provider))
            .json(&payload)
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
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            yield StreamEvent::Error(format!(
                "Anthropic API HTTP Error {}: {}",
                status.as_u16(),
                details
            ));
            return;
        }

        let mut full_content = String::new();
        let mut input_tokens = 0i32;
        let mut output_tokens = 0i32;
        let mut saw_usage = false;
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
            let Ok(event) = serde_json::from_str::<Value>(data) else {
                continue;
            };

            match event["type"].as_str() {
                Some("message_start") => {
                    if let Some(n) = event["message"]["usage"]["input_tokens"].as_i64() {
                        input_tokens = n as i32;
                        saw_usage = true;
                    }
                }
                Some("content_block_delta") => {
                    let delta = &event["delta"];
                    if delta["type"] == "text_delta" {
                        if let Some(text) = delta["text"].as_str() {
                            if !text.is_empty() {
                                full_content.push_str(text);
                                yield StreamEvent::Content(text.to_string());
                            }
                        }
                    }
                }
                Some("message_delta") => {
                    if let Some(n) = event["usage"]["output_tokens"].as_i64() {
                        output_tokens = n as i32;
                        saw_usage = true;
                    }
                }
                Some("error") => {
                    let message = event["error"]["message"]
                        .as_str()
                        .unwrap_or("unknown upstream error");
                    yield StreamEvent::Error(format!("Anthropic API error: {}", message));
                    return;
                }
                _ => {}
            }
        }

        let reported = saw_usage.then_some(Usage {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            estimated: false,
        });
        let usage = finalize_usage(reported, &full_content, &request.messages);
        yield StreamEvent::Done { full_content, usage };
    })
}

pub async fn respond(http: &reqwest::Client, request: ProviderRequest) -> Result<String> {
    let payload = build_payload(&request, false);
    let api_key = request.api_key.clone().unwrap_or_default();

    let response = http
        .post(API_URL)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .timeout(stream_timeout(request.provider))
        .json(&payload)
        .send()
        .await
        .map_err(|e| Error::Provider(describe_request_error(request.provider, &e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let details = response.text().await.unwrap_or_default();
        return Err(Error::Provider(format!(
            "Anthropic API HTTP Error {}: {}",
            status.as_u16(),
            details
        )));
    }

    let data: Value = response
        .json()
        .await
        .map_err(|e| Error::Provider(format!("Invalid response payload: {}", e)))?;

    data["content"][0]["text"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| Error::Provider("Unexpected Anthropic API response format".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Provider, ProviderMessage};

    fn request() -> ProviderRequest {
        ProviderRequest {
            provider: Provider::Anthropic,
            model: "claude-test".into(),
            api_key: Some("key".into()),
            endpoint_url: None,
            messages: vec![
                ProviderMessage::text(MessageRole::System, "guardrails"),
                ProviderMessage::text(MessageRole::User, "question"),
            ],
            vision_enabled: false,
        }
    }

    #[test]
    fn test_system_lifted_to_top_level() {
        let payload = build_payload(&request(), true);
        assert_eq!(payload["system"], "guardrails");
        assert_eq!(payload["stream"], true);
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "question");
    }

    #[test]
    fn test_native_pdf_part() {
        let mut req = request();
        req.messages[1].parts.push(AttachmentPart::NativePdf {
            filename: "paper.pdf".into(),
            base64: "UERG".into(),
        });
        let payload = build_payload(&req, false);
        let content = &payload["messages"][0]["content"];
        assert!(content.is_array());
        assert_eq!(content[1]["type"], "document");
        assert_eq!(content[1]["source"]["media_type"], "application/pdf");
        assert!(payload.get("stream").is_none());
    }

    #[test]
    fn test_image_part_is_base64_source() {
        let mut req = request();
        req.messages[1].parts.push(AttachmentPart::Image {
            mime_type: "image/jpeg".into(),
            base64: "SU1H".into(),
            filename: "photo.jpg".into(),
        });
        let payload = build_payload(&req, true);
        let content = &payload["messages"][0]["content"];
        assert_eq!(content[1]["type"], "image");
        assert_eq!(content[1]["source"]["data"], "SU1H");
    }
}
