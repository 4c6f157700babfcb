//! OpenAI-compatible chat completions wire format, shared by OpenAI, xAI,
//! and LM Studio (which speaks the same protocol locally).

use futures::StreamExt;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::providers::{
    AttachmentPart, ChatStream, Provider, ProviderRequest, StreamEvent, Usage, body_lines,
    describe_request_error, finalize_usage, stream_timeout,
};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const XAI_URL: &str = "https://api.x.ai/v1/chat/completions";

fn endpoint(request: &ProviderRequest) -> String {
    match request.provider {
        Provider::OpenAi => OPENAI_URL.to_string(),
        Provider::Xai => XAI_URL.to_string(),
        _ => request
            .endpoint_url
            .clone()
            .unwrap_or_else(|| Provider::LmStudio.default_local_url().to_string()),
    }
}

/// Encode messages in the chat-completions shape. Single-text messages
/// stay plain strings; anything multimodal becomes a part array.
fn build_messages(request: &ProviderRequest) -> Vec<Value> {
    request
        .messages
        .iter()
        .map(|msg| {
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
                            "type": "image_url",
                            "image_url": {
                                "url": format!("data:{};base64,{}", mime_type, base64)
                            }
                        }));
                    }
                    AttachmentPart::TextDocument { filename, content } => {
                        content_parts.push(json!({
                            "type": "text",
                            "text": AttachmentPart::formatted_text(filename, content)
                        }));
                    }
                    // No native document slot in this wire format.
                    AttachmentPart::NativePdf { .. } => {}
                }
            }

            let content: Value = match content_parts.as_slice() {
                [only] if only["type"] == "text" => only["text"].clone(),
                [] => Value::String(msg.content.clone().unwrap_or_default()),
                _ => Value::Array(content_parts),
            };

            json!({ "role": msg.role.to_string(), "content": content })
        })
        .collect()
}

fn request_builder(
    http: &reqwest::Client,
    request: &ProviderRequest,
    payload: &Value,
) -> reqwest::RequestBuilder {
    let mut builder = http
        .post(endpoint(request))
        .timeout(stream_timeout(request.provider))
        .json(payload);
    if let Some(key) = request.api_key.as_deref() {
        if !key.is_empty() {
            builder = builder.bearer_auth(key);
        }
    }
    builder
}

fn parse_usage(value: &Value) -> Option<Usage> {
    let usage = value.get("usage")?;
    if usage.is_null() {
        return None;
    }
    Some(Usage {
        input_tokens: usage["prompt_tokens"].as_i64().unwrap_or(0) as i32,
        output_tokens: usage["completion_tokens"].as_i64().unwrap_or(0) as i32,
        total_tokens: usage["total_tokens"].as_i64().unwrap_or(0) as i32,
        estimated: false,
    })
}

pub fn stream(http: reqwest::Client, request: ProviderRequest) -> ChatStream {
    Box::pin(async_stream::stream! {
        let mut payload = json!({
            "model": request.model,
            "messages": build_messages(&request),
            "stream": true,
        });
        // Local servers do not all understand stream_options.
        if !request.provider.is_local() {
            payload["stream_options"] = json!({ "include_usage": true });
        }

        let response = match request_builder(&http, &request, &payload).send().await {
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
                "{} API HTTP Error {}: {}",
                request.provider.display_name(),
                status.as_u16(),
                details
            ));
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
            if data == "[DONE]" {
                break;
            }

            let Ok(chunk) = serde_json::from_str::<Value>(data) else {
                continue;
            };

            if let Some(parsed) = parse_usage(&chunk) {
                usage = Some(parsed);
            }

            if let Some(delta) = chunk["choices"][0]["delta"]["content"].as_str() {
                if !delta.is_empty() {
                    full_content.push_str(delta);
                    yield StreamEvent::Content(delta.to_string());
                }
            }
        }

        let usage = finalize_usage(usage, &full_content, &request.messages);
        yield StreamEvent::Done { full_content, usage };
    })
}

pub async fn respond(http: &reqwest::Client, request: ProviderRequest) -> Result<String> {
    let payload = json!({
        "model": request.model,
        "messages": build_messages(&request),
        "stream": false,
    });

    let response = request_builder(http, &request, &payload)
        .send()
        .await
        .map_err(|e| Error::Provider(describe_request_error(request.provider, &e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let details = response.text().await.unwrap_or_default();
        return Err(Error::Provider(format!(
            "{} API HTTP Error {}: {}",
            request.provider.display_name(),
            status.as_u16(),
            details
        )));
    }

    let data: Value = response
        .json()
        .await
        .map_err(|e| Error::Provider(format!("Invalid response payload: {}", e)))?;

    data["choices"][0]["message"]["content"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| {
            Error::Provider(format!(
                "Unexpected {} API response format",
                request.provider.display_name()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::MessageRole;
    use crate::providers::ProviderMessage;

    fn text_request(provider: Provider) -> ProviderRequest {
        ProviderRequest {
            provider,
            model: "test-model".into(),
            api_key: Some("key".into()),
            endpoint_url: None,
            messages: vec![
                ProviderMessage::text(MessageRole::System, "be helpful"),
                ProviderMessage::text(MessageRole::User, "hello"),
            ],
            vision_enabled: false,
        }
    }

    #[test]
    fn test_plain_text_stays_string() {
        let messages = build_messages(&text_request(Provider::OpenAi));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be helpful");
        assert_eq!(messages[1]["content"], "hello");
    }

    #[test]
    fn test_image_becomes_data_url_part() {
        let mut request = text_request(Provider::OpenAi);
        request.messages[1].parts.push(AttachmentPart::Image {
            mime_type: "image/png".into(),
            base64: "QUJD".into(),
            filename: "pic.png".into(),
        });

        let messages = build_messages(&request);
        let content = &messages[1]["content"];
        assert!(content.is_array());
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/png;base64,QUJD"
        );
    }

    #[test]
    fn test_text_document_appended_as_text_part() {
        let mut request = text_request(Provider::Xai);
        request.messages[1].parts.push(AttachmentPart::TextDocument {
            filename: "notes.txt".into(),
            content: "interesting facts".into(),
        });

        let messages = build_messages(&request);
        let content = &messages[1]["content"];
        assert!(content.is_array());
        let text = content[1]["text"].as_str().unwrap();
        assert!(text.contains("[File: notes.txt]"));
        assert!(text.contains("interesting facts"));
    }

    #[test]
    fn test_endpoint_selection() {
        assert_eq!(endpoint(&text_request(Provider::OpenAi)), OPENAI_URL);
        assert_eq!(endpoint(&text_request(Provider::Xai)), XAI_URL);

        let mut local = text_request(Provider::LmStudio);
        local.endpoint_url = Some("http://localhost:9999/v1/chat/completions".into());
        assert_eq!(
            endpoint(&local),
            "http://localhost:9999/v1/chat/completions"
        );
    }

    #[test]
    fn test_parse_usage() {
        let chunk = json!({
            "usage": { "prompt_tokens": 12, "completion_tokens": 34, "total_tokens": 46 }
        });
        let usage = parse_usage(&chunk).unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 34);
        assert_eq!(usage.total_tokens, 46);
        assert!(!usage.estimated);

        assert!(parse_usage(&json!({"usage": null})).is_none());
        assert!(parse_usage(&json!({"choices": []})).is_none());
    }
}
