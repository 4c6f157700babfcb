//! Ollama chat adapter.
//!
//! Ollama speaks its own NDJSON protocol: images travel in a per-message
//! `images` array of base64 strings, and the final line carries eval
//! counts usable as token usage.

use futures::StreamExt;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::providers::{
    AttachmentPart, ChatStream, Provider, ProviderRequest, StreamEvent, Usage, body_lines,
    describe_request_error, finalize_usage, stream_timeout,
};

fn endpoint(request: &ProviderRequest) -> String {
    request
        .endpoint_url
        .clone()
        .unwrap_or_else(|| Provider::Ollama.default_local_url().to_string())
}

fn build_messages(request: &ProviderRequest) -> Vec<Value> {
    request
        .messages
        .iter()
        .map(|msg| {
            let mut text = msg.content.clone().unwrap_or_default();
            let mut images: Vec<String> = Vec::new();

            for part in &msg.parts {
                match part {
                    AttachmentPart::Image { base64, .. } => {
                        images.push(base64.clone());
                    }
                    AttachmentPart::TextDocument { filename, content } => {
                        text.push_str(&AttachmentPart::formatted_text(filename, content));
                    }
                    AttachmentPart::NativePdf { .. } => {}
                }
            }

            let mut message = json!({ "role": msg.role.to_string(), "content": text });
            if !images.is_empty() {
                message["images"] = json!(images);
            }
            message
        })
        .collect()
}

fn parse_final_usage(chunk: &Value) -> Option<Usage> {
    let input = chunk["prompt_eval_count"].as_i64().unwrap_or(0) as i32;
    let output = chunk["eval_count"].as_i64().unwrap_or(0) as i32;
    if input == 0 && output == 0 {
        return None;
    }
    Some(Usage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: input + output,
        estimated: false,
    })
}

pub fn stream(http: reqwest::Client, request: ProviderRequest) -> ChatStream {
    Box::pin(async_stream::stream! {
        let payload = json!({
            "model": request.model,
            "messages": build_messages(&request),
            "stream": true,
        });

        let response = match http
            .post(endpoint(&request))
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
                "Ollama HTTP Error {}: {}",
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
            if line.is_empty() {
                continue;
            }
            let Ok(chunk) = serde_json::from_str::<Value>(&line) else {
                continue;
            };

            if let Some(content) = chunk["message"]["content"].as_str() {
                if !content.is_empty() {
                    full_content.push_str(content);
                    yield StreamEvent::Content(content.to_string());
                }
            }

            if chunk["done"].as_bool().unwrap_or(false) {
                usage = parse_final_usage(&chunk);
                break;
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

    let response = http
        .post(endpoint(&request))
        .timeout(stream_timeout(request.provider))
        .json(&payload)
        .send()
        .await
        .map_err(|e| Error::Provider(describe_request_error(request.provider, &e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let details = response.text().await.unwrap_or_default();
        return Err(Error::Provider(format!(
            "Ollama HTTP Error {}: {}",
            status.as_u16(),
            details
        )));
    }

    let data: Value = response
        .json()
        .await
        .map_err(|e| Error::Provider(format!("Invalid response payload: {}", e)))?;

    data["message"]["content"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| Error::Provider("Unexpected Ollama API response format".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::MessageRole;
    use crate::providers::ProviderMessage;

    fn request() -> ProviderRequest {
        ProviderRequest {
            provider: Provider::Ollama,
            model: "llama3".into(),
            api_key: None,
            endpoint_url: None,
            messages: vec![ProviderMessage::text(MessageRole::User, "hello")],
            vision_enabled: true,
        }
    }

    #[test]
    fn test_images_travel_in_per_message_array() {
        let mut req = request();
        req.messages[0].parts.push(AttachmentPart::Image {
            mime_type: "image/png".into(),
            base64: "aW1n".into(),
            filename: "shot.png".into(),
        });

        let messages = build_messages(&req);
        assert_eq!(messages[0]["content"], "hello");
        assert_eq!(messages[0]["images"][0], "aW1n");
    }

    #[test]
    fn test_documents_append_to_content() {
        let mut req = request();
        req.messages[0].parts.push(AttachmentPart::TextDocument {
            filename: "data.csv".into(),
            content: "a,b,c".into(),
        });

        let messages = build_messages(&req);
        let content = messages[0]["content"].as_str().unwrap();
        assert!(content.starts_with("hello"));
        assert!(content.contains("[File: data.csv]"));
        assert!(messages[0].get("images").is_none());
    }

    #[test]
    fn test_final_usage_from_eval_counts() {
        let chunk = json!({ "done": true, "prompt_eval_count": 20, "eval_count": 30 });
        let usage = parse_final_usage(&chunk).unwrap();
        assert_eq!(usage.total_tokens, 50);
        assert!(parse_final_usage(&json!({"done": true})).is_none());
    }

    #[test]
    fn test_default_endpoint() {
        assert_eq!(endpoint(&request()), "http://localhost:11434/api/chat");
    }
}
