//! Provider normalization and the SSE wire protocol.

use std::str::FromStr;

use fireside::models::chat::MessageRole;
use fireside::models::sse::ChatStreamFrame;
use fireside::providers::{Provider, ProviderMessage, Usage};
use uuid::Uuid;

#[test]
fn test_every_frame_kind_serializes_with_its_tag() {
    let id = Uuid::new_v4();
    let frames = vec![
        (
            ChatStreamFrame::SessionId { session_id: id },
            "session_id",
        ),
        (
            ChatStreamFrame::UserMessageId {
                message_id: 1,
                input_tokens: 4,
                tokens_estimated: true,
            },
            "user_message_id",
        ),
        (
            ChatStreamFrame::Content {
                content: "delta".into(),
            },
            "content",
        ),
        (
            ChatStreamFrame::Done {
                full_content: "all".into(),
                usage: Usage {
                    input_tokens: 4,
                    output_tokens: 2,
                    total_tokens: 6,
                    estimated: false,
                },
            },
            "done",
        ),
        (
            ChatStreamFrame::BotMessageId {
                message_id: 2,
                output_tokens: 2,
                tokens_estimated: false,
            },
            "bot_message_id",
        ),
        (
            ChatStreamFrame::Error {
                content: "boom".into(),
            },
            "error",
        ),
    ];

    for (frame, expected_tag) in frames {
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], expected_tag);
    }
}

#[test]
fn test_done_frame_matches_protocol_shape() {
    let frame = ChatStreamFrame::Done {
        full_content: "Hello there".into(),
        usage: Usage {
            input_tokens: 10,
            output_tokens: 3,
            total_tokens: 13,
            estimated: true,
        },
    };
    let json = serde_json::to_value(&frame).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "type": "done",
            "full_content": "Hello there",
            "usage": {
                "input_tokens": 10,
                "output_tokens": 3,
                "total_tokens": 13,
                "estimated": true
            }
        })
    );
}

#[test]
fn test_provider_labels_round_trip() {
    for provider in Provider::ALL {
        let parsed = Provider::from_str(provider.as_str()).unwrap();
        assert_eq!(parsed, provider);
    }
}

#[test]
fn test_legacy_lmstudio_label() {
    assert_eq!(
        Provider::from_str("lmstudio").unwrap(),
        Provider::from_str("lm_studio").unwrap()
    );
}

#[test]
fn test_provider_message_text_helper() {
    let msg = ProviderMessage::text(MessageRole::System, "guard");
    assert_eq!(msg.role, MessageRole::System);
    assert_eq!(msg.content.as_deref(), Some("guard"));
    assert!(msg.parts.is_empty());
    assert!(!msg.has_image());
}

#[test]
fn test_default_models_exist_for_cloud_providers() {
    for provider in [
        Provider::Gemini,
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Xai,
    ] {
        assert!(
            !provider.default_model_id().is_empty(),
            "{} has no default model",
            provider
        );
    }
    // Local providers are configured by URL, not a registry model id.
    assert!(Provider::LmStudio.default_model_id().is_empty());
    assert!(!Provider::LmStudio.default_local_url().is_empty());
    assert!(!Provider::Ollama.default_local_url().is_empty());
}
