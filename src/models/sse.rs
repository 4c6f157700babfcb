use serde::Serialize;
use uuid::Uuid;

use crate::providers::Usage;

/// Wire frames emitted over the chat SSE response, one JSON object per
/// `data:` line. The tag/field names are part of the client protocol.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamFrame {
    SessionId {
        session_id: Uuid,
    },
    UserMessageId {
        message_id: i64,
        input_tokens: i32,
        tokens_estimated: bool,
    },
    Content {
        content: String,
    },
    Done {
        full_content: String,
        usage: Usage,
    },
    BotMessageId {
        message_id: i64,
        output_tokens: i32,
        tokens_estimated: bool,
    },
    Error {
        content: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_frame_shape() {
        let frame = ChatStreamFrame::Content {
            content: "hello".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json, serde_json::json!({"type": "content", "content": "hello"}));
    }

    #[test]
    fn test_session_id_frame_shape() {
        let id = Uuid::new_v4();
        let frame = ChatStreamFrame::SessionId { session_id: id };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "session_id");
        assert_eq!(json["session_id"], id.to_string());
    }

    #[test]
    fn test_done_frame_carries_usage() {
        let frame = ChatStreamFrame::Done {
            full_content: "abc".into(),
            usage: Usage {
                input_tokens: 3,
                output_tokens: 5,
                total_tokens: 8,
                estimated: false,
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["usage"]["total_tokens"], 8);
        assert_eq!(json["usage"]["estimated"], false);
    }

    #[test]
    fn test_bot_message_id_frame_shape() {
        let frame = ChatStreamFrame::BotMessageId {
            message_id: 7,
            output_tokens: 12,
            tokens_estimated: true,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "bot_message_id",
                "message_id": 7,
                "output_tokens": 12,
                "tokens_estimated": true
            })
        );
    }
}
