//! The chat turn endpoint: resolve -> transform -> retrieve -> stream ->
//! persist -> distill, fanned back to the client as SSE frames.

use axum::{
    Extension,
    extract::{Json, State},
    http::{HeaderName, HeaderValue},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::convert::Infallible;
use std::str::FromStr;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    middleware::auth::AuthenticatedUser,
    models::chat::{Chat, MessageRole, NewMessage},
    models::requests::ChatRequest,
    models::sse::ChatStreamFrame,
    models::users::AgeGroup,
    providers::{self, Provider, ProviderMessage, StreamEvent},
    queries,
    services::chat as chat_service,
    services::{redactor, settings, tokens},
    state::AppState,
};

fn frame_event(frame: &ChatStreamFrame) -> Event {
    let data = serde_json::to_string(frame).unwrap_or_else(|e| {
        tracing::error!("[Chat] Failed to serialize SSE frame: {}", e);
        r#"{"type":"error","content":"internal serialization error"}"#.to_string()
    });
    Event::default().data(data)
}

/// POST /api/chat
///
/// Validation, redaction, persistence of the user turn and provider
/// resolution all happen before the stream opens, surfacing as HTTP
/// status codes. From the first SSE byte onward every failure downgrades
/// to an `error` frame on the open stream.
pub async fn chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<ChatRequest>,
) -> Result<Response> {
    let mut message_content = request.message.trim().to_string();

    if message_content.is_empty() && request.attachments.is_empty() {
        return Err(Error::Validation(
            "No message or attachments provided".to_string(),
        ));
    }

    // Legacy clients send "simply" meaning "my configured local provider".
    let provider_label = if request.model == "simply" {
        request
            .local_model_provider
            .clone()
            .unwrap_or_else(|| "lmstudio".to_string())
    } else {
        request.model.clone()
    };
    let provider = Provider::from_str(&provider_label).map_err(Error::Validation)?;

    let mut conn = state.pool.acquire().await.map_err(Error::Sqlx)?;

    // Input transformations: redaction first, then the age-group safety
    // prompt.
    if !message_content.is_empty() && settings::is_sensitive_filter_enabled(&mut conn).await {
        message_content = redactor::filter(&message_content);
    }

    let age_prompt = match user.age_group() {
        AgeGroup::Child | AgeGroup::Teen => {
            settings::age_based_system_prompt(&mut conn, user.age_group()).await
        }
        _ => None,
    };

    // Resolve or create the chat, enforcing ownership.
    let chat: Chat = match request.session_id {
        Some(session_id) => {
            let chat = queries::chats::get_chat_by_session_id(&mut conn, session_id)
                .await?
                .ok_or_else(|| Error::NotFound("Session not found".to_string()))?;
            if chat.user_id != user.id {
                return Err(Error::Forbidden("Not your chat".to_string()));
            }
            chat
        }
        None => {
            let name = chat_service::derive_chat_name(&message_content);
            queries::chats::create_chat(
                &mut conn,
                Uuid::new_v4(),
                &name,
                user.id,
                provider.as_str(),
                request.model_name.as_deref(),
            )
            .await?
        }
    };

    // Persist the user turn before any upstream contact.
    let input_tokens = tokens::count_tokens(&message_content) as i32;
    let stored_content = if message_content.is_empty() {
        "See attached files".to_string()
    } else {
        message_content.clone()
    };
    let user_msg = queries::messages::insert_message(
        &mut conn,
        NewMessage {
            chat_id: chat.id,
            role: MessageRole::User,
            content: stored_content,
            model_used: Some(
                request
                    .model_name
                    .clone()
                    .unwrap_or_else(|| provider.as_str().to_string()),
            ),
            input_tokens,
            output_tokens: 0,
            tokens_estimated: true,
        },
    )
    .await?;

    for meta in &request.attachments {
        queries::attachments::insert_attachment(
            &mut conn,
            crate::models::attachments::NewAttachment {
                message_id: user_msg.id,
                original_filename: meta.original_filename.clone(),
                stored_filename: meta.stored_filename.clone(),
                file_path: meta.file_path.clone(),
                mime_type: meta.mime_type.clone(),
                file_size: meta.file_size,
                file_type: meta.file_type.clone(),
            },
        )
        .await?;
    }

    // History assembly (includes the turn just persisted), with distilled
    // substitution when the flag is on.
    let use_distilled = settings::is_distilled_context_enabled(&mut conn).await;
    let native_pdf = provider == Provider::Anthropic;
    let history =
        chat_service::build_history(&state, &mut conn, chat.id, use_distilled, native_pdf).await?;

    // Retrieval: prepend document context unless the provider reads raw
    // documents natively. Retrieval failure never blocks the turn.
    let mut rag_prompt: Option<String> = None;
    if request.use_rag && !provider.accepts_native_documents() && !message_content.is_empty() {
        let ready_docs =
            queries::documents::count_ready_documents_for_user(&mut conn, user.id).await?;
        if ready_docs > 0 {
            match chat_service::retrieve_context(
                &state,
                &mut conn,
                user.id,
                &message_content,
                Some(provider),
                None,
                None,
                None,
            )
            .await
            {
                Ok(chunks) if !chunks.is_empty() => {
                    tracing::info!(
                        "[Chat] Retrieved {} chunks for user {}",
                        chunks.len(),
                        user.id
                    );
                    let context = chat_service::format_context_for_prompt(&chunks);
                    rag_prompt = Some(chat_service::rag_system_message(&context));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("[Chat] RAG retrieval failed: {}", e);
                }
            }
        }
    }

    // Ordered outbound conversation: safety prompt, retrieval context,
    // then the history.
    let mut outbound: Vec<ProviderMessage> = Vec::with_capacity(history.len() + 2);
    if let Some(prompt) = age_prompt {
        outbound.push(ProviderMessage::text(MessageRole::System, prompt));
    }
    if let Some(prompt) = rag_prompt {
        outbound.push(ProviderMessage::text(MessageRole::System, prompt));
    }
    outbound.extend(history);

    let provider_request = chat_service::resolve_provider_request(
        &state,
        &mut conn,
        provider,
        request.model_name.as_deref(),
        outbound,
        request.local_vision_enabled,
    )
    .await?;
    drop(conn);

    let distill_enabled = use_distilled;
    let session_id = chat.session_id;
    let chat_id = chat.id;
    let user_msg_id = user_msg.id;
    let model_name = request.model_name.clone();
    let user_content_for_distill = message_content.clone();
    let stream_state = state.clone();

    let frames = async_stream::stream! {
        yield ChatStreamFrame::SessionId { session_id };
        yield ChatStreamFrame::UserMessageId {
            message_id: user_msg_id,
            input_tokens,
            tokens_estimated: true,
        };

        let mut upstream = providers::stream(stream_state.http.clone(), provider_request);
        let mut full_content = String::new();
        let mut usage = None;
        let mut failed = false;

        while let Some(event) = upstream.next().await {
            match event {
                StreamEvent::Content(delta) => {
                    full_content.push_str(&delta);
                    yield ChatStreamFrame::Content { content: delta };
                }
                StreamEvent::Done { full_content: content, usage: reported } => {
                    full_content = content.clone();
                    usage = Some(reported);
                    yield ChatStreamFrame::Done {
                        full_content: content,
                        usage: reported,
                    };
                }
                StreamEvent::Error(message) => {
                    failed = true;
                    yield ChatStreamFrame::Error { content: message };
                }
            }
        }

        // Persist the assistant turn only after a clean terminal event.
        if !failed && !full_content.is_empty() {
            let usage = usage.unwrap_or_default();
            let persisted = async {
                let mut conn = stream_state.pool.acquire().await.map_err(Error::Sqlx)?;
                let bot_msg = queries::messages::insert_message(
                    &mut conn,
                    NewMessage {
                        chat_id,
                        role: MessageRole::Assistant,
                        content: full_content.clone(),
                        model_used: Some(
                            model_name
                                .clone()
                                .unwrap_or_else(|| provider.as_str().to_string()),
                        ),
                        input_tokens: 0,
                        output_tokens: usage.output_tokens,
                        tokens_estimated: usage.estimated,
                    },
                )
                .await?;
                queries::chats::touch_chat(&mut conn, chat_id).await?;
                Ok::<i64, Error>(bot_msg.id)
            }
            .await;

            match persisted {
                Ok(bot_msg_id) => {
                    if distill_enabled {
                        // Fire-and-forget; the client is not kept waiting
                        // on summarization.
                        tokio::spawn(chat_service::distill_exchange(
                            stream_state.clone(),
                            provider,
                            model_name.clone(),
                            user_msg_id,
                            bot_msg_id,
                            user_content_for_distill.clone(),
                            full_content.clone(),
                        ));
                    }
                    yield ChatStreamFrame::BotMessageId {
                        message_id: bot_msg_id,
                        output_tokens: usage.output_tokens,
                        tokens_estimated: usage.estimated,
                    };
                }
                Err(e) => {
                    tracing::error!("[Chat] Failed to persist assistant turn: {}", e);
                    yield ChatStreamFrame::Error {
                        content: format!("Error: {}", e),
                    };
                }
            }
        }
    };

    let sse_stream = frames.map(|frame| Ok::<Event, Infallible>(frame_event(&frame)));

    let mut response = Sse::new(sse_stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    headers.insert(
        HeaderName::from_static("connection"),
        HeaderValue::from_static("keep-alive"),
    );

    Ok(response)
}
