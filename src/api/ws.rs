//! Duplex (WebSocket) channel
//!
//! One sequential loop per connection: a frame is fully processed before
//! the next one is read. The loop is generic over the inbound stream and the
//! outbound sink so it runs without a real socket in tests.

use super::types::WsParams;
use super::AppState;
use crate::runtime::{RuntimeError, SurveyRuntime};
use crate::state_machine::{Conversation, Customer, Message, Sender, Survey};
use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

const SURVEY_COMPLETED_REASON: &str = "Survey completed";

#[derive(Debug, Error)]
pub enum WsError {
    #[error("failed to send frame: {0}")]
    Send(String),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Frames pushed to the client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    State {
        conversation: Conversation,
        customer: Customer,
        survey: Survey,
    },
    History {
        messages: Vec<Message>,
    },
    Resumed {
        message: String,
    },
    Message {
        sender: Sender,
        content: String,
    },
    Completed {
        message: String,
        close_connection: bool,
        close_reason: String,
    },
    ReconnectSuccess {
        message: String,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    fn bot(content: impl Into<String>) -> Self {
        ServerFrame::Message {
            sender: Sender::Bot,
            content: content.into(),
        }
    }

    fn completed(message: impl Into<String>) -> Self {
        ServerFrame::Completed {
            message: message.into(),
            close_connection: true,
            close_reason: SURVEY_COMPLETED_REASON.to_string(),
        }
    }
}

/// Frames accepted from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    UserMessage(String),
    ReconnectConfirm,
}

#[derive(Debug, Deserialize)]
struct RawClientFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    content: Option<String>,
}

impl ClientFrame {
    /// Parse a text frame. The error is the message sent back to the client.
    pub fn parse(text: &str) -> Result<Self, String> {
        let raw: RawClientFrame =
            serde_json::from_str(text).map_err(|e| format!("Invalid message format: {e}"))?;

        match (raw.kind.as_deref(), raw.content) {
            (Some("reconnect_confirm"), _) => Ok(ClientFrame::ReconnectConfirm),
            (Some(other), _) if other != "message" => Err(format!("Unknown message type: {other}")),
            (_, Some(content)) if !content.trim().is_empty() => Ok(ClientFrame::UserMessage(content)),
            (_, Some(_)) => Err("Message content cannot be empty".to_string()),
            (_, None) => Err("Message must include content".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub reconnect: bool,
    pub close_grace: Duration,
}

pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(conversation_id): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    tracing::debug!(conv_id = %conversation_id, reconnect = params.reconnect, "Setting up websocket");
    let options = SessionOptions {
        reconnect: params.reconnect,
        close_grace: state.close_grace,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state.runtime, conversation_id, options))
}

async fn handle_socket(
    socket: WebSocket,
    runtime: SurveyRuntime,
    conversation_id: String,
    options: SessionOptions,
) {
    let (sender, receiver) = socket.split();
    if let Err(e) = run_session(&runtime, &conversation_id, options, receiver, sender).await {
        tracing::warn!(conv_id = %conversation_id, error = %e, "Websocket session ended with error");
    }
}

/// Drive one duplex session until the client leaves or the survey completes
pub async fn run_session<St, Si>(
    runtime: &SurveyRuntime,
    conversation_id: &str,
    options: SessionOptions,
    mut inbound: St,
    mut outbound: Si,
) -> Result<(), WsError>
where
    St: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
    Si: Sink<WsMessage> + Unpin,
    Si::Error: std::fmt::Display,
{
    let session = match runtime.load_session(conversation_id).await {
        Ok(session) => session,
        Err(e) => {
            let message = match e {
                RuntimeError::NotFound(_) => "Conversation not found".to_string(),
                other => other.to_string(),
            };
            send_frame(&mut outbound, &ServerFrame::error(message)).await?;
            return close(&mut outbound, close_code::POLICY, "Conversation unavailable").await;
        }
    };

    let is_completed = session.conversation.is_completed();
    let has_history = !session.conversation.messages.is_empty();
    let pending = session.pending_prompt();
    let messages = session.conversation.messages.clone();

    send_frame(
        &mut outbound,
        &ServerFrame::State {
            conversation: session.conversation,
            customer: session.customer,
            survey: session.survey,
        },
    )
    .await?;
    send_frame(&mut outbound, &ServerFrame::History { messages }).await?;

    if is_completed {
        send_frame(
            &mut outbound,
            &ServerFrame::completed("This survey has already been completed."),
        )
        .await?;
        return close(&mut outbound, close_code::NORMAL, SURVEY_COMPLETED_REASON).await;
    }

    if has_history {
        if let Some(prompt) = pending {
            send_frame(&mut outbound, &ServerFrame::Resumed { message: prompt }).await?;
        }
    } else {
        match runtime.send_opening(conversation_id).await {
            // The deferred opening got there first
            Ok(utterances) if utterances.is_empty() => {
                if let Some(prompt) = pending {
                    send_frame(&mut outbound, &ServerFrame::Resumed { message: prompt }).await?;
                }
            }
            Ok(utterances) => {
                for utterance in utterances {
                    send_frame(&mut outbound, &ServerFrame::bot(utterance)).await?;
                }
            }
            Err(e) => {
                tracing::warn!(conv_id = %conversation_id, error = %e, "Failed to send opening");
                send_frame(&mut outbound, &ServerFrame::error(e.to_string())).await?;
            }
        }
    }

    tracing::info!(conv_id = %conversation_id, reconnect = options.reconnect, "Websocket session open");

    while let Some(frame) = inbound.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(WsMessage::Binary(_)) => {
                send_frame(&mut outbound, &ServerFrame::error("Binary frames are not supported")).await?;
                continue;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(conv_id = %conversation_id, error = %e, "Websocket receive failed");
                break;
            }
        };

        let content = match ClientFrame::parse(&text) {
            Ok(ClientFrame::ReconnectConfirm) => {
                send_frame(
                    &mut outbound,
                    &ServerFrame::ReconnectSuccess {
                        message: "Successfully reconnected to the conversation".to_string(),
                    },
                )
                .await?;
                continue;
            }
            Ok(ClientFrame::UserMessage(content)) => content,
            Err(message) => {
                send_frame(&mut outbound, &ServerFrame::error(message)).await?;
                continue;
            }
        };

        match handle_turn(runtime, conversation_id, &content).await {
            Ok((utterances, completed)) => {
                for utterance in utterances {
                    send_frame(&mut outbound, &ServerFrame::bot(utterance)).await?;
                }
                if completed {
                    send_frame(
                        &mut outbound,
                        &ServerFrame::completed("Thank you for completing the survey!"),
                    )
                    .await?;
                    if !options.close_grace.is_zero() {
                        tokio::time::sleep(options.close_grace).await;
                    }
                    return close(&mut outbound, close_code::NORMAL, SURVEY_COMPLETED_REASON).await;
                }
            }
            Err(e) => {
                tracing::warn!(conv_id = %conversation_id, error = %e, "Websocket turn failed");
                send_frame(&mut outbound, &ServerFrame::error(turn_error_message(&e))).await?;
            }
        }
    }

    tracing::info!(conv_id = %conversation_id, "Websocket session closed by client");
    Ok(())
}

async fn handle_turn(
    runtime: &SurveyRuntime,
    conversation_id: &str,
    content: &str,
) -> Result<(Vec<String>, bool), RuntimeError> {
    runtime.record_user_message(conversation_id, content).await?;
    let outcome = runtime.process_turn(conversation_id, content).await?;
    let completed = outcome.is_completed();
    let utterances = outcome.utterances().into_iter().map(String::from).collect();
    Ok((utterances, completed))
}

fn turn_error_message(e: &RuntimeError) -> String {
    if e.is_transient() {
        "Database service is currently unavailable. Please try again later.".to_string()
    } else {
        e.to_string()
    }
}

async fn send_frame<Si>(outbound: &mut Si, frame: &ServerFrame) -> Result<(), WsError>
where
    Si: Sink<WsMessage> + Unpin,
    Si::Error: std::fmt::Display,
{
    let text = serde_json::to_string(frame)?;
    outbound
        .send(WsMessage::Text(text))
        .await
        .map_err(|e| WsError::Send(e.to_string()))
}

async fn close<Si>(outbound: &mut Si, code: u16, reason: &'static str) -> Result<(), WsError>
where
    Si: Sink<WsMessage> + Unpin,
    Si::Error: std::fmt::Display,
{
    outbound
        .send(WsMessage::Close(Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        })))
        .await
        .map_err(|e| WsError::Send(e.to_string()))
}
