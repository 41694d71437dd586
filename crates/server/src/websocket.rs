//! WebSocket handler: demultiplexes the socket into the pipeline's
//! transport-agnostic `InboundEvent` stream, and implements `OutboundSink`
//! over the socket's write half.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};

use voice_agent_pipeline::{
    ConversationOrchestrator, InboundControl, InboundEvent, OutboundFrame, OutboundMessage,
    OutboundSink, PipelineError, TurnPersistence,
};

use crate::metrics::record_ws_connection;
use crate::session::{MessageRole, SessionStore};
use crate::state::AppState;

const MISSING_DEVICE_ID: u16 = 1008;
const SUPERSEDED_CONNECTION: u16 = 4000;
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful, concise voice assistant.";

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    session_id: Option<String>,
    device_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let Some(device_id) = query.device_id.filter(|d| !d.is_empty()) else {
        return ws
            .on_upgrade(move |socket| close_immediately(socket, MISSING_DEVICE_ID))
            .into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, device_id, query.session_id))
}

async fn close_immediately(mut socket: WebSocket, code: u16) {
    let _ = socket
        .send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
            code,
            reason: "device_id is required".into(),
        })))
        .await;
}

struct SessionPersistence {
    sessions: Arc<dyn SessionStore>,
}

impl TurnPersistence for SessionPersistence {
    fn append_user_message(&self, session_id: &str, text: &str) {
        if let Err(e) = self.sessions.append_message(session_id, MessageRole::User, text) {
            tracing::warn!("failed to persist user message: {e}");
        }
    }

    fn append_assistant_message(&self, session_id: &str, text: &str) {
        if let Err(e) = self.sessions.append_message(session_id, MessageRole::Assistant, text) {
            tracing::warn!("failed to persist assistant message: {e}");
        }
    }

    fn message_count(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map(|s| s.message_count()).unwrap_or(0)
    }

    fn set_auto_title(&self, session_id: &str, title: &str) {
        if let Err(e) = self.sessions.set_title(session_id, title) {
            tracing::warn!("failed to set auto title: {e}");
        }
    }
}

struct AxumOutboundSink {
    sender: Mutex<futures::stream::SplitSink<WebSocket, WsMessage>>,
}

impl AxumOutboundSink {
    async fn close(&self, code: u16, reason: &str) {
        let mut sender = self.sender.lock().await;
        let _ = sender
            .send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
                code,
                reason: reason.to_string().into(),
            })))
            .await;
    }
}

#[async_trait]
impl OutboundSink for AxumOutboundSink {
    async fn send(&self, message: OutboundMessage) -> Result<(), PipelineError> {
        let mut sender = self.sender.lock().await;
        let result = match message {
            OutboundMessage::Frame(frame) => {
                let text = serde_json::to_string(&frame)
                    .map_err(|e| PipelineError::Orchestrator(e.to_string()))?;
                sender.send(WsMessage::Text(text)).await
            }
            OutboundMessage::Pcm(bytes) => sender.send(WsMessage::Binary(bytes)).await,
        };
        result.map_err(|e| PipelineError::Orchestrator(e.to_string()))
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, device_id: String, session_id: Option<String>) {
    record_ws_connection();

    let session = match session_id.filter(|id| !id.is_empty()).and_then(|id| state.sessions.get(&id)) {
        Some(session) => session,
        None => state.sessions.create(),
    };
    *session.device_id.write() = Some(device_id.clone());
    let session_id = session.id.clone();

    let (evict_tx, mut evict_rx) = mpsc::channel::<()>(1);
    let prior = state
        .active_connections_by_device
        .write()
        .insert(device_id.clone(), evict_tx);
    if let Some(prior) = prior {
        let _ = prior.send(()).await;
    }

    let (ws_sink, mut ws_source) = socket.split();
    let sink = Arc::new(AxumOutboundSink { sender: Mutex::new(ws_sink) });
    let sink_for_close = sink.clone();

    let persistence = Arc::new(SessionPersistence { sessions: state.sessions.clone() });

    let (event_tx, event_rx) = mpsc::channel::<InboundEvent>(256);

    let transcript_tx = event_tx.clone();
    let callback: voice_agent_pipeline::TranscriptCallback = Arc::new(move |text, is_final| {
        let tx = transcript_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(InboundEvent::Transcript { text, is_final }).await;
        });
    });

    let stt = Arc::new(state.build_stt_adapter(callback));
    let tts = Arc::new(state.build_tts_adapter());

    let orchestrator = ConversationOrchestrator::new(
        session_id.clone(),
        stt,
        state.llm_router.clone(),
        tts,
        sink,
        persistence,
        DEFAULT_SYSTEM_PROMPT.to_string(),
    );

    let reader = tokio::spawn(async move {
        while let Some(msg) = ws_source.next().await {
            let event = match msg {
                Ok(WsMessage::Binary(bytes)) => Some(InboundEvent::Binary(bytes)),
                Ok(WsMessage::Text(text)) => serde_json::from_str::<InboundControl>(&text)
                    .ok()
                    .map(InboundEvent::Control),
                Ok(WsMessage::Close(_)) | Err(_) => None,
                Ok(_) => continue,
            };
            let Some(event) = event else { break };
            if event_tx.send(event).await.is_err() {
                break;
            }
        }
    });

    let inbound = Box::pin(tokio_stream::wrappers::ReceiverStream::new(event_rx));

    tokio::select! {
        _ = orchestrator.run(inbound) => {}
        _ = evict_rx.recv() => {
            tracing::info!(device_id = %device_id, "connection superseded by a newer one");
            sink_for_close.close(SUPERSEDED_CONNECTION, "superseded by a newer connection").await;
        }
    }

    reader.abort();

    let mut connections = state.active_connections_by_device.write();
    if let std::collections::hash_map::Entry::Occupied(entry) = connections.entry(device_id) {
        // Only remove if this connection is still the registered one; a
        // newer connection may have already replaced it.
        if entry.get().is_closed() {
            entry.remove();
        }
    }
}
