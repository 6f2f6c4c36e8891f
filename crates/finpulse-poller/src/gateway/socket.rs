//! WebSocket handling for dashboard connections

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use finpulse_common::{ClientAction, ClientMessage, ServerMessage};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, info, warn};

use super::{broadcast_metrics, AppState, ConnectionSession, METRICS_ENDPOINT};
use crate::orchestrator::MessageSink;

pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session = Arc::new(ConnectionSession::new());
    let session_id = session.id();
    state.sessions.insert(session_id, session.clone());
    state.telemetry.active_connections.inc();
    info!(session = %session_id, "Dashboard connected");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut broadcast_rx = state.broadcast_tx.subscribe();

    let poll_loop = state
        .orchestrator
        .spawn_connection_loop(tx.clone(), session.token());

    let mut send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                direct = rx.recv() => match direct {
                    Some(m) => m,
                    None => break,
                },
                shared = broadcast_rx.recv() => match shared {
                    Ok(m) => m,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Connection lagging behind broadcasts");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Dropping unserializable message");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let state = recv_state.clone();
                    let sink = tx.clone();
                    let token = recv_session.token();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = token.cancelled() => {}
                            _ = handle_client_message(&state, &sink, &text) => {}
                        }
                    });
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let closing = session.token();
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
        _ = closing.cancelled() => {
            send_task.abort();
            recv_task.abort();
        }
    }

    session.close();
    let _ = poll_loop.await;
    state.telemetry.active_connections.dec();
    state.sessions.remove(&session_id);
    info!(
        session = %session_id,
        connected_secs = (Utc::now() - session.opened_at()).num_seconds(),
        "Dashboard disconnected"
    );
}

/// Handle one text frame from a client
///
/// Every well-formed message is acknowledged first.
pub async fn handle_client_message(state: &AppState, sink: &MessageSink, text: &str) {
    let message = match ClientMessage::parse(text) {
        Ok(m) => m,
        Err(e) => {
            let _ = sink.send(ServerMessage::error(None, None, e.kind(), e.to_string()));
            return;
        }
    };
    let _ = sink.send(ServerMessage::ack(message.action.as_str()));
    debug!(action = message.action.as_str(), "Client message");

    let range = match message.date_range() {
        Ok(range) => range,
        Err(e) => {
            let _ = sink.send(ServerMessage::error(None, None, e.kind(), e.to_string()));
            return;
        }
    };

    match message.action {
        ClientAction::FetchMetrics => {
            let _ = sink.send(ServerMessage::status("Fetching usage data and computing metrics"));
            let outcome = state
                .metrics_service
                .compute(range)
                .await
                .and_then(|report| Ok(serde_json::to_value(&report)?));
            let reply = match outcome {
                Ok(data) => ServerMessage::data(METRICS_ENDPOINT, None, data),
                Err(e) => ServerMessage::error(
                    Some(METRICS_ENDPOINT.to_string()),
                    None,
                    e.kind(),
                    e.to_string(),
                ),
            };
            let _ = sink.send(reply);
        }
        ClientAction::Refresh => {
            let _ = sink.send(ServerMessage::status("Refreshing metrics for all connections"));
            if let Err(e) = broadcast_metrics(state, range).await {
                let _ = sink.send(ServerMessage::error(
                    Some(METRICS_ENDPOINT.to_string()),
                    None,
                    e.kind(),
                    e.to_string(),
                ));
            }
        }
        ClientAction::Unknown => {
            let _ = sink.send(ServerMessage::error(
                None,
                None,
                "validation",
                "Unknown action",
            ));
        }
    }
}
