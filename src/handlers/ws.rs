//! Outcome stream for passive subscribers

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::services::outcome_sink::BroadcastSink;

pub async fn outcomes_ws(ws: WebSocketUpgrade, State(outcomes): State<BroadcastSink>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, outcomes))
}

async fn handle_socket(mut socket: WebSocket, outcomes: BroadcastSink) {
    let mut rx = outcomes.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(outcome) => {
                    let msg = match serde_json::to_string(&outcome) {
                        Ok(msg) => msg,
                        Err(err) => {
                            warn!(error = %err, "failed to serialize outcome");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(msg)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "outcome subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) if text.trim() == "ping" => {
                    if socket.send(Message::Text("pong".to_string())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("outcome subscriber disconnected");
}
