use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use posflow::InboundMessage;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::flow_manager::FlowManager;
use crate::types::ServerMessage;

/// WebSocket handler streaming flow events and accepting operator decisions
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(manager): State<Arc<FlowManager>>,
) -> Response {
    info!("🔌 WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, manager))
}

async fn handle_socket(socket: WebSocket, manager: Arc<FlowManager>) {
    info!("✅ WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut events = manager.subscribe();
    let mut forwarded = 0usize;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                error!("❌ Failed to serialize event: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = sender.send(Message::Text(text.into())).await {
                            warn!("❌ Failed to send WebSocket message: {}", e);
                            break;
                        }
                        forwarded += 1;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("⚠️ WebSocket lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => {
                        info!("📡 Event channel closed, ending WebSocket");
                        break;
                    }
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_text(&manager, text.as_str()) {
                            match serde_json::to_string(&reply) {
                                Ok(reply) => {
                                    let _ = sender.send(Message::Text(reply.into())).await;
                                }
                                Err(e) => error!("❌ Failed to serialize reply: {}", e),
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("🔌 WebSocket close received");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("❌ WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("🔌 WebSocket stream ended");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("🔌 WebSocket disconnected after forwarding {} events", forwarded);
}

fn handle_text(manager: &FlowManager, text: &str) -> Option<ServerMessage> {
    if text.trim() == "ping" {
        return Some(ServerMessage::Pong);
    }
    match InboundMessage::parse(text)? {
        InboundMessage::Ping => Some(ServerMessage::Pong),
        InboundMessage::StepResponse(resolution) => {
            debug!("Operator response: {:?}", resolution.action);
            if manager.context().deliver_resolution(resolution) {
                None
            } else {
                Some(ServerMessage::Error {
                    message: "No step is waiting for a response".to_string(),
                })
            }
        }
    }
}
