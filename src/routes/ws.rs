//! WebSocket handler — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, registers the client with the relay core and enters a
//! `select!` loop:
//! - Incoming client frames → parse → `RelayCore::dispatch`
//! - Frames routed to this client by the core → forward to the socket
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → core sends `session:connected`
//! 2. Client frames are routed by room, `to`, and syscall prefix
//! 3. Close (graceful or not) → core performs the leave → `member_left`
//! 4. Eviction by the core (queue overflow) closes the channel → socket closed

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::frame::{Data, Frame};
use crate::ids::ClientId;
use crate::state::RelayState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<RelayState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(client_id) = params.get("client_id").filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "client_id required").into_response();
    };
    let client_id = ClientId::from(client_id.as_str());
    let name = params.get("name").cloned().unwrap_or_else(|| client_id.to_string());

    ws.on_upgrade(move |socket| run_ws(socket, state, client_id, name))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: RelayState, client_id: ClientId, name: String) {
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_queue.max(1));

    if let Err(e) = state.core.lock().await.connect(&client_id, &name, client_tx) {
        warn!(%client_id, error = %e, "ws: connection refused");
        let refusal = Frame::request("session:error", Data::new()).error_from(&e);
        if send_frame(&mut socket, &refusal).await.is_err() {
            debug!(%client_id, "ws: refusal not delivered");
        }
        return;
    }
    info!(%client_id, %name, "ws: client connected");

    let mut evicted = false;
    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => process_inbound_text(&state, &client_id, text.as_str()).await,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            frame = client_rx.recv() => {
                let Some(frame) = frame else {
                    evicted = true;
                    break;
                };
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    // An evicted client is already released; its id may be live again.
    if evicted {
        warn!(%client_id, "ws: client evicted by relay");
    } else {
        state.core.lock().await.disconnect(&client_id);
    }
    info!(%client_id, "ws: client disconnected");
}

/// Parse one inbound text frame and hand it to the relay core. Invalid JSON
/// is logged and dropped.
async fn process_inbound_text(state: &RelayState, client_id: &ClientId, text: &str) {
    match serde_json::from_str::<Frame>(text) {
        Ok(frame) => state.core.lock().await.dispatch(client_id, frame),
        Err(e) => warn!(%client_id, error = %e, "ws: invalid inbound frame"),
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
