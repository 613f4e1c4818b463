//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The relay exposes a health probe and one WebSocket endpoint. Everything
//! else is frames over that socket.

pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::state::RelayState;

/// Relay router: `GET /healthz`, `GET /ws?client_id=…&name=…`.
pub fn app(state: RelayState) -> Router {
    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
