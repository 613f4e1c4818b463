//! Transport — the session's handle on the relay.
//!
//! SYSTEM CONTEXT
//! ==============
//! A session owns one `Arc<dyn Transport>` for sending and one
//! `mpsc::Receiver<Frame>` for receiving. The relay side may be the axum
//! WebSocket server (`ws`) or the in-process `memory` relay; the session
//! cannot tell them apart. Liveness arrives in-band as `session:connected`
//! and `session:disconnected` frames on the receiver.
//!
//! Sends that fail with `Unavailable` are queued in the session's `Outbox`
//! and retried with backoff.

pub mod memory;
pub mod outbox;
pub mod ws;

use serde::{Deserialize, Serialize};

use crate::frame::{ErrorCode, Frame};
use crate::ids::ClientId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable")]
    Unavailable,
    #[error("transport closed")]
    Closed,
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
}

impl ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable => "E_TRANSPORT_UNAVAILABLE",
            Self::Closed => "E_TRANSPORT_CLOSED",
            Self::InvalidUrl(_) => "E_INVALID_URL",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

/// Link health as reported to the session's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Reconnecting,
    Disconnected,
}

/// Outbound half of a relay connection.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    fn client_id(&self) -> &ClientId;

    /// Hand one frame to the relay.
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;
}
