//! Frame — the universal message type on the relay.
//!
//! ARCHITECTURE
//! ============
//! Every message a session exchanges with the relay is a Frame. The relay
//! routes on the `room`, `to`, and `syscall` fields and never inspects
//! `data`. Components own disjoint syscall namespaces within a room:
//! `room:`, `peer:`, `canvas:`, `board:`. Transport liveness is also
//! expressed as frames (`session:connected`, `session:disconnected`).
//!
//! DESIGN
//! ======
//! - Flat data: payload is always `Map<String, Value>`.
//! - Replies correlate to requests via `parent_id`.
//! - `from` is stamped by the relay; clients cannot spoof it.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::warn;
use uuid::Uuid;

use crate::ids::{ClientId, RoomId};

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key for the retryable flag on error frames.
pub const FRAME_RETRYABLE: &str = "retryable";

// =============================================================================
// SYSCALLS
// =============================================================================

pub const SESSION_CONNECTED: &str = "session:connected";
pub const SESSION_DISCONNECTED: &str = "session:disconnected";

pub const ROOM_JOIN: &str = "room:join";
pub const ROOM_LEAVE: &str = "room:leave";
pub const ROOM_MEMBER_JOINED: &str = "room:member_joined";
pub const ROOM_MEMBER_LEFT: &str = "room:member_left";

pub const PEER_SIGNAL: &str = "peer:signal";

pub const CANVAS_DRAW: &str = "canvas:draw";
pub const CANVAS_UNDO: &str = "canvas:undo";
pub const CANVAS_CLEAR: &str = "canvas:clear";
pub const CANVAS_HISTORY_REQUEST: &str = "canvas:history_request";
pub const CANVAS_HISTORY: &str = "canvas:history";

pub const BOARD_UPDATED: &str = "board:updated";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// Lifecycle position of a frame.
///
/// Room control is `request → done` or `request → error`. Broadcast
/// traffic (canvas, signals, board echoes) is request-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Done,
    Error,
}

/// The universal message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
    #[serde(default)]
    pub from: Option<ClientId>,
    /// Addressee within the room. `None` means every other member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ClientId>,
    pub syscall: String,
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create a request frame.
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            room: None,
            from: None,
            to: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    /// Create a done response carrying data. Terminal.
    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.reply(Status::Done, data)
    }

    /// Create a structured error response from a typed error. Terminal.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_CODE.into(), serde_json::Value::String(err.error_code().to_string()));
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(err.to_string()));
        data.insert(FRAME_RETRYABLE.into(), serde_json::Value::Bool(err.retryable()));
        self.reply(Status::Error, data)
    }

    /// Build a reply frame. Inherits `parent_id`, `room`, and `syscall`.
    fn reply(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            room: self.room.clone(),
            from: None,
            to: None,
            syscall: self.syscall.clone(),
            status,
            data,
        }
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_room(mut self, room: RoomId) -> Self {
        self.room = Some(room);
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: ClientId) -> Self {
        self.from = Some(from);
        self
    }

    #[must_use]
    pub fn with_to(mut self, to: ClientId) -> Self {
        self.to = Some(to);
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl Frame {
    /// Routing namespace: the syscall up to the first ':'.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.syscall.split_once(':').map_or(self.syscall.as_str(), |(prefix, _)| prefix)
    }

    /// Deserialize one data field into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::Missing`] if the key is absent and
    /// [`FieldError::Invalid`] if it does not deserialize as `T`.
    pub fn field<T: DeserializeOwned>(&self, key: &'static str) -> Result<T, FieldError> {
        let value = self.data.get(key).ok_or(FieldError::Missing(key))?;
        serde_json::from_value(value.clone()).map_err(|e| FieldError::Invalid { key, reason: e.to_string() })
    }

    /// Error message carried by an error frame, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.data.get(FRAME_MESSAGE).and_then(|v| v.as_str())
    }

    /// Error code carried by an error frame, if any.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.data.get(FRAME_CODE).and_then(|v| v.as_str())
    }
}

/// Failure to read a typed field out of a frame payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("missing field: {0}")]
    Missing(&'static str),
    #[error("invalid field {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ErrorCode for FieldError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing(_) => "E_FIELD_MISSING",
            Self::Invalid { .. } => "E_FIELD_INVALID",
        }
    }
}

/// Serialize a value into a JSON payload value, falling back to `null`.
pub(crate) fn to_value(value: &impl Serialize) -> serde_json::Value {
    match serde_json::to_value(value) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "frame: payload not serializable, sending null");
            serde_json::Value::Null
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
