//! Relay core — room-scoped frame routing shared by every relay front end.
//!
//! DESIGN
//! ======
//! `RelayCore` owns the authoritative `MembershipManager` and one outbound
//! channel per connected client. It is synchronous: routing is a lookup plus
//! `try_send`, so the axum server and the in-process relay both drive it
//! behind a `tokio::sync::Mutex`.
//!
//! ROUTING
//! =======
//! - `room:join` / `room:leave` are handled here; the caller gets a `done`
//!   reply and the other members get `room:member_joined` / `member_left`.
//! - `peer:`, `canvas:`, `board:` frames require membership in `frame.room`.
//!   A frame with `to` goes to that member only; otherwise it is broadcast
//!   to every other member.
//! - `from` is always overwritten with the sending client.
//!
//! Failures are answered with an error frame to the sender only.
//!
//! A client whose queue is full is evicted instead of losing the frame.
//! Its channel closes and its peers see `member_left`. The client recovers by
//! reconnecting and rejoining, which replays canvas history and refetches
//! the board.
//!
//! LIFECYCLE
//! =========
//! connect → `session:connected` to the client; disconnect (graceful or
//! not) performs the leave, so peers always see `member_left`.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::frame::{
    Data, ErrorCode, FieldError, Frame, ROOM_JOIN, ROOM_LEAVE, ROOM_MEMBER_JOINED, ROOM_MEMBER_LEFT,
    SESSION_CONNECTED, to_value,
};
use crate::ids::{ClientId, RoomId};
use crate::services::membership::{LeaveOutcome, Member, MembershipError, MembershipManager};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("client already connected: {0}")]
    DuplicateClient(ClientId),
    #[error("frame has no room")]
    MissingRoom,
    #[error("unknown prefix: {0}")]
    UnknownPrefix(String),
    #[error("addressee {0} is not in the room")]
    UnknownAddressee(ClientId),
    #[error(transparent)]
    Membership(#[from] MembershipError),
    #[error(transparent)]
    Field(#[from] FieldError),
}

impl ErrorCode for RelayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateClient(_) => "E_DUPLICATE_CLIENT",
            Self::MissingRoom => "E_MISSING_ROOM",
            Self::UnknownPrefix(_) => "E_UNKNOWN_PREFIX",
            Self::UnknownAddressee(_) => "E_UNKNOWN_ADDRESSEE",
            Self::Membership(e) => e.error_code(),
            Self::Field(e) => e.error_code(),
        }
    }
}

struct Connection {
    display_name: String,
    tx: mpsc::Sender<Frame>,
}

// =============================================================================
// CORE
// =============================================================================

#[derive(Default)]
pub struct RelayCore {
    membership: MembershipManager,
    clients: HashMap<ClientId, Connection>,
    /// Clients whose queue overflowed during the current operation.
    stalled: Vec<ClientId>,
}

impl RelayCore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client connection and greet it with `session:connected`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateClient`] if the id is already live.
    pub fn connect(&mut self, client: &ClientId, display_name: &str, tx: mpsc::Sender<Frame>) -> Result<(), RelayError> {
        if self.clients.contains_key(client) {
            return Err(RelayError::DuplicateClient(client.clone()));
        }
        let welcome = Frame::request(SESSION_CONNECTED, Data::new()).with_data("client_id", client.as_str());
        if let Err(e) = tx.try_send(welcome) {
            warn!(%client, error = %e, "relay: welcome not delivered");
        }
        self.clients.insert(client.clone(), Connection { display_name: display_name.to_owned(), tx });
        info!(%client, "relay: client connected");
        Ok(())
    }

    /// Drop a client connection and release its room.
    pub fn disconnect(&mut self, client: &ClientId) -> Option<LeaveOutcome> {
        let outcome = self.release(client);
        self.evict_stalled();
        outcome
    }

    fn release(&mut self, client: &ClientId) -> Option<LeaveOutcome> {
        self.clients.remove(client)?;
        let outcome = self.membership.disconnect(client);
        if let Some(outcome) = &outcome {
            self.announce_leave(outcome);
        }
        info!(%client, left_room = outcome.is_some(), "relay: client disconnected");
        outcome
    }

    /// Disconnect every client that could not keep up. Each eviction
    /// announces a leave, which can stall further clients.
    fn evict_stalled(&mut self) {
        while let Some(client) = self.stalled.pop() {
            if self.clients.contains_key(&client) {
                warn!(%client, "relay: evicting slow client");
                self.release(&client);
            }
        }
    }

    /// Route one inbound frame from `client`.
    pub fn dispatch(&mut self, client: &ClientId, mut frame: Frame) {
        frame.from = Some(client.clone());
        debug!(%client, syscall = %frame.syscall, "relay: recv frame");

        let result = match frame.prefix() {
            "room" => self.handle_room(client, &frame),
            "peer" | "canvas" | "board" => self.forward(client, &frame),
            other => Err(RelayError::UnknownPrefix(other.to_owned())),
        };

        if let Err(e) = result {
            warn!(%client, syscall = %frame.syscall, error = %e, "relay: frame rejected");
            self.deliver(client, frame.error_from(&e));
        }
        self.evict_stalled();
    }

    // -------------------------------------------------------------------------
    // ROOM CONTROL
    // -------------------------------------------------------------------------

    fn handle_room(&mut self, client: &ClientId, frame: &Frame) -> Result<(), RelayError> {
        let room = frame_room(frame)?;
        match frame.syscall.as_str() {
            ROOM_JOIN => {
                let name = frame
                    .field::<String>("display_name")
                    .ok()
                    .or_else(|| self.clients.get(client).map(|c| c.display_name.clone()))
                    .unwrap_or_else(|| client.to_string());
                let outcome = self.membership.join(&room, client, &name)?;
                if let Some(previous) = &outcome.previous {
                    self.announce_leave(previous);
                }

                let mut reply = Data::new();
                reply.insert("members".into(), to_value(&outcome.members));
                self.deliver(client, frame.done_with(reply).with_room(room.clone()));

                let joined = presence_frame(ROOM_MEMBER_JOINED, &room, &outcome.member);
                for peer in &outcome.notify {
                    self.deliver(peer, joined.clone());
                }
                Ok(())
            }
            ROOM_LEAVE => {
                let outcome = self.membership.leave(&room, client)?;
                self.deliver(client, frame.done_with(Data::new()));
                self.announce_leave(&outcome);
                Ok(())
            }
            _ => Err(RelayError::UnknownPrefix(frame.syscall.clone())),
        }
    }

    fn announce_leave(&mut self, outcome: &LeaveOutcome) {
        let left = presence_frame(ROOM_MEMBER_LEFT, &outcome.room, &outcome.member);
        for peer in &outcome.notify {
            self.deliver(peer, left.clone());
        }
    }

    // -------------------------------------------------------------------------
    // ROOM TRAFFIC
    // -------------------------------------------------------------------------

    fn forward(&mut self, client: &ClientId, frame: &Frame) -> Result<(), RelayError> {
        let room = frame_room(frame)?;
        self.membership.ensure_member(&room, client)?;

        if let Some(to) = &frame.to {
            if self.membership.ensure_member(&room, to).is_err() {
                return Err(RelayError::UnknownAddressee(to.clone()));
            }
            self.deliver(to, frame.clone());
            return Ok(());
        }

        let members = self.membership.members(&room)?;
        let mut count = 0_usize;
        for member in members.iter().filter(|m| m.client_id != *client) {
            self.deliver(&member.client_id, frame.clone());
            count += 1;
        }
        debug!(%room, %client, syscall = %frame.syscall, count, "relay: broadcast");
        Ok(())
    }

    fn deliver(&mut self, client: &ClientId, frame: Frame) {
        let Some(conn) = self.clients.get(client) else {
            return;
        };
        match conn.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                warn!(%client, syscall = %frame.syscall, "relay: client queue full");
                self.stalled.push(client.clone());
            }
            Err(TrySendError::Closed(frame)) => {
                debug!(%client, syscall = %frame.syscall, "relay: client channel closed, frame dropped");
            }
        }
    }

    // -------------------------------------------------------------------------
    // QUERIES
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`MembershipError::RoomNotFound`] for unknown rooms.
    pub fn members(&self, room: &RoomId) -> Result<Vec<Member>, MembershipError> {
        self.membership.members(room)
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.membership.room_count()
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_connected(&self, client: &ClientId) -> bool {
        self.clients.contains_key(client)
    }
}

fn frame_room(frame: &Frame) -> Result<RoomId, RelayError> {
    frame.room.clone().ok_or(RelayError::MissingRoom)
}

fn presence_frame(syscall: &str, room: &RoomId, member: &Member) -> Frame {
    Frame::request(syscall, Data::new())
        .with_room(room.clone())
        .with_from(member.client_id.clone())
        .with_data("member", to_value(member))
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
