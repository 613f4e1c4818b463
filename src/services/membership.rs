//! Membership service — room admission, departure, and presence fan-out.
//!
//! DESIGN
//! ======
//! Rooms are ephemeral: a room exists from its first join until its last
//! member leaves, and is never persisted. A client holds at most one active
//! room; joining a second room leaves the first one cleanly before admission.
//!
//! The manager performs no I/O. Every mutation returns an outcome naming the
//! clients that must be told about it, and the caller (the relay) turns those
//! outcomes into `room:*` frames. This keeps presence deterministic and lets
//! the same code run inside the axum relay and the in-process relay.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::frame::ErrorCode;
use crate::ids::{ClientId, RoomId};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MembershipError {
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),
    #[error("client {client} is not a member of room {room}")]
    NotMember { room: RoomId, client: ClientId },
    #[error("client {client} already joined room {room}")]
    AlreadyJoined { client: ClientId, room: RoomId },
}

impl ErrorCode for MembershipError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::RoomNotFound(_) => "E_ROOM_NOT_FOUND",
            Self::NotMember { .. } => "E_NOT_MEMBER",
            Self::AlreadyJoined { .. } => "E_ALREADY_JOINED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Joined,
    Left,
}

/// One client's presence in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub client_id: ClientId,
    pub display_name: String,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone)]
struct Room {
    members: BTreeMap<ClientId, Member>,
}

/// Result of admitting a client into a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub room: RoomId,
    pub member: Member,
    /// Full member set delivered to the joiner, joiner included.
    pub members: Vec<Member>,
    /// Existing members that must receive `member_joined`.
    pub notify: Vec<ClientId>,
    /// Departure from the client's previous room, if it had one.
    pub previous: Option<LeaveOutcome>,
    /// `true` when the client was already in this room.
    pub rejoined: bool,
}

/// Result of removing a client from a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room: RoomId,
    /// The departed member, with status `Left`.
    pub member: Member,
    /// Remaining members that must receive `member_left`.
    pub notify: Vec<ClientId>,
    /// `true` when the room emptied and was discarded.
    pub room_discarded: bool,
}

// =============================================================================
// MANAGER
// =============================================================================

/// Authoritative registry of rooms and their members.
#[derive(Debug, Default)]
pub struct MembershipManager {
    rooms: HashMap<RoomId, Room>,
    active: HashMap<ClientId, RoomId>,
}

impl MembershipManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a room, leaving the client's previous room first if needed.
    ///
    /// # Errors
    ///
    /// Propagates errors from the implicit leave; admission itself cannot
    /// fail once the previous room has been released.
    pub fn join(&mut self, room: &RoomId, client: &ClientId, display_name: &str) -> Result<JoinOutcome, MembershipError> {
        match self.admit(room, client, display_name) {
            Err(MembershipError::AlreadyJoined { room: current, .. }) => {
                let previous = self.leave(&current, client)?;
                let mut outcome = self.admit(room, client, display_name)?;
                outcome.previous = Some(previous);
                Ok(outcome)
            }
            other => other,
        }
    }

    /// Admit a client that holds no other room.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::AlreadyJoined`] if the client is active in
    /// a different room.
    pub fn admit(&mut self, room: &RoomId, client: &ClientId, display_name: &str) -> Result<JoinOutcome, MembershipError> {
        if let Some(current) = self.active.get(client) {
            if current != room {
                return Err(MembershipError::AlreadyJoined { client: client.clone(), room: current.clone() });
            }
        }

        let entry = self
            .rooms
            .entry(room.clone())
            .or_insert_with(|| Room { members: BTreeMap::new() });

        let rejoined = entry.members.contains_key(client);
        let member = Member {
            client_id: client.clone(),
            display_name: display_name.to_owned(),
            status: PresenceStatus::Joined,
        };
        let notify = if rejoined {
            Vec::new()
        } else {
            entry.members.keys().cloned().collect()
        };
        entry.members.insert(client.clone(), member.clone());
        self.active.insert(client.clone(), room.clone());

        let members = entry.members.values().cloned().collect::<Vec<_>>();
        if rejoined {
            debug!(%room, %client, "membership: rejoin is a no-op");
        } else {
            info!(%room, %client, members = members.len(), "membership: client joined room");
        }

        Ok(JoinOutcome { room: room.clone(), member, members, notify, previous: None, rejoined })
    }

    /// Remove a client from a room. An emptied room is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::RoomNotFound`] for an unknown or discarded
    /// room and [`MembershipError::NotMember`] if the client is not in it.
    pub fn leave(&mut self, room: &RoomId, client: &ClientId) -> Result<LeaveOutcome, MembershipError> {
        let entry = self
            .rooms
            .get_mut(room)
            .ok_or_else(|| MembershipError::RoomNotFound(room.clone()))?;

        let Some(mut member) = entry.members.remove(client) else {
            return Err(MembershipError::NotMember { room: room.clone(), client: client.clone() });
        };
        member.status = PresenceStatus::Left;
        self.active.remove(client);

        let notify = entry.members.keys().cloned().collect::<Vec<_>>();
        let room_discarded = entry.members.is_empty();
        if room_discarded {
            self.rooms.remove(room);
            info!(%room, "membership: discarded empty room");
        }
        info!(%room, %client, remaining = notify.len(), "membership: client left room");

        Ok(LeaveOutcome { room: room.clone(), member, notify, room_discarded })
    }

    /// Release whatever room an ungracefully disconnected client held.
    pub fn disconnect(&mut self, client: &ClientId) -> Option<LeaveOutcome> {
        let room = self.active.get(client)?.clone();
        match self.leave(&room, client) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(%client, %room, error = %e, "membership: disconnect cleanup failed");
                None
            }
        }
    }

    /// Current members of a room, ordered by client id.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::RoomNotFound`] if the room does not exist.
    pub fn members(&self, room: &RoomId) -> Result<Vec<Member>, MembershipError> {
        self.rooms
            .get(room)
            .map(|r| r.members.values().cloned().collect())
            .ok_or_else(|| MembershipError::RoomNotFound(room.clone()))
    }

    /// Verify that `client` may address traffic to `room`.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::RoomNotFound`] or
    /// [`MembershipError::NotMember`].
    pub fn ensure_member(&self, room: &RoomId, client: &ClientId) -> Result<(), MembershipError> {
        let entry = self
            .rooms
            .get(room)
            .ok_or_else(|| MembershipError::RoomNotFound(room.clone()))?;
        if entry.members.contains_key(client) {
            Ok(())
        } else {
            Err(MembershipError::NotMember { room: room.clone(), client: client.clone() })
        }
    }

    /// The room a client is currently active in.
    #[must_use]
    pub fn room_of(&self, client: &ClientId) -> Option<&RoomId> {
        self.active.get(client)
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
#[path = "membership_test.rs"]
mod tests;
