//! Mesh service — pairwise peer link negotiation for a full media mesh.
//!
//! DESIGN
//! ======
//! Each session holds one `PeerMesh`: a table of `PeerLink` state machines
//! keyed by (room, unordered client pair). For every pair the client with the
//! lexicographically smaller id is the initiator and the other the responder,
//! so two clients never offer to each other at the same time.
//!
//! The mesh performs no I/O. Every input (presence change, remote signal,
//! media engine report, clock tick) returns a list of `MeshAction`s that the
//! session applies: open/close media, hand a signal to the media engine, or
//! relay a signal to the peer. Signal payloads are opaque; only the envelope
//! (`kind`, `generation`) is read.
//!
//! LIFECYCLE
//! =========
//! initiator: idle → offering → connected
//! responder: idle → answering → connected
//! any negotiating/connected state → failed on timeout or media error. The
//! first failure is retried with a fresh generation; the last allowed
//! failure is terminal and reported as unreachable. Hang-up or `bye` moves a
//! link to closed; a member leaving removes its links from the table.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MeshConfig;
use crate::frame::ErrorCode;
use crate::ids::{ClientId, RoomId};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeshError {
    #[error("no peer link for {peer} in room {room}")]
    UnknownLink { room: RoomId, peer: ClientId },
    #[error("a client cannot link to itself")]
    SelfLink,
}

impl ErrorCode for MeshError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownLink { .. } => "E_UNKNOWN_LINK",
            Self::SelfLink => "E_SELF_LINK",
        }
    }
}

/// Why a negotiation attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkFailure {
    #[error("negotiation timed out")]
    NegotiationTimeout,
    #[error("media transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

/// Deterministic tie-break: the smaller client id initiates.
#[must_use]
pub fn role_for(local: &ClientId, remote: &ClientId) -> Role {
    if local < remote { Role::Initiator } else { Role::Responder }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Idle,
    Offering,
    Answering,
    Connected,
    Failed,
    Closed,
}

impl LinkState {
    /// States that own an open media transport.
    #[must_use]
    pub fn has_media(self) -> bool {
        matches!(self, Self::Offering | Self::Answering | Self::Connected)
    }

    /// Neither closed nor failed.
    #[must_use]
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Failed | Self::Closed)
    }
}

/// Unordered client pair. Construction orders the two ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerPair {
    low: ClientId,
    high: ClientId,
}

impl PeerPair {
    #[must_use]
    pub fn new(a: ClientId, b: ClientId) -> Self {
        if a <= b { Self { low: a, high: b } } else { Self { low: b, high: a } }
    }

    /// The member of the pair that initiates.
    #[must_use]
    pub fn initiator(&self) -> &ClientId {
        &self.low
    }

    #[must_use]
    pub fn responder(&self) -> &ClientId {
        &self.high
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub room: RoomId,
    pub pair: PeerPair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    Bye,
}

/// Signaling envelope relayed between two peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    /// Negotiation attempt this signal belongs to.
    pub generation: u32,
    /// Opaque media-engine payload (SDP, ICE candidate, ...).
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Signal {
    #[must_use]
    pub fn new(kind: SignalKind, generation: u32, payload: serde_json::Value) -> Self {
        Self { kind, generation, payload }
    }
}

/// One side's view of a direct media link.
#[derive(Debug, Clone)]
pub struct PeerLink {
    pub room: RoomId,
    pub remote: ClientId,
    pub role: Role,
    pub state: LinkState,
    pub generation: u32,
    pub failures: u8,
    pub failure: Option<LinkFailure>,
    /// A terminal link is never renegotiated.
    pub terminal: bool,
    deadline: Option<Instant>,
}

/// Side effect requested by the mesh.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshAction {
    /// Allocate media for a fresh negotiation attempt.
    Open { room: RoomId, peer: ClientId, role: Role, generation: u32 },
    /// Hand a remote signal to the media engine.
    Deliver { room: RoomId, peer: ClientId, signal: Signal },
    /// Relay a local signal to the peer.
    Send { room: RoomId, peer: ClientId, signal: Signal },
    /// Release the media for this peer.
    Close { room: RoomId, peer: ClientId },
    Connected { room: RoomId, peer: ClientId },
    Unreachable { room: RoomId, peer: ClientId, reason: LinkFailure },
}

// =============================================================================
// MESH
// =============================================================================

pub struct PeerMesh {
    local: ClientId,
    config: MeshConfig,
    links: HashMap<LinkKey, PeerLink>,
}

impl PeerMesh {
    #[must_use]
    pub fn new(local: ClientId, config: MeshConfig) -> Self {
        Self { local, config, links: HashMap::new() }
    }

    fn key(&self, room: &RoomId, peer: &ClientId) -> LinkKey {
        LinkKey { room: room.clone(), pair: PeerPair::new(self.local.clone(), peer.clone()) }
    }

    fn deadline(&self, now: Instant) -> Option<Instant> {
        Some(now + self.config.negotiation_timeout)
    }

    // -------------------------------------------------------------------------
    // PRESENCE
    // -------------------------------------------------------------------------

    /// A member became mutually present with the local client.
    pub fn member_joined(&mut self, room: &RoomId, peer: &ClientId, now: Instant) -> Vec<MeshAction> {
        if *peer == self.local {
            return Vec::new();
        }
        let key = self.key(room, peer);
        if self.links.contains_key(&key) {
            return Vec::new();
        }

        let role = role_for(&self.local, peer);
        let mut link = PeerLink {
            room: room.clone(),
            remote: peer.clone(),
            role,
            state: LinkState::Idle,
            generation: 0,
            failures: 0,
            failure: None,
            terminal: false,
            deadline: None,
        };
        debug!(%room, %peer, ?role, "mesh: link created");

        let actions = match role {
            Role::Initiator => vec![self.start_offer(&mut link, now)],
            Role::Responder => Vec::new(),
        };
        self.links.insert(key, link);
        actions
    }

    /// Reconcile the table with a full member set (e.g. the join reply).
    /// Links to clients absent from `members` are torn down.
    pub fn sync_members(&mut self, room: &RoomId, members: &[ClientId], now: Instant) -> Vec<MeshAction> {
        let stale = self
            .links
            .values()
            .filter(|l| l.room == *room && !members.contains(&l.remote))
            .map(|l| l.remote.clone())
            .collect::<Vec<_>>();

        let mut actions = Vec::new();
        for peer in stale {
            actions.extend(self.member_left(room, &peer));
        }
        for peer in members {
            actions.extend(self.member_joined(room, peer, now));
        }
        actions
    }

    /// A member left: the link is closed and removed from the table.
    pub fn member_left(&mut self, room: &RoomId, peer: &ClientId) -> Vec<MeshAction> {
        let key = self.key(room, peer);
        let Some(link) = self.links.remove(&key) else {
            return Vec::new();
        };
        info!(%room, %peer, state = ?link.state, "mesh: link removed on leave");
        if link.state.has_media() {
            vec![MeshAction::Close { room: room.clone(), peer: peer.clone() }]
        } else {
            Vec::new()
        }
    }

    /// Tear down every link in a room.
    pub fn leave_room(&mut self, room: &RoomId) -> Vec<MeshAction> {
        let peers = self
            .links
            .values()
            .filter(|l| l.room == *room)
            .map(|l| l.remote.clone())
            .collect::<Vec<_>>();
        peers.iter().flat_map(|peer| self.member_left(room, peer)).collect()
    }

    // -------------------------------------------------------------------------
    // SIGNALING
    // -------------------------------------------------------------------------

    /// Handle a signal relayed from `from`.
    pub fn remote_signal(&mut self, room: &RoomId, from: &ClientId, signal: Signal, now: Instant) -> Vec<MeshAction> {
        if *from == self.local {
            return Vec::new();
        }
        match signal.kind {
            SignalKind::Offer => self.remote_offer(room, from, signal, now),
            SignalKind::Answer | SignalKind::Candidate => {
                let key = self.key(room, from);
                let Some(link) = self.links.get(&key) else {
                    debug!(%room, peer = %from, kind = ?signal.kind, "mesh: signal for unknown link dropped");
                    return Vec::new();
                };
                if !link.state.has_media() || link.generation != signal.generation {
                    debug!(%room, peer = %from, kind = ?signal.kind, "mesh: stale signal dropped");
                    return Vec::new();
                }
                vec![MeshAction::Deliver { room: room.clone(), peer: from.clone(), signal }]
            }
            SignalKind::Bye => {
                let key = self.key(room, from);
                let Some(link) = self.links.get_mut(&key) else {
                    return Vec::new();
                };
                if signal.generation < link.generation || link.state == LinkState::Closed {
                    return Vec::new();
                }
                let had_media = link.state.has_media();
                link.state = LinkState::Closed;
                link.deadline = None;
                info!(%room, peer = %from, "mesh: peer hung up");
                if had_media {
                    vec![MeshAction::Close { room: room.clone(), peer: from.clone() }]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn remote_offer(&mut self, room: &RoomId, from: &ClientId, signal: Signal, now: Instant) -> Vec<MeshAction> {
        if role_for(&self.local, from) == Role::Initiator {
            warn!(%room, peer = %from, "mesh: offer from peer that should answer, discarded");
            return Vec::new();
        }

        let key = self.key(room, from);
        let timeout = self.deadline(now);
        let link = self.links.entry(key).or_insert_with(|| PeerLink {
            room: room.clone(),
            remote: from.clone(),
            role: Role::Responder,
            state: LinkState::Idle,
            generation: 0,
            failures: 0,
            failure: None,
            terminal: false,
            deadline: None,
        });

        if link.terminal || link.state == LinkState::Closed {
            debug!(%room, peer = %from, state = ?link.state, "mesh: offer for finished link discarded");
            return Vec::new();
        }
        if matches!(link.state, LinkState::Answering | LinkState::Connected) && signal.generation <= link.generation {
            debug!(%room, peer = %from, generation = signal.generation, "mesh: duplicate offer discarded");
            return Vec::new();
        }

        let mut actions = Vec::new();
        if link.state.has_media() {
            actions.push(MeshAction::Close { room: room.clone(), peer: from.clone() });
        }
        link.generation = signal.generation;
        link.state = LinkState::Answering;
        link.deadline = timeout;
        actions.push(MeshAction::Open {
            room: room.clone(),
            peer: from.clone(),
            role: Role::Responder,
            generation: signal.generation,
        });
        actions.push(MeshAction::Deliver { room: room.clone(), peer: from.clone(), signal });
        actions
    }

    /// Relay a signal produced by the local media engine.
    pub fn local_signal(&mut self, room: &RoomId, peer: &ClientId, signal: Signal) -> Vec<MeshAction> {
        let key = self.key(room, peer);
        match self.links.get(&key) {
            Some(link) if link.state.has_media() && link.generation == signal.generation => {
                vec![MeshAction::Send { room: room.clone(), peer: peer.clone(), signal }]
            }
            _ => {
                debug!(%room, %peer, kind = ?signal.kind, "mesh: local signal for inactive link dropped");
                Vec::new()
            }
        }
    }

    // -------------------------------------------------------------------------
    // MEDIA REPORTS
    // -------------------------------------------------------------------------

    /// The media transport confirmed readiness for `generation`.
    pub fn media_ready(&mut self, room: &RoomId, peer: &ClientId, generation: u32) -> Vec<MeshAction> {
        let key = self.key(room, peer);
        let Some(link) = self.links.get_mut(&key) else {
            return Vec::new();
        };
        if link.generation != generation || !matches!(link.state, LinkState::Offering | LinkState::Answering) {
            return Vec::new();
        }
        link.state = LinkState::Connected;
        link.deadline = None;
        link.failure = None;
        // The retry budget covers one outage, not the link's lifetime.
        link.failures = 0;
        info!(%room, %peer, generation, "mesh: peer connected");
        vec![MeshAction::Connected { room: room.clone(), peer: peer.clone() }]
    }

    /// The media transport reported an error for `generation`.
    pub fn media_failed(
        &mut self,
        room: &RoomId,
        peer: &ClientId,
        generation: u32,
        reason: impl Into<String>,
        now: Instant,
    ) -> Vec<MeshAction> {
        let key = self.key(room, peer);
        let current = self
            .links
            .get(&key)
            .is_some_and(|l| l.generation == generation && l.state.has_media());
        if !current {
            return Vec::new();
        }
        self.fail(&key, LinkFailure::Transport(reason.into()), now)
    }

    /// Expire negotiations whose deadline has passed.
    pub fn tick(&mut self, now: Instant) -> Vec<MeshAction> {
        let expired = self
            .links
            .iter()
            .filter(|(_, l)| l.deadline.is_some_and(|d| d <= now))
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();

        expired
            .iter()
            .flat_map(|key| self.fail(key, LinkFailure::NegotiationTimeout, now))
            .collect()
    }

    fn fail(&mut self, key: &LinkKey, reason: LinkFailure, now: Instant) -> Vec<MeshAction> {
        let max_attempts = self.config.max_attempts;
        let timeout = self.config.negotiation_timeout;
        let Some(link) = self.links.get_mut(key) else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        if link.state.has_media() {
            actions.push(MeshAction::Close { room: link.room.clone(), peer: link.remote.clone() });
        }
        link.failures = link.failures.saturating_add(1);
        link.failure = Some(reason.clone());
        link.state = LinkState::Failed;
        link.deadline = None;

        if link.failures >= max_attempts {
            link.terminal = true;
            warn!(room = %link.room, peer = %link.remote, error = %reason, "mesh: peer unreachable");
            actions.push(MeshAction::Unreachable { room: link.room.clone(), peer: link.remote.clone(), reason });
            return actions;
        }

        warn!(room = %link.room, peer = %link.remote, error = %reason, failures = link.failures, "mesh: negotiation failed, retrying");
        match link.role {
            Role::Initiator => {
                let mut retry = link.clone();
                actions.push(self.start_offer(&mut retry, now));
                self.links.insert(key.clone(), retry);
            }
            // Wait for the initiator's fresh offer, but not forever.
            Role::Responder => link.deadline = Some(now + timeout),
        }
        actions
    }

    fn start_offer(&self, link: &mut PeerLink, now: Instant) -> MeshAction {
        link.generation += 1;
        link.state = LinkState::Offering;
        link.deadline = self.deadline(now);
        debug!(room = %link.room, peer = %link.remote, generation = link.generation, "mesh: offering");
        MeshAction::Open {
            room: link.room.clone(),
            peer: link.remote.clone(),
            role: Role::Initiator,
            generation: link.generation,
        }
    }

    // -------------------------------------------------------------------------
    // HANG-UP
    // -------------------------------------------------------------------------

    /// Explicitly end a link. The peer is told with a `bye` signal.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::UnknownLink`] if no link exists for the peer.
    pub fn hang_up(&mut self, room: &RoomId, peer: &ClientId) -> Result<Vec<MeshAction>, MeshError> {
        if *peer == self.local {
            return Err(MeshError::SelfLink);
        }
        let key = self.key(room, peer);
        let link = self
            .links
            .get_mut(&key)
            .ok_or_else(|| MeshError::UnknownLink { room: room.clone(), peer: peer.clone() })?;

        let mut actions = Vec::new();
        if link.state == LinkState::Closed {
            return Ok(actions);
        }
        if link.state.has_media() {
            actions.push(MeshAction::Close { room: room.clone(), peer: peer.clone() });
        }
        actions.push(MeshAction::Send {
            room: room.clone(),
            peer: peer.clone(),
            signal: Signal::new(SignalKind::Bye, link.generation, serde_json::Value::Null),
        });
        link.state = LinkState::Closed;
        link.deadline = None;
        info!(%room, %peer, "mesh: hung up");
        Ok(actions)
    }

    // -------------------------------------------------------------------------
    // QUERIES
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn link(&self, room: &RoomId, peer: &ClientId) -> Option<&PeerLink> {
        self.links.get(&self.key(room, peer))
    }

    pub fn links<'a>(&'a self, room: &'a RoomId) -> impl Iterator<Item = &'a PeerLink> + 'a {
        self.links.values().filter(move |l| l.room == *room)
    }

    #[must_use]
    pub fn count(&self, room: &RoomId, state: LinkState) -> usize {
        self.links(room).filter(|l| l.state == state).count()
    }

    #[must_use]
    pub fn negotiation_timeout(&self) -> Duration {
        self.config.negotiation_timeout
    }
}

#[cfg(test)]
#[path = "mesh_test.rs"]
mod tests;
