//! Media engine seam.
//!
//! The mesh decides *when* media is opened, fed, and closed; a `MediaEngine`
//! does the work (WebRTC or similar) and reports back through
//! `MediaEvent`s on a channel the session polls. Engine calls must not
//! block: anything slow happens on the engine's own tasks.
//!
//! `HandshakeMedia` is a headless engine that completes offer/answer with
//! empty payloads and reports readiness immediately. It lets clients that
//! carry no audio or video (bots, tests) take part in the mesh.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;

use crate::ids::{ClientId, RoomId};
use crate::services::mesh::{Role, Signal, SignalKind};

/// Report from the media engine to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// The engine produced a signal for the peer.
    LocalSignal { room: RoomId, peer: ClientId, signal: Signal },
    Ready { room: RoomId, peer: ClientId, generation: u32 },
    Failed { room: RoomId, peer: ClientId, generation: u32, reason: String },
}

pub trait MediaEngine: Send {
    /// Allocate media for a negotiation attempt.
    fn open(&mut self, room: &RoomId, peer: &ClientId, role: Role, generation: u32);

    /// Feed a signal received from the peer.
    fn signal(&mut self, room: &RoomId, peer: &ClientId, signal: Signal);

    /// Release media for the peer.
    fn close(&mut self, room: &RoomId, peer: &ClientId);
}

// =============================================================================
// HEADLESS ENGINE
// =============================================================================

pub struct HandshakeMedia {
    events: mpsc::UnboundedSender<MediaEvent>,
    open: HashMap<(RoomId, ClientId), (Role, u32)>,
}

impl HandshakeMedia {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MediaEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events, open: HashMap::new() }, rx)
    }

    fn emit(&self, event: MediaEvent) {
        if self.events.send(event).is_err() {
            debug!("media: session gone, event dropped");
        }
    }

    fn local_signal(&self, room: &RoomId, peer: &ClientId, kind: SignalKind, generation: u32) {
        self.emit(MediaEvent::LocalSignal {
            room: room.clone(),
            peer: peer.clone(),
            signal: Signal::new(kind, generation, serde_json::Value::Null),
        });
    }

    fn ready(&self, room: &RoomId, peer: &ClientId, generation: u32) {
        self.emit(MediaEvent::Ready { room: room.clone(), peer: peer.clone(), generation });
    }
}

impl MediaEngine for HandshakeMedia {
    fn open(&mut self, room: &RoomId, peer: &ClientId, role: Role, generation: u32) {
        self.open.insert((room.clone(), peer.clone()), (role, generation));
        if role == Role::Initiator {
            self.local_signal(room, peer, SignalKind::Offer, generation);
        }
    }

    fn signal(&mut self, room: &RoomId, peer: &ClientId, signal: Signal) {
        let Some(&(role, generation)) = self.open.get(&(room.clone(), peer.clone())) else {
            debug!(%room, %peer, "media: signal for closed peer ignored");
            return;
        };
        if signal.generation != generation {
            return;
        }
        match (role, signal.kind) {
            (Role::Responder, SignalKind::Offer) => {
                self.local_signal(room, peer, SignalKind::Answer, generation);
                self.ready(room, peer, generation);
            }
            (Role::Initiator, SignalKind::Answer) => self.ready(room, peer, generation),
            _ => {}
        }
    }

    fn close(&mut self, room: &RoomId, peer: &ClientId) {
        self.open.remove(&(room.clone(), peer.clone()));
    }
}
