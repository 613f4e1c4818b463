//! Canvas service — arrival-ordered draw/undo/clear log for a room.
//!
//! DESIGN
//! ======
//! The materialized canvas is the list of strokes left after replaying every
//! accepted event in arrival order. Arrival order is the only ordering key:
//! concurrent strokes from different authors interleave by receipt, and
//! undo removes the most recently arrived stroke regardless of who drew it
//! (one shared undo stack per room).
//!
//! Local operations apply immediately and return the event to broadcast; no
//! acknowledgement is awaited. Remote events are deduplicated by sequence
//! watermark, since the relay delivers at least once and keeps per-sender
//! order within a topic. Sequences restart with every log, so the watermark
//! key is the author plus the log's epoch: a member that leaves and rejoins
//! starts a fresh epoch instead of replaying numbers peers already passed.
//!
//! Clear drops all retained history, so late-join replay cost is bounded by
//! the strokes currently on the surface, not the events ever sent.
//!
//! SYNC
//! ====
//! A log starts unsynced and records every event it accepts. Adopting a
//! peer's history resets the surface to that history, then replays the
//! recorded events the peer's watermarks show it had not seen, undo and
//! clear included. A log with no peer to copy goes live directly. A log
//! that loses its transport detaches and records again until the next
//! history arrives.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::ids::{ClientId, RoomId};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanvasError {
    #[error("canvas event for room {got} delivered to room {expected}")]
    RoomMismatch { expected: RoomId, got: RoomId },
}

impl ErrorCode for CanvasError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::RoomMismatch { .. } => "E_ROOM_MISMATCH",
        }
    }
}

/// A point on the surface, serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point(pub f64, pub f64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    pub color: String,
    pub width: f64,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self { color: "#000000".into(), width: 3.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: Uuid,
    pub points: Vec<Point>,
    #[serde(default)]
    pub style: StrokeStyle,
}

impl Stroke {
    #[must_use]
    pub fn new(points: Vec<Point>, style: StrokeStyle) -> Self {
        Self { id: Uuid::new_v4(), points, style }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum CanvasOp {
    Stroke { stroke: Stroke },
    Undo,
    Clear,
}

/// One canvas operation as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasEvent {
    pub room: RoomId,
    pub author: ClientId,
    /// Identifies the author's log; a new one is drawn on every join.
    pub epoch: Uuid,
    /// Strictly increasing within `(author, epoch)`.
    pub seq: u64,
    #[serde(flatten)]
    pub op: CanvasOp,
}

/// A stroke currently on the surface, with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetainedStroke {
    pub author: ClientId,
    pub seq: u64,
    pub stroke: Stroke,
}

/// Highest sequence accepted from one author's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub author: ClientId,
    pub epoch: Uuid,
    pub seq: u64,
}

/// Everything a joining member needs to take over a peer's surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasHistory {
    pub strokes: Vec<RetainedStroke>,
    pub watermarks: Vec<Watermark>,
}

/// What applying a remote event did to the surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Drawn,
    /// `None` when undo found an empty canvas.
    Undone(Option<RetainedStroke>),
    Cleared,
    /// Already seen; ignored.
    Duplicate,
}

// =============================================================================
// LOG
// =============================================================================

type MarkKey = (ClientId, Uuid);

pub struct CanvasLog {
    room: RoomId,
    local: ClientId,
    epoch: Uuid,
    next_seq: u64,
    strokes: Vec<RetainedStroke>,
    watermarks: HashMap<MarkKey, u64>,
    /// Events accepted since the log last matched a peer; `None` once live.
    unsynced: Option<Vec<CanvasEvent>>,
    arrivals: u64,
    retained_events: usize,
}

impl CanvasLog {
    #[must_use]
    pub fn new(room: RoomId, local: ClientId) -> Self {
        Self {
            room,
            local,
            epoch: Uuid::new_v4(),
            next_seq: 1,
            strokes: Vec::new(),
            watermarks: HashMap::new(),
            unsynced: Some(Vec::new()),
            arrivals: 0,
            retained_events: 0,
        }
    }

    // -------------------------------------------------------------------------
    // LOCAL OPERATIONS
    // -------------------------------------------------------------------------

    /// Draw a stroke locally and return the event to broadcast.
    pub fn append(&mut self, stroke: Stroke) -> CanvasEvent {
        self.local_event(CanvasOp::Stroke { stroke })
    }

    /// Undo the most recently arrived stroke. Returns `None` (and emits
    /// nothing) when the canvas is empty.
    pub fn undo(&mut self) -> Option<CanvasEvent> {
        if self.strokes.is_empty() {
            return None;
        }
        Some(self.local_event(CanvasOp::Undo))
    }

    /// Clear the surface and return the event to broadcast.
    pub fn clear(&mut self) -> CanvasEvent {
        self.local_event(CanvasOp::Clear)
    }

    fn local_event(&mut self, op: CanvasOp) -> CanvasEvent {
        let event = CanvasEvent {
            room: self.room.clone(),
            author: self.local.clone(),
            epoch: self.epoch,
            seq: self.next_seq,
            op,
        };
        self.next_seq += 1;
        self.record(&event);
        self.accept(&event);
        event
    }

    // -------------------------------------------------------------------------
    // REMOTE EVENTS
    // -------------------------------------------------------------------------

    /// Apply an event received from the room, in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::RoomMismatch`] if the event belongs to another
    /// room; the surface is left untouched.
    pub fn apply(&mut self, event: &CanvasEvent) -> Result<Applied, CanvasError> {
        if event.room != self.room {
            return Err(CanvasError::RoomMismatch { expected: self.room.clone(), got: event.room.clone() });
        }
        if self.seen(event) {
            debug!(room = %self.room, author = %event.author, seq = event.seq, "canvas: duplicate event dropped");
            return Ok(Applied::Duplicate);
        }
        self.record(event);
        Ok(self.accept(event))
    }

    fn record(&mut self, event: &CanvasEvent) {
        self.arrivals += 1;
        if let Some(unsynced) = self.unsynced.as_mut() {
            unsynced.push(event.clone());
        }
    }

    /// Drop every watermark held for `author`. Called when the author leaves
    /// the room; a later membership arrives under a new epoch.
    pub fn forget_author(&mut self, author: &ClientId) {
        self.watermarks.retain(|(id, _), _| id != author);
    }

    fn seen(&self, event: &CanvasEvent) -> bool {
        let key = (event.author.clone(), event.epoch);
        self.watermarks.get(&key).is_some_and(|mark| event.seq <= *mark)
    }

    fn accept(&mut self, event: &CanvasEvent) -> Applied {
        self.watermarks.insert((event.author.clone(), event.epoch), event.seq);
        match &event.op {
            CanvasOp::Stroke { stroke } => {
                self.strokes.push(RetainedStroke {
                    author: event.author.clone(),
                    seq: event.seq,
                    stroke: stroke.clone(),
                });
                self.retained_events += 1;
                Applied::Drawn
            }
            CanvasOp::Undo => {
                let removed = self.strokes.pop();
                if removed.is_some() {
                    self.retained_events += 1;
                }
                Applied::Undone(removed)
            }
            CanvasOp::Clear => {
                self.strokes.clear();
                self.retained_events = 0;
                Applied::Cleared
            }
        }
    }

    // -------------------------------------------------------------------------
    // REPLAY
    // -------------------------------------------------------------------------

    /// The materialized canvas.
    #[must_use]
    pub fn replay(&self) -> Vec<RetainedStroke> {
        self.strokes.clone()
    }

    /// The surface plus watermarks, for a late joiner.
    #[must_use]
    pub fn history(&self) -> CanvasHistory {
        let mut watermarks = self
            .watermarks
            .iter()
            .map(|((author, epoch), seq)| Watermark { author: author.clone(), epoch: *epoch, seq: *seq })
            .collect::<Vec<_>>();
        watermarks.sort_by(|a, b| (&a.author, a.epoch).cmp(&(&b.author, b.epoch)));
        CanvasHistory { strokes: self.strokes.clone(), watermarks }
    }

    /// True once the log has adopted a history or had none to adopt.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.unsynced.is_none()
    }

    /// Stop recording; there is no peer to copy.
    pub fn go_live(&mut self) {
        if let Some(unsynced) = self.unsynced.take() {
            debug!(room = %self.room, recorded = unsynced.len(), "canvas: live without history");
        }
    }

    /// Start recording again after the transport dropped.
    pub fn detach(&mut self) {
        if self.unsynced.is_none() {
            self.unsynced = Some(Vec::new());
        }
    }

    /// Take over a peer's surface, then replay the recorded events its
    /// watermarks show it had not seen. Returns `false`, leaving the surface
    /// untouched, if the log is already live.
    pub fn adopt_history(&mut self, history: CanvasHistory) -> bool {
        let Some(recorded) = self.unsynced.take() else {
            debug!(room = %self.room, "canvas: history for a live log ignored");
            return false;
        };
        let previous = std::mem::take(&mut self.watermarks);
        self.watermarks = history
            .watermarks
            .into_iter()
            .map(|mark| ((mark.author, mark.epoch), mark.seq))
            .collect();
        self.strokes = history.strokes;
        self.retained_events = self.strokes.len();

        let mut replayed = 0usize;
        for event in &recorded {
            if !self.seen(event) {
                self.accept(event);
                replayed += 1;
            }
        }
        for (key, seq) in previous {
            let mark = self.watermarks.entry(key).or_insert(0);
            *mark = (*mark).max(seq);
        }
        debug!(
            room = %self.room,
            adopted = self.strokes.len(),
            recorded = recorded.len(),
            replayed,
            "canvas: adopted history"
        );
        true
    }

    #[must_use]
    pub fn strokes(&self) -> &[RetainedStroke] {
        &self.strokes
    }

    /// Events retained since the last clear.
    #[must_use]
    pub fn retained_events(&self) -> usize {
        self.retained_events
    }

    /// Events accepted since the log was attached.
    #[must_use]
    pub fn total_arrivals(&self) -> u64 {
        self.arrivals
    }
}

#[cfg(test)]
#[path = "canvas_test.rs"]
mod tests;
