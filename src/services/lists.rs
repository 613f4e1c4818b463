//! Lists service — optimistic board reordering reconciled by an authority.
//!
//! DESIGN
//! ======
//! A reorder is a pure function from the current board and a move to a new
//! board; the local mirror is replaced, never mutated in place. The engine
//! then submits the whole resulting snapshot (not a diff) to the external
//! authority, which answers with the authoritative snapshot. That snapshot
//! is broadcast, and every client, the mover included, adopts it.
//!
//! TRADE-OFFS
//! ==========
//! There is no locking and no merge: two near-simultaneous moves both apply
//! locally, then the later authoritative revision overwrites the earlier
//! one everywhere. The board is eventually consistent, not linearizable.
//! Snapshots older than the revision already adopted are stale responses
//! (`AuthorityConflict`) and are dropped silently.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::frame::ErrorCode;
use crate::ids::{ListId, RoomId, TaskId};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListError {
    #[error("list not found: {0}")]
    ListNotFound(ListId),
    #[error("no task at index {index} in list {list}")]
    TaskIndexOutOfRange { list: ListId, index: usize },
    #[error("task {0} appears more than once on the board")]
    DuplicateTask(TaskId),
}

impl ErrorCode for ListError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ListNotFound(_) => "E_LIST_NOT_FOUND",
            Self::TaskIndexOutOfRange { .. } => "E_TASK_INDEX",
            Self::DuplicateTask(_) => "E_DUPLICATE_TASK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    pub id: ListId,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBoard {
    pub lists: Vec<TaskList>,
}

/// A client-proposed move of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderIntent {
    pub source_list: ListId,
    pub source_index: usize,
    pub dest_list: ListId,
    pub dest_index: usize,
}

/// A board as returned by the authority, stamped with its revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub revision: u64,
    #[serde(flatten)]
    pub board: ListBoard,
}

// =============================================================================
// PURE BOARD OPERATIONS
// =============================================================================

impl ListBoard {
    fn position(&self, list: &ListId) -> Result<usize, ListError> {
        self.lists
            .iter()
            .position(|l| l.id == *list)
            .ok_or_else(|| ListError::ListNotFound(list.clone()))
    }

    /// Check that every task belongs to exactly one list.
    ///
    /// # Errors
    ///
    /// Returns [`ListError::DuplicateTask`] naming the first repeated task.
    pub fn validate(&self) -> Result<(), ListError> {
        let mut seen = HashSet::new();
        for task in self.lists.iter().flat_map(|l| &l.tasks) {
            if !seen.insert(&task.id) {
                return Err(ListError::DuplicateTask(task.id.clone()));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn list(&self, id: &ListId) -> Option<&TaskList> {
        self.lists.iter().find(|l| l.id == *id)
    }

    #[must_use]
    pub fn task_count(&self) -> usize {
        self.lists.iter().map(|l| l.tasks.len()).sum()
    }
}

/// Build the board that results from applying `intent` to `board`.
///
/// The move is remove-then-insert: within one list the destination index
/// refers to the list after removal. A destination index past the end
/// appends.
///
/// # Errors
///
/// Returns [`ListError::ListNotFound`] for an unknown source or destination
/// list and [`ListError::TaskIndexOutOfRange`] for a bad source index. The
/// input board is never modified.
pub fn apply_move(board: &ListBoard, intent: &ReorderIntent) -> Result<ListBoard, ListError> {
    let source = board.position(&intent.source_list)?;
    let dest = board.position(&intent.dest_list)?;
    if intent.source_index >= board.lists[source].tasks.len() {
        return Err(ListError::TaskIndexOutOfRange { list: intent.source_list.clone(), index: intent.source_index });
    }

    let mut next = board.clone();
    let task = next.lists[source].tasks.remove(intent.source_index);
    let tasks = &mut next.lists[dest].tasks;
    let index = intent.dest_index.min(tasks.len());
    tasks.insert(index, task);
    Ok(next)
}

// =============================================================================
// RECONCILER
// =============================================================================

/// A snapshot awaiting the authority's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub id: u64,
    pub room: RoomId,
    pub board: ListBoard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingIntent {
    submission: u64,
    intent: ReorderIntent,
}

/// How an authoritative snapshot was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// Adopted; the mirror now equals the snapshot.
    Adopted(BoardSnapshot),
    /// Older than the adopted revision; ignored.
    Superseded { revision: u64, current: u64 },
}

pub struct ListReconciler {
    room: RoomId,
    board: ListBoard,
    revision: Option<u64>,
    pending: Vec<PendingIntent>,
    next_submission: u64,
}

impl ListReconciler {
    #[must_use]
    pub fn new(room: RoomId) -> Self {
        Self { room, board: ListBoard::default(), revision: None, pending: Vec::new(), next_submission: 1 }
    }

    #[must_use]
    pub fn board(&self) -> &ListBoard {
        &self.board
    }

    #[must_use]
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    /// Intents submitted but not yet answered, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &ReorderIntent> {
        self.pending.iter().map(|p| &p.intent)
    }

    /// Apply a local move optimistically and produce the snapshot to submit.
    ///
    /// # Errors
    ///
    /// Propagates [`apply_move`] errors; the mirror is unchanged on error.
    pub fn reorder(&mut self, intent: ReorderIntent) -> Result<Submission, ListError> {
        let next = apply_move(&self.board, &intent)?;
        let id = self.next_submission;
        self.next_submission += 1;
        self.board = next.clone();
        debug!(room = %self.room, submission = id, ?intent, "lists: optimistic reorder applied");
        self.pending.push(PendingIntent { submission: id, intent });
        Ok(Submission { id, room: self.room.clone(), board: next })
    }

    /// The authority answered submission `id`.
    pub fn on_authority_response(&mut self, id: u64, snapshot: BoardSnapshot) -> Reconciled {
        self.pending.retain(|p| p.submission != id);
        self.adopt(snapshot)
    }

    /// The authority call for submission `id` failed. The optimistic board
    /// stays until the next authoritative snapshot corrects it.
    pub fn on_authority_failure(&mut self, id: u64, error: &impl std::fmt::Display) {
        self.pending.retain(|p| p.submission != id);
        warn!(room = %self.room, submission = id, %error, "lists: submission failed, keeping optimistic board");
    }

    /// A peer broadcast an authoritative snapshot, or the initial fetch
    /// completed.
    pub fn on_snapshot(&mut self, snapshot: BoardSnapshot) -> Reconciled {
        self.adopt(snapshot)
    }

    fn adopt(&mut self, snapshot: BoardSnapshot) -> Reconciled {
        if let Some(current) = self.revision {
            if snapshot.revision < current {
                debug!(
                    room = %self.room,
                    revision = snapshot.revision,
                    current,
                    "lists: stale authoritative snapshot superseded"
                );
                return Reconciled::Superseded { revision: snapshot.revision, current };
            }
        }
        self.revision = Some(snapshot.revision);
        self.board = snapshot.board.clone();
        info!(room = %self.room, revision = snapshot.revision, tasks = self.board.task_count(), "lists: adopted authoritative board");
        Reconciled::Adopted(snapshot)
    }

    /// Drop every pending intent (room teardown).
    pub fn cancel_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

#[cfg(test)]
#[path = "lists_test.rs"]
mod tests;
