//! Session — one client's event loop over a room.
//!
//! ARCHITECTURE
//! ============
//! A `Session` owns everything a client holds for its active room: the
//! mirrored member set, the `PeerMesh`, the `CanvasLog`, and the
//! `ListReconciler`. All of it is mutated from a single `tokio::select!`
//! loop, so no component needs a lock. The loop reacts to:
//! - commands from the owner (`SessionHandle`)
//! - inbound frames from the relay, liveness included
//! - media engine reports
//! - completed authority calls (a `JoinSet` scoped to the room)
//! - a periodic tick (negotiation timeouts, outbox retry)
//!
//! Everything the session sends goes through its `Outbox`, so frames are
//! kept in order across transport outages.
//!
//! LIFECYCLE
//! =========
//! join → `room:join` + board fetch → join reply syncs members, starts mesh
//! links and requests canvas history → traffic → leave or exit. Leaving
//! aborts authority calls, closes every peer link, and drops queued frames
//! for the room. `run` performs that teardown on every exit path.
//!
//! On `session:disconnected` the relay has already released the room, so
//! links are closed locally and the room is rejoined on the next
//! `session:connected`. The canvas detaches meanwhile and catches up from a
//! fresh history once the rejoin is acknowledged.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::authority::{AuthorityError, BoardAuthority};
use crate::config::SessionConfig;
use crate::frame::{
    BOARD_UPDATED, CANVAS_CLEAR, CANVAS_DRAW, CANVAS_HISTORY, CANVAS_HISTORY_REQUEST, CANVAS_UNDO, Data, ErrorCode,
    Frame, PEER_SIGNAL, ROOM_JOIN, ROOM_LEAVE, ROOM_MEMBER_JOINED, ROOM_MEMBER_LEFT, SESSION_CONNECTED,
    SESSION_DISCONNECTED, Status, to_value,
};
use crate::ids::{ClientId, RoomId};
use crate::media::{MediaEngine, MediaEvent};
use crate::services::canvas::{Applied, CanvasEvent, CanvasHistory, CanvasLog, RetainedStroke, Stroke};
use crate::services::lists::{BoardSnapshot, ListBoard, ListReconciler, Reconciled, ReorderIntent};
use crate::services::membership::Member;
use crate::services::mesh::{LinkFailure, MeshAction, PeerMesh, Signal};
use crate::transport::outbox::Outbox;
use crate::transport::{ConnectionStatus, Transport};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("not in a room")]
    NotInRoom,
    #[error("session closed")]
    Closed,
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotInRoom => "E_NOT_IN_ROOM",
            Self::Closed => "E_SESSION_CLOSED",
        }
    }
}

/// Request from the session's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Join a room, leaving the current one first.
    Join(RoomId),
    Leave,
    Draw(Stroke),
    Undo,
    Clear,
    /// Move a task. `None` is a drop outside any list and does nothing.
    Reorder(Option<ReorderIntent>),
    HangUp(ClientId),
    Shutdown,
}

/// Notification to the session's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Joined { room: RoomId, members: Vec<Member> },
    Left { room: RoomId },
    MemberJoined(Member),
    MemberLeft(Member),
    PeerConnected(ClientId),
    PeerUnreachable { peer: ClientId, reason: LinkFailure },
    CanvasChanged(Vec<RetainedStroke>),
    /// `authoritative` is false for an optimistic local reorder.
    BoardChanged { board: ListBoard, revision: Option<u64>, authoritative: bool },
    Status(ConnectionStatus),
    Error { code: String, message: String },
}

impl SessionEvent {
    fn error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Error { code: err.error_code().to_owned(), message: err.to_string() }
    }
}

/// Owner side of a running session.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionHandle {
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session loop has exited.
    pub async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| SessionError::Closed)
    }
}

/// Media engine plus the channel it reports on.
pub struct MediaLink {
    pub engine: Box<dyn MediaEngine>,
    pub events: mpsc::UnboundedReceiver<MediaEvent>,
}

enum AuthorityReply {
    Fetched(Result<BoardSnapshot, AuthorityError>),
    Submitted { id: u64, result: Result<BoardSnapshot, AuthorityError> },
}

struct RoomContext {
    id: RoomId,
    members: BTreeMap<ClientId, Member>,
    /// Member asked for canvas history and not yet answered.
    history_source: Option<ClientId>,
    canvas: CanvasLog,
    lists: ListReconciler,
    tasks: JoinSet<AuthorityReply>,
}

enum Step {
    Continue,
    Exit,
}

const COMMAND_QUEUE: usize = 64;

// =============================================================================
// SESSION
// =============================================================================

pub struct Session {
    client_id: ClientId,
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    inbound: mpsc::Receiver<Frame>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    authority: Arc<dyn BoardAuthority>,
    media: Box<dyn MediaEngine>,
    media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    outbox: Outbox,
    mesh: PeerMesh,
    room: Option<RoomContext>,
    status: ConnectionStatus,
    /// Set between `session:disconnected` and the next `session:connected`.
    offline: bool,
}

impl Session {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<Frame>,
        authority: Arc<dyn BoardAuthority>,
        media: MediaLink,
        config: SessionConfig,
    ) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (events, event_rx) = mpsc::unbounded_channel();
        let client_id = transport.client_id().clone();
        let session = Self {
            mesh: PeerMesh::new(client_id.clone(), config.mesh),
            outbox: Outbox::new(config.backoff),
            client_id,
            config,
            transport,
            inbound,
            commands,
            events,
            authority,
            media: media.engine,
            media_rx: media.events,
            room: None,
            status: ConnectionStatus::Connected,
            offline: false,
        };
        (session, SessionHandle { commands: command_tx, events: event_rx })
    }

    /// Drive the session until `Shutdown`, a dropped handle, or a closed
    /// transport. The active room is always left before returning.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(client_id = %self.client_id, "session: started");

        loop {
            let step = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => Step::Exit,
                    Some(command) => {
                        self.on_command(command);
                        Step::Continue
                    }
                },
                frame = self.inbound.recv() => match frame {
                    Some(frame) => {
                        self.on_frame(frame);
                        Step::Continue
                    }
                    None => Step::Exit,
                },
                Some(event) = self.media_rx.recv() => {
                    self.on_media(event);
                    Step::Continue
                }
                Some(reply) = next_authority_reply(&mut self.room) => {
                    self.on_authority(reply);
                    Step::Continue
                }
                _ = ticker.tick() => {
                    let actions = self.mesh.tick(now());
                    self.apply_mesh(actions);
                    Step::Continue
                }
            };
            self.flush().await;
            if matches!(step, Step::Exit) {
                break;
            }
        }

        self.leave_room();
        self.flush().await;
        info!(client_id = %self.client_id, "session: stopped");
    }

    // -------------------------------------------------------------------------
    // OUTPUT
    // -------------------------------------------------------------------------

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!(client_id = %self.client_id, "session: owner gone, event dropped");
        }
    }

    fn send(&mut self, frame: Frame) {
        self.outbox.push(frame);
    }

    async fn flush(&mut self) {
        let status = match self.outbox.flush(self.transport.as_ref(), now()).await {
            ConnectionStatus::Connected if self.offline => ConnectionStatus::Reconnecting,
            status => status,
        };
        self.set_status(status);
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if status != self.status {
            info!(client_id = %self.client_id, ?status, "session: connection status changed");
            self.status = status;
            self.emit(SessionEvent::Status(status));
        }
    }

    fn room_frame(room: &RoomId, syscall: &str) -> Frame {
        Frame::request(syscall, Data::new()).with_room(room.clone())
    }

    // -------------------------------------------------------------------------
    // COMMANDS
    // -------------------------------------------------------------------------

    fn on_command(&mut self, command: Command) {
        debug!(client_id = %self.client_id, ?command, "session: command");
        match command {
            Command::Join(room) => self.join_room(room),
            Command::Leave => {
                if self.room.is_none() {
                    self.emit(SessionEvent::error(&SessionError::NotInRoom));
                }
                self.leave_room();
            }
            Command::Draw(stroke) => self.canvas_op(|ctx| {
                let event = ctx.canvas.append(stroke);
                Some((CANVAS_DRAW, event))
            }),
            Command::Undo => self.canvas_op(|ctx| ctx.canvas.undo().map(|e| (CANVAS_UNDO, e))),
            Command::Clear => self.canvas_op(|ctx| Some((CANVAS_CLEAR, ctx.canvas.clear()))),
            Command::Reorder(None) => debug!(client_id = %self.client_id, "session: drop without destination ignored"),
            Command::Reorder(Some(intent)) => self.reorder(intent),
            Command::HangUp(peer) => {
                let Some(room) = self.room.as_ref().map(|ctx| ctx.id.clone()) else {
                    self.emit(SessionEvent::error(&SessionError::NotInRoom));
                    return;
                };
                match self.mesh.hang_up(&room, &peer) {
                    Ok(actions) => self.apply_mesh(actions),
                    Err(e) => self.emit(SessionEvent::error(&e)),
                }
            }
            Command::Shutdown => {}
        }
    }

    /// Run a local canvas operation and broadcast the resulting event.
    fn canvas_op(&mut self, op: impl FnOnce(&mut RoomContext) -> Option<(&'static str, CanvasEvent)>) {
        let Some(ctx) = self.room.as_mut() else {
            self.emit(SessionEvent::error(&SessionError::NotInRoom));
            return;
        };
        let Some((syscall, event)) = op(&mut *ctx) else {
            return;
        };
        let strokes = ctx.canvas.replay();
        let frame = Self::room_frame(&ctx.id, syscall).with_data("event", to_value(&event));
        self.send(frame);
        self.emit(SessionEvent::CanvasChanged(strokes));
    }

    fn join_room(&mut self, room: RoomId) {
        if self.room.as_ref().is_some_and(|ctx| ctx.id == room) {
            debug!(client_id = %self.client_id, %room, "session: already in room");
            return;
        }
        self.leave_room();

        let mut ctx = RoomContext {
            id: room.clone(),
            members: BTreeMap::new(),
            history_source: None,
            canvas: CanvasLog::new(room.clone(), self.client_id.clone()),
            lists: ListReconciler::new(room.clone()),
            tasks: JoinSet::new(),
        };
        spawn_fetch(&self.authority, &mut ctx);
        self.room = Some(ctx);
        self.send(Self::room_frame(&room, ROOM_JOIN));
        info!(client_id = %self.client_id, %room, "session: joining room");
    }

    /// Leave the active room, if any, and release everything scoped to it.
    fn leave_room(&mut self) {
        let Some(mut ctx) = self.room.take() else {
            return;
        };
        ctx.tasks.abort_all();
        let cancelled = ctx.lists.cancel_pending();
        let actions = self.mesh.leave_room(&ctx.id);
        self.apply_mesh(actions);
        let dropped = self.outbox.drain_room(&ctx.id);
        // The relay already released the room when the transport dropped.
        if !self.offline {
            self.send(Self::room_frame(&ctx.id, ROOM_LEAVE));
        }
        info!(client_id = %self.client_id, room = %ctx.id, cancelled, dropped, "session: left room");
        self.emit(SessionEvent::Left { room: ctx.id });
    }

    fn reorder(&mut self, intent: ReorderIntent) {
        let Some(ctx) = self.room.as_mut() else {
            self.emit(SessionEvent::error(&SessionError::NotInRoom));
            return;
        };
        let submission = match ctx.lists.reorder(intent) {
            Ok(submission) => submission,
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e, "session: reorder rejected");
                self.emit(SessionEvent::error(&e));
                return;
            }
        };
        let revision = ctx.lists.revision();
        let authority = Arc::clone(&self.authority);
        let id = submission.id;
        ctx.tasks.spawn(async move {
            let result = authority.submit(&submission.room, &submission.board).await;
            AuthorityReply::Submitted { id, result }
        });
        let board = ctx.lists.board().clone();
        self.emit(SessionEvent::BoardChanged { board, revision, authoritative: false });
    }

    // -------------------------------------------------------------------------
    // INBOUND FRAMES
    // -------------------------------------------------------------------------

    fn on_frame(&mut self, frame: Frame) {
        match frame.syscall.as_str() {
            SESSION_CONNECTED => {
                self.on_connected();
                return;
            }
            SESSION_DISCONNECTED => {
                self.on_disconnected();
                return;
            }
            _ => {}
        }

        let in_room = match (&self.room, &frame.room) {
            (Some(ctx), Some(room)) => ctx.id == *room,
            _ => false,
        };
        if frame.status == Status::Error {
            self.on_error_frame(&frame, in_room);
            return;
        }
        if !in_room {
            debug!(client_id = %self.client_id, syscall = %frame.syscall, "session: frame for inactive room dropped");
            return;
        }

        match frame.syscall.as_str() {
            ROOM_JOIN if frame.status == Status::Done => self.on_join_reply(&frame),
            ROOM_MEMBER_JOINED => self.on_member_joined(&frame),
            ROOM_MEMBER_LEFT => self.on_member_left(&frame),
            PEER_SIGNAL => self.on_signal(&frame),
            CANVAS_DRAW | CANVAS_UNDO | CANVAS_CLEAR => self.on_canvas_event(&frame),
            CANVAS_HISTORY_REQUEST => self.on_history_request(&frame),
            CANVAS_HISTORY => self.on_history(&frame),
            BOARD_UPDATED => self.on_board_updated(&frame),
            _ => debug!(client_id = %self.client_id, syscall = %frame.syscall, "session: unhandled frame"),
        }
    }

    fn on_connected(&mut self) {
        self.outbox.reset();
        self.set_status(ConnectionStatus::Connected);
        if !std::mem::take(&mut self.offline) {
            return;
        }
        let Some(ctx) = self.room.as_mut() else {
            return;
        };
        // The relay released the room when the link dropped. Rejoin ahead of
        // anything queued for the room while offline, and refresh the board.
        let room = ctx.id.clone();
        spawn_fetch(&self.authority, ctx);
        self.outbox.push_front(Self::room_frame(&room, ROOM_JOIN));
        info!(client_id = %self.client_id, %room, "session: rejoining room after reconnect");
    }

    fn on_disconnected(&mut self) {
        self.offline = true;
        self.set_status(ConnectionStatus::Reconnecting);
        let Some(ctx) = self.room.as_mut() else {
            return;
        };
        ctx.history_source = None;
        ctx.canvas.detach();
        let local = self.client_id.clone();
        ctx.members.retain(|id, _| *id == local);
        let room = ctx.id.clone();
        let actions = self.mesh.leave_room(&room);
        self.apply_mesh(actions);
        warn!(client_id = %self.client_id, %room, "session: transport lost, peer links closed");
    }

    fn on_error_frame(&mut self, frame: &Frame, in_room: bool) {
        let code = frame.error_code().unwrap_or("E_UNKNOWN").to_owned();
        let message = frame.error_message().unwrap_or_default().to_owned();
        warn!(client_id = %self.client_id, syscall = %frame.syscall, %code, %message, "session: relay error");

        if in_room && frame.syscall == ROOM_JOIN {
            if let Some(mut ctx) = self.room.take() {
                ctx.tasks.abort_all();
                self.outbox.drain_room(&ctx.id);
            }
        }
        self.emit(SessionEvent::Error { code, message });
    }

    fn on_join_reply(&mut self, frame: &Frame) {
        let members = match frame.field::<Vec<Member>>("members") {
            Ok(members) => members,
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e, "session: malformed join reply");
                return;
            }
        };
        let Some(ctx) = self.room.as_mut() else {
            return;
        };
        ctx.members = members.iter().map(|m| (m.client_id.clone(), m.clone())).collect();
        let room = ctx.id.clone();
        let ids = ctx.members.keys().cloned().collect::<Vec<_>>();
        self.request_history();

        let actions = self.mesh.sync_members(&room, &ids, now());
        self.apply_mesh(actions);
        info!(client_id = %self.client_id, %room, members = members.len(), "session: joined room");
        self.emit(SessionEvent::Joined { room, members });
    }

    fn on_member_joined(&mut self, frame: &Frame) {
        let Ok(member) = frame.field::<Member>("member") else {
            warn!(client_id = %self.client_id, "session: malformed member_joined");
            return;
        };
        if member.client_id == self.client_id {
            return;
        }
        let Some(ctx) = self.room.as_mut() else {
            return;
        };
        ctx.members.insert(member.client_id.clone(), member.clone());
        let room = ctx.id.clone();
        let actions = self.mesh.member_joined(&room, &member.client_id, now());
        self.apply_mesh(actions);
        self.emit(SessionEvent::MemberJoined(member));
    }

    fn on_member_left(&mut self, frame: &Frame) {
        let Ok(member) = frame.field::<Member>("member") else {
            warn!(client_id = %self.client_id, "session: malformed member_left");
            return;
        };
        let Some(ctx) = self.room.as_mut() else {
            return;
        };
        ctx.members.remove(&member.client_id);
        ctx.canvas.forget_author(&member.client_id);
        let room = ctx.id.clone();
        if ctx.history_source.as_ref() == Some(&member.client_id) {
            debug!(client_id = %self.client_id, peer = %member.client_id, "session: history source left");
            self.request_history();
        }
        let actions = self.mesh.member_left(&room, &member.client_id);
        self.apply_mesh(actions);
        self.emit(SessionEvent::MemberLeft(member));
    }

    /// Ask the other member with the smallest id for canvas history. With no
    /// one to ask, the canvas is already complete.
    fn request_history(&mut self) {
        let Some(ctx) = self.room.as_mut() else {
            return;
        };
        if ctx.canvas.is_live() {
            return;
        }
        let source = ctx.members.keys().find(|id| **id != self.client_id).cloned();
        ctx.history_source.clone_from(&source);
        match source {
            Some(source) => {
                let request = Self::room_frame(&ctx.id, CANVAS_HISTORY_REQUEST).with_to(source);
                self.send(request);
            }
            None => ctx.canvas.go_live(),
        }
    }

    fn on_signal(&mut self, frame: &Frame) {
        let (Some(room), Some(from)) = (frame.room.clone(), frame.from.clone()) else {
            return;
        };
        match frame.field::<Signal>("signal") {
            Ok(signal) => {
                let actions = self.mesh.remote_signal(&room, &from, signal, now());
                self.apply_mesh(actions);
            }
            Err(e) => warn!(client_id = %self.client_id, peer = %from, error = %e, "session: malformed signal"),
        }
    }

    fn on_canvas_event(&mut self, frame: &Frame) {
        let event = match frame.field::<CanvasEvent>("event") {
            Ok(event) => event,
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e, "session: malformed canvas event");
                return;
            }
        };
        let Some(ctx) = self.room.as_mut() else {
            return;
        };
        match ctx.canvas.apply(&event) {
            Ok(Applied::Duplicate) => {}
            Ok(_) => {
                let strokes = ctx.canvas.replay();
                self.emit(SessionEvent::CanvasChanged(strokes));
            }
            Err(e) => warn!(client_id = %self.client_id, error = %e, "session: canvas event rejected"),
        }
    }

    fn on_history_request(&mut self, frame: &Frame) {
        let (Some(ctx), Some(from)) = (self.room.as_ref(), frame.from.clone()) else {
            return;
        };
        let history = ctx.canvas.history();
        debug!(client_id = %self.client_id, peer = %from, count = history.strokes.len(), "session: serving canvas history");
        let reply = Self::room_frame(&ctx.id, CANVAS_HISTORY)
            .with_to(from)
            .with_data("history", to_value(&history));
        self.send(reply);
    }

    fn on_history(&mut self, frame: &Frame) {
        let history = match frame.field::<CanvasHistory>("history") {
            Ok(history) => history,
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e, "session: malformed canvas history");
                return;
            }
        };
        let Some(ctx) = self.room.as_mut() else {
            return;
        };
        if ctx.history_source.is_none() || ctx.history_source != frame.from {
            debug!(client_id = %self.client_id, from = ?frame.from, "session: unrequested canvas history dropped");
            return;
        }
        ctx.history_source = None;
        if ctx.canvas.adopt_history(history) {
            let strokes = ctx.canvas.replay();
            self.emit(SessionEvent::CanvasChanged(strokes));
        }
    }

    fn on_board_updated(&mut self, frame: &Frame) {
        let snapshot = match frame.field::<BoardSnapshot>("snapshot") {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e, "session: malformed board snapshot");
                return;
            }
        };
        let Some(ctx) = self.room.as_mut() else {
            return;
        };
        let reconciled = ctx.lists.on_snapshot(snapshot);
        self.emit_reconciled(reconciled);
    }

    fn emit_reconciled(&self, reconciled: Reconciled) {
        if let Reconciled::Adopted(snapshot) = reconciled {
            self.emit(SessionEvent::BoardChanged {
                board: snapshot.board,
                revision: Some(snapshot.revision),
                authoritative: true,
            });
        }
    }

    // -------------------------------------------------------------------------
    // AUTHORITY
    // -------------------------------------------------------------------------

    fn on_authority(&mut self, reply: AuthorityReply) {
        let Some(ctx) = self.room.as_mut() else {
            return;
        };
        match reply {
            AuthorityReply::Fetched(Ok(snapshot)) => {
                let reconciled = ctx.lists.on_snapshot(snapshot);
                self.emit_reconciled(reconciled);
            }
            AuthorityReply::Fetched(Err(e)) => {
                warn!(client_id = %self.client_id, room = %ctx.id, error = %e, "session: board fetch failed");
                self.emit(SessionEvent::error(&e));
            }
            AuthorityReply::Submitted { id, result: Ok(snapshot) } => {
                // Broadcast every answer; peers drop revisions they have passed.
                let update = Self::room_frame(&ctx.id, BOARD_UPDATED).with_data("snapshot", to_value(&snapshot));
                let reconciled = ctx.lists.on_authority_response(id, snapshot);
                self.send(update);
                self.emit_reconciled(reconciled);
            }
            AuthorityReply::Submitted { id, result: Err(e) } => {
                ctx.lists.on_authority_failure(id, &e);
                self.emit(SessionEvent::error(&e));
            }
        }
    }

    // -------------------------------------------------------------------------
    // MESH
    // -------------------------------------------------------------------------

    fn on_media(&mut self, event: MediaEvent) {
        let now = now();
        let actions = match event {
            MediaEvent::LocalSignal { room, peer, signal } => self.mesh.local_signal(&room, &peer, signal),
            MediaEvent::Ready { room, peer, generation } => self.mesh.media_ready(&room, &peer, generation),
            MediaEvent::Failed { room, peer, generation, reason } => {
                self.mesh.media_failed(&room, &peer, generation, reason, now)
            }
        };
        self.apply_mesh(actions);
    }

    fn apply_mesh(&mut self, actions: Vec<MeshAction>) {
        for action in actions {
            self.apply_mesh_action(action);
        }
    }

    fn apply_mesh_action(&mut self, action: MeshAction) {
        match action {
            MeshAction::Open { room, peer, role, generation } => self.media.open(&room, &peer, role, generation),
            MeshAction::Deliver { room, peer, signal } => self.media.signal(&room, &peer, signal),
            MeshAction::Send { room, peer, signal } => {
                let frame = Self::room_frame(&room, PEER_SIGNAL)
                    .with_to(peer)
                    .with_data("signal", to_value(&signal));
                self.send(frame);
            }
            MeshAction::Close { room, peer } => self.media.close(&room, &peer),
            MeshAction::Connected { peer, .. } => self.emit(SessionEvent::PeerConnected(peer)),
            MeshAction::Unreachable { peer, reason, .. } => self.emit(SessionEvent::PeerUnreachable { peer, reason }),
        }
    }
}

/// Next completed authority call for the active room; pends forever when
/// there is nothing in flight.
async fn next_authority_reply(room: &mut Option<RoomContext>) -> Option<AuthorityReply> {
    match room {
        Some(ctx) if !ctx.tasks.is_empty() => match ctx.tasks.join_next().await? {
            Ok(reply) => Some(reply),
            Err(e) => {
                debug!(error = %e, "session: authority task ended without reply");
                None
            }
        },
        _ => std::future::pending().await,
    }
}

fn spawn_fetch(authority: &Arc<dyn BoardAuthority>, ctx: &mut RoomContext) {
    let authority = Arc::clone(authority);
    let room = ctx.id.clone();
    ctx.tasks.spawn(async move { AuthorityReply::Fetched(authority.fetch(&room).await) });
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
