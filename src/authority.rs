//! Board authority — the external source of truth for list boards.
//!
//! DESIGN
//! ======
//! Sessions never own a board. They submit a full snapshot and adopt
//! whatever the authority answers. The trait is the seam: `HttpAuthority`
//! talks to the real service over HTTP, `MemoryAuthority` stands in for it
//! in-process (tests, local demos).
//!
//! The authority is last-write-wins by submission order. A submission equal
//! to the stored board does not bump the revision, so retrying the same
//! snapshot is idempotent.
//!
//! ERROR HANDLING
//! ==============
//! Transport failures and 5xx answers are retryable; 4xx answers and
//! undecodable bodies are not. The reconciler keeps its optimistic board on
//! any failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::AuthorityConfig;
use crate::frame::ErrorCode;
use crate::ids::RoomId;
use crate::services::lists::{BoardSnapshot, ListBoard};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    #[error("failed to build http client: {0}")]
    HttpClientBuild(String),
    #[error("authority request failed: {0}")]
    Request(String),
    #[error("authority returned {status}: {body}")]
    Response { status: u16, body: String },
    #[error("invalid authority response: {0}")]
    Decode(String),
    #[error("board rejected: {0}")]
    Rejected(String),
    #[error("authority unavailable")]
    Unavailable,
}

impl ErrorCode for AuthorityError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::HttpClientBuild(_) => "E_AUTHORITY_CLIENT",
            Self::Request(_) => "E_AUTHORITY_REQUEST",
            Self::Response { .. } => "E_AUTHORITY_RESPONSE",
            Self::Decode(_) => "E_AUTHORITY_DECODE",
            Self::Rejected(_) => "E_BOARD_REJECTED",
            Self::Unavailable => "E_AUTHORITY_UNAVAILABLE",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Request(_) | Self::Unavailable => true,
            Self::Response { status, .. } => *status >= 500,
            Self::HttpClientBuild(_) | Self::Decode(_) | Self::Rejected(_) => false,
        }
    }
}

/// Fetch and replace boards held by the external authority.
#[async_trait::async_trait]
pub trait BoardAuthority: Send + Sync {
    /// Current authoritative board for `room`. A room the authority has never
    /// seen yields an empty board at revision 0.
    async fn fetch(&self, room: &RoomId) -> Result<BoardSnapshot, AuthorityError>;

    /// Replace the board for `room` with `board` and return the result.
    async fn submit(&self, room: &RoomId, board: &ListBoard) -> Result<BoardSnapshot, AuthorityError>;
}

// =============================================================================
// HTTP
// =============================================================================

/// Authority reached at `{base_url}/boards/{room}`.
pub struct HttpAuthority {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpAuthority {
    /// # Errors
    ///
    /// Returns [`AuthorityError::HttpClientBuild`] if the client cannot be
    /// constructed.
    pub fn new(config: &AuthorityConfig) -> Result<Self, AuthorityError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| AuthorityError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: config.base_url.clone(), token: config.token.clone() })
    }

    fn url(&self, room: &RoomId) -> String {
        format!("{}/boards/{}", self.base_url, room)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<(u16, String), AuthorityError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| AuthorityError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| AuthorityError::Request(e.to_string()))?;
        Ok((status, text))
    }
}

#[async_trait::async_trait]
impl BoardAuthority for HttpAuthority {
    async fn fetch(&self, room: &RoomId) -> Result<BoardSnapshot, AuthorityError> {
        let (status, body) = self.execute(self.http.get(self.url(room))).await?;
        if status == 404 {
            debug!(%room, "authority: no board yet");
            return Ok(BoardSnapshot { revision: 0, board: ListBoard::default() });
        }
        parse_snapshot(status, &body)
    }

    async fn submit(&self, room: &RoomId, board: &ListBoard) -> Result<BoardSnapshot, AuthorityError> {
        let (status, body) = self.execute(self.http.put(self.url(room)).json(board)).await?;
        parse_snapshot(status, &body)
    }
}

/// Interpret an authority response body.
///
/// # Errors
///
/// Returns [`AuthorityError::Response`] for non-2xx statuses and
/// [`AuthorityError::Decode`] for bodies that are not a board snapshot.
pub fn parse_snapshot(status: u16, body: &str) -> Result<BoardSnapshot, AuthorityError> {
    if !(200..300).contains(&status) {
        return Err(AuthorityError::Response { status, body: body.to_owned() });
    }
    serde_json::from_str(body).map_err(|e| AuthorityError::Decode(e.to_string()))
}

// =============================================================================
// IN-MEMORY
// =============================================================================

/// In-process authority with the same semantics as the real service.
#[derive(Default)]
pub struct MemoryAuthority {
    boards: Mutex<HashMap<RoomId, BoardSnapshot>>,
    offline: AtomicBool,
}

impl MemoryAuthority {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a board at revision 1.
    pub async fn seed(&self, room: &RoomId, board: ListBoard) {
        self.boards
            .lock()
            .await
            .insert(room.clone(), BoardSnapshot { revision: 1, board });
    }

    /// While offline, every call fails with [`AuthorityError::Unavailable`].
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub async fn snapshot(&self, room: &RoomId) -> Option<BoardSnapshot> {
        self.boards.lock().await.get(room).cloned()
    }

    fn check_online(&self) -> Result<(), AuthorityError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(AuthorityError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl BoardAuthority for MemoryAuthority {
    async fn fetch(&self, room: &RoomId) -> Result<BoardSnapshot, AuthorityError> {
        self.check_online()?;
        let boards = self.boards.lock().await;
        Ok(boards
            .get(room)
            .cloned()
            .unwrap_or(BoardSnapshot { revision: 0, board: ListBoard::default() }))
    }

    async fn submit(&self, room: &RoomId, board: &ListBoard) -> Result<BoardSnapshot, AuthorityError> {
        self.check_online()?;
        board.validate().map_err(|e| AuthorityError::Rejected(e.to_string()))?;

        let mut boards = self.boards.lock().await;
        let entry = boards
            .entry(room.clone())
            .or_insert_with(|| BoardSnapshot { revision: 0, board: ListBoard::default() });
        if entry.board == *board {
            debug!(%room, revision = entry.revision, "authority: unchanged board, revision kept");
            return Ok(entry.clone());
        }
        entry.revision += 1;
        entry.board = board.clone();
        info!(%room, revision = entry.revision, "authority: board replaced");
        Ok(entry.clone())
    }
}

#[cfg(test)]
#[path = "authority_test.rs"]
mod tests;
