use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;

use super::*;
use crate::ids::{ListId, TaskId};
use crate::services::lists::{Task, TaskList};

fn room() -> RoomId {
    RoomId::from("R1")
}

fn board(todo: &[&str], done: &[&str]) -> ListBoard {
    let list = |id: &str, tasks: &[&str]| TaskList {
        id: ListId::from(id),
        name: id.to_owned(),
        tasks: tasks
            .iter()
            .map(|t| Task { id: TaskId::from(*t), title: (*t).to_owned(), description: None })
            .collect(),
    };
    ListBoard { lists: vec![list("todo", todo), list("done", done)] }
}

#[tokio::test]
async fn unknown_room_fetches_empty_board() {
    let authority = MemoryAuthority::new();
    let snap = authority.fetch(&room()).await.unwrap();
    assert_eq!(snap.revision, 0);
    assert!(snap.board.lists.is_empty());
}

#[tokio::test]
async fn submit_bumps_revision_and_replaces_board() {
    let authority = MemoryAuthority::new();
    authority.seed(&room(), board(&["T1", "T2"], &[])).await;

    let moved = board(&["T2"], &["T1"]);
    let snap = authority.submit(&room(), &moved).await.unwrap();
    assert_eq!(snap.revision, 2);
    assert_eq!(snap.board, moved);
    assert_eq!(authority.fetch(&room()).await.unwrap(), snap);
}

#[tokio::test]
async fn identical_submission_is_idempotent() {
    let authority = MemoryAuthority::new();
    authority.seed(&room(), board(&["T1"], &[])).await;
    let moved = board(&[], &["T1"]);

    let first = authority.submit(&room(), &moved).await.unwrap();
    let second = authority.submit(&room(), &moved).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second.revision, 2);
}

#[tokio::test]
async fn board_with_duplicate_task_is_rejected() {
    let authority = MemoryAuthority::new();
    let err = authority.submit(&room(), &board(&["T1"], &["T1"])).await.unwrap_err();
    assert_eq!(err.error_code(), "E_BOARD_REJECTED");
    assert!(!err.retryable());
    assert!(authority.snapshot(&room()).await.is_none());
}

#[tokio::test]
async fn offline_authority_fails_retryably() {
    let authority = MemoryAuthority::new();
    authority.set_online(false);
    let err = authority.fetch(&room()).await.unwrap_err();
    assert_eq!(err, AuthorityError::Unavailable);
    assert!(err.retryable());

    authority.set_online(true);
    assert!(authority.fetch(&room()).await.is_ok());
}

#[test]
fn parse_snapshot_accepts_flattened_board() {
    let body = r#"{"revision":7,"lists":[{"id":"todo","name":"To do","tasks":[{"id":"T1","title":"Write"}]}]}"#;
    let snap = parse_snapshot(200, body).unwrap();
    assert_eq!(snap.revision, 7);
    assert_eq!(snap.board.task_count(), 1);
}

#[test]
fn parse_snapshot_maps_status_and_decode_errors() {
    let err = parse_snapshot(503, "busy").unwrap_err();
    assert_eq!(err, AuthorityError::Response { status: 503, body: "busy".into() });
    assert!(err.retryable());

    let err = parse_snapshot(409, "conflict").unwrap_err();
    assert!(!err.retryable());

    let err = parse_snapshot(200, "not json").unwrap_err();
    assert!(matches!(err, AuthorityError::Decode(_)));
}

#[test]
fn http_authority_builds_room_url() {
    let config = AuthorityConfig {
        base_url: "http://authority.test".into(),
        token: Some("secret".into()),
        timeout: std::time::Duration::from_secs(1),
    };
    let authority = HttpAuthority::new(&config).unwrap();
    assert_eq!(authority.url(&room()), "http://authority.test/boards/R1");
}

// =============================================================================
// HTTP round trip against a stub authority
// =============================================================================

type Stub = Arc<MemoryAuthority>;

const TOKEN: &str = "secret";

fn authorized(headers: &HeaderMap) -> bool {
    headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some("Bearer secret")
}

async fn stub_get(State(stub): State<Stub>, Path(room): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match stub.snapshot(&RoomId::from(room.as_str())).await {
        Some(snap) => Json(snap).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stub_put(
    State(stub): State<Stub>,
    Path(room): Path<String>,
    headers: HeaderMap,
    Json(board): Json<ListBoard>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match stub.submit(&RoomId::from(room.as_str()), &board).await {
        Ok(snap) => Json(snap).into_response(),
        Err(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response(),
    }
}

async fn spawn_stub(stub: Stub) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/boards/{room}", get(stub_get).put(stub_put)).with_state(stub);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn http_authority(base_url: String, token: Option<&str>) -> HttpAuthority {
    HttpAuthority::new(&AuthorityConfig {
        base_url,
        token: token.map(str::to_owned),
        timeout: std::time::Duration::from_secs(2),
    })
    .unwrap()
}

#[tokio::test]
async fn http_authority_fetches_and_submits() {
    let stub = Arc::new(MemoryAuthority::new());
    let base = spawn_stub(Arc::clone(&stub)).await;
    let authority = http_authority(base, Some(TOKEN));

    let empty = authority.fetch(&room()).await.unwrap();
    assert_eq!(empty.revision, 0);

    stub.seed(&room(), board(&["T1", "T2"], &[])).await;
    assert_eq!(authority.fetch(&room()).await.unwrap().revision, 1);

    let moved = board(&["T2"], &["T1"]);
    let snap = authority.submit(&room(), &moved).await.unwrap();
    assert_eq!(snap.revision, 2);
    assert_eq!(snap.board, moved);
    assert_eq!(stub.snapshot(&room()).await.unwrap(), snap);
}

#[tokio::test]
async fn http_authority_surfaces_rejections() {
    let stub = Arc::new(MemoryAuthority::new());
    let base = spawn_stub(stub).await;

    let anonymous = http_authority(base.clone(), None);
    let err = anonymous.fetch(&room()).await.unwrap_err();
    assert!(matches!(err, AuthorityError::Response { status: 401, .. }));
    assert!(!err.retryable());

    let authority = http_authority(base, Some(TOKEN));
    let err = authority.submit(&room(), &board(&["T1"], &["T1"])).await.unwrap_err();
    assert!(matches!(err, AuthorityError::Response { status: 422, .. }));
}

#[tokio::test]
async fn unreachable_authority_is_retryable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let authority = http_authority(format!("http://{addr}"), None);
    let err = authority.fetch(&room()).await.unwrap_err();
    assert!(matches!(err, AuthorityError::Request(_)));
    assert!(err.retryable());
}
