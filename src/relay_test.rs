use super::*;
use crate::frame::{CANVAS_DRAW, PEER_SIGNAL, Status};

fn id(s: &str) -> ClientId {
    ClientId::from(s)
}

fn room() -> RoomId {
    RoomId::from("R1")
}

fn connect(core: &mut RelayCore, name: &str) -> mpsc::Receiver<Frame> {
    let (tx, mut rx) = mpsc::channel(64);
    core.connect(&id(name), name, tx).unwrap();
    let welcome = rx.try_recv().unwrap();
    assert_eq!(welcome.syscall, SESSION_CONNECTED);
    rx
}

fn join(core: &mut RelayCore, name: &str) {
    core.dispatch(&id(name), Frame::request(ROOM_JOIN, Data::new()).with_room(room()));
}

fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(f) = rx.try_recv() {
        frames.push(f);
    }
    frames
}

#[test]
fn join_replies_with_members_and_notifies_existing() {
    let mut core = RelayCore::new();
    let mut alice = connect(&mut core, "alice");
    let mut bob = connect(&mut core, "bob");

    join(&mut core, "alice");
    drain(&mut alice);
    join(&mut core, "bob");

    let reply = drain(&mut bob);
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].status, Status::Done);
    let members: Vec<Member> = reply[0].field("members").unwrap();
    assert_eq!(members.len(), 2);

    let notified = drain(&mut alice);
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].syscall, ROOM_MEMBER_JOINED);
    assert_eq!(notified[0].from, Some(id("bob")));
}

#[test]
fn broadcast_excludes_sender_and_stamps_from() {
    let mut core = RelayCore::new();
    let mut alice = connect(&mut core, "alice");
    let mut bob = connect(&mut core, "bob");
    let mut carol = connect(&mut core, "carol");
    for name in ["alice", "bob", "carol"] {
        join(&mut core, name);
    }
    drain(&mut alice);
    drain(&mut bob);
    drain(&mut carol);

    let spoofed = Frame::request(CANVAS_DRAW, Data::new()).with_room(room()).with_from(id("mallory"));
    core.dispatch(&id("alice"), spoofed);

    assert!(drain(&mut alice).is_empty());
    for rx in [&mut bob, &mut carol] {
        let got = drain(rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].from, Some(id("alice")));
    }
}

#[test]
fn addressed_frames_reach_only_the_addressee() {
    let mut core = RelayCore::new();
    let mut alice = connect(&mut core, "alice");
    let mut bob = connect(&mut core, "bob");
    let mut carol = connect(&mut core, "carol");
    for name in ["alice", "bob", "carol"] {
        join(&mut core, name);
    }
    drain(&mut alice);
    drain(&mut bob);
    drain(&mut carol);

    core.dispatch(&id("alice"), Frame::request(PEER_SIGNAL, Data::new()).with_room(room()).with_to(id("carol")));
    assert!(drain(&mut bob).is_empty());
    assert_eq!(drain(&mut carol).len(), 1);
}

#[test]
fn non_member_traffic_is_rejected_to_sender() {
    let mut core = RelayCore::new();
    let mut alice = connect(&mut core, "alice");
    let mut bob = connect(&mut core, "bob");
    join(&mut core, "alice");
    drain(&mut alice);

    core.dispatch(&id("bob"), Frame::request(CANVAS_DRAW, Data::new()).with_room(room()));
    let errors = drain(&mut bob);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].status, Status::Error);
    assert_eq!(errors[0].error_code(), Some("E_NOT_MEMBER"));
    assert!(drain(&mut alice).is_empty());
}

#[test]
fn leave_of_discarded_room_fails_with_room_not_found() {
    let mut core = RelayCore::new();
    let mut alice = connect(&mut core, "alice");
    join(&mut core, "alice");
    core.dispatch(&id("alice"), Frame::request(ROOM_LEAVE, Data::new()).with_room(room()));
    drain(&mut alice);
    assert_eq!(core.room_count(), 0);

    core.dispatch(&id("alice"), Frame::request(ROOM_LEAVE, Data::new()).with_room(room()));
    let errors = drain(&mut alice);
    assert_eq!(errors[0].error_code(), Some("E_ROOM_NOT_FOUND"));
}

#[test]
fn ungraceful_disconnect_announces_member_left() {
    let mut core = RelayCore::new();
    let mut alice = connect(&mut core, "alice");
    let _bob = connect(&mut core, "bob");
    join(&mut core, "alice");
    join(&mut core, "bob");
    drain(&mut alice);

    let outcome = core.disconnect(&id("bob")).unwrap();
    assert_eq!(outcome.room, room());

    let left = drain(&mut alice);
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].syscall, ROOM_MEMBER_LEFT);
    assert_eq!(left[0].from, Some(id("bob")));
    assert_eq!(core.client_count(), 1);
}

#[test]
fn duplicate_client_id_is_refused() {
    let mut core = RelayCore::new();
    let _alice = connect(&mut core, "alice");
    let (tx, _rx) = mpsc::channel(4);
    assert_eq!(core.connect(&id("alice"), "alice", tx), Err(RelayError::DuplicateClient(id("alice"))));
}

#[test]
fn unknown_prefix_is_answered_with_error() {
    let mut core = RelayCore::new();
    let mut alice = connect(&mut core, "alice");
    core.dispatch(&id("alice"), Frame::request("object:create", Data::new()));
    let errors = drain(&mut alice);
    assert_eq!(errors[0].error_code(), Some("E_UNKNOWN_PREFIX"));
}

#[test]
fn client_that_falls_behind_is_evicted_and_announced() {
    let mut core = RelayCore::new();
    let mut alice = connect(&mut core, "alice");
    // Room for the welcome and the join reply, nothing more.
    let (tx, mut slow) = mpsc::channel(2);
    core.connect(&id("bob"), "bob", tx).unwrap();
    join(&mut core, "alice");
    join(&mut core, "bob");
    drain(&mut alice);

    core.dispatch(&id("alice"), Frame::request(CANVAS_DRAW, Data::new()).with_room(room()));

    assert!(!core.is_connected(&id("bob")));
    assert_eq!(core.client_count(), 1);
    assert_eq!(core.members(&room()).unwrap().len(), 1);
    let left = drain(&mut alice);
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].syscall, ROOM_MEMBER_LEFT);
    assert_eq!(left[0].from, Some(id("bob")));

    assert_eq!(drain(&mut slow).len(), 2);
    assert!(matches!(slow.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
}
