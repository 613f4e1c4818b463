use super::*;

fn room() -> RoomId {
    RoomId::from("R1")
}

#[test]
fn request_sets_fields() {
    let frame = Frame::request(ROOM_JOIN, Data::new());
    assert_eq!(frame.syscall, "room:join");
    assert_eq!(frame.status, Status::Request);
    assert!(frame.parent_id.is_none());
    assert!(frame.room.is_none());
    assert!(frame.to.is_none());
    assert!(frame.ts > 0);
}

#[test]
fn reply_inherits_context() {
    let req = Frame::request(ROOM_JOIN, Data::new()).with_room(room());
    let done = req.done_with(Data::new());

    assert_eq!(done.parent_id, Some(req.id));
    assert_eq!(done.room, Some(room()));
    assert_eq!(done.syscall, "room:join");
    assert_eq!(done.status, Status::Done);
}

#[test]
fn prefix_is_the_routing_namespace() {
    assert_eq!(Frame::request(CANVAS_HISTORY_REQUEST, Data::new()).prefix(), "canvas");
    assert_eq!(Frame::request("noseparator", Data::new()).prefix(), "noseparator");
}

#[test]
fn addressed_frame_survives_json() {
    let original = Frame::request(PEER_SIGNAL, Data::new())
        .with_room(room())
        .with_from(ClientId::from("alice"))
        .with_to(ClientId::from("bob"))
        .with_data("key", "value");

    let json = serde_json::to_string(&original).expect("serialize");
    let restored: Frame = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(restored.id, original.id);
    assert_eq!(restored.room, Some(room()));
    assert_eq!(restored.from, Some(ClientId::from("alice")));
    assert_eq!(restored.to, Some(ClientId::from("bob")));
    assert_eq!(restored.data.get("key").and_then(|v| v.as_str()), Some("value"));
}

#[test]
fn broadcast_frame_omits_to_on_the_wire() {
    let frame = Frame::request(CANVAS_CLEAR, Data::new()).with_room(room());
    let json = serde_json::to_value(&frame).expect("serialize");
    assert!(json.get("to").is_none());
    assert_eq!(json.get("room").and_then(|v| v.as_str()), Some("R1"));
}

#[test]
fn error_from_typed() {
    #[derive(Debug, thiserror::Error)]
    #[error("room gone")]
    struct Gone;

    impl ErrorCode for Gone {
        fn error_code(&self) -> &'static str {
            "E_GONE"
        }

        fn retryable(&self) -> bool {
            true
        }
    }

    let req = Frame::request(ROOM_LEAVE, Data::new());
    let err = req.error_from(&Gone);

    assert_eq!(err.status, Status::Error);
    assert_eq!(err.error_code(), Some("E_GONE"));
    assert_eq!(err.error_message(), Some("room gone"));
    assert_eq!(err.data.get("retryable").and_then(serde_json::Value::as_bool), Some(true));
}

#[test]
fn field_reads_typed_values() {
    let frame = Frame::request(BOARD_UPDATED, Data::new())
        .with_data("revision", 7)
        .with_data("name", "todo");

    assert_eq!(frame.field::<u64>("revision"), Ok(7));
    assert_eq!(frame.field::<String>("name"), Ok("todo".to_owned()));
    assert_eq!(frame.field::<u64>("absent"), Err(FieldError::Missing("absent")));
    assert!(matches!(frame.field::<u64>("name"), Err(FieldError::Invalid { key: "name", .. })));
}

#[test]
fn unserializable_payload_becomes_null() {
    let keyed_by_pair = HashMap::from([((1_u8, 2_u8), 3_u8)]);
    assert_eq!(to_value(&keyed_by_pair), serde_json::Value::Null);
    assert_eq!(to_value(&HashMap::from([("k", 3_u8)])), serde_json::json!({"k": 3}));
}
