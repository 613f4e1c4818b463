use super::*;

fn task(id: &str) -> Task {
    Task { id: TaskId::from(id), title: format!("Task {id}"), description: None }
}

fn list(id: &str, tasks: &[&str]) -> TaskList {
    TaskList { id: ListId::from(id), name: id.to_owned(), tasks: tasks.iter().map(|t| task(t)).collect() }
}

fn board() -> ListBoard {
    ListBoard { lists: vec![list("todo", &["T1", "T2"]), list("done", &[])] }
}

fn task_ids(board: &ListBoard, list: &str) -> Vec<String> {
    board
        .list(&ListId::from(list))
        .map(|l| l.tasks.iter().map(|t| t.id.to_string()).collect())
        .unwrap_or_default()
}

fn mv(source: &str, si: usize, dest: &str, di: usize) -> ReorderIntent {
    ReorderIntent {
        source_list: ListId::from(source),
        source_index: si,
        dest_list: ListId::from(dest),
        dest_index: di,
    }
}

fn room() -> RoomId {
    RoomId::from("R1")
}

// =============================================================
// apply_move
// =============================================================

#[test]
fn move_across_lists_removes_then_inserts() {
    let before = board();
    let after = apply_move(&before, &mv("todo", 0, "done", 0)).unwrap();

    assert_eq!(task_ids(&after, "todo"), vec!["T2"]);
    assert_eq!(task_ids(&after, "done"), vec!["T1"]);
    assert_eq!(after.task_count(), before.task_count());
    assert!(after.validate().is_ok());
    // Input untouched.
    assert_eq!(before, board());
}

#[test]
fn move_within_list_uses_post_removal_index() {
    let before = ListBoard { lists: vec![list("todo", &["A", "B", "C"])] };
    let after = apply_move(&before, &mv("todo", 0, "todo", 2)).unwrap();
    assert_eq!(task_ids(&after, "todo"), vec!["B", "C", "A"]);

    let after = apply_move(&before, &mv("todo", 2, "todo", 0)).unwrap();
    assert_eq!(task_ids(&after, "todo"), vec!["C", "A", "B"]);
}

#[test]
fn destination_past_end_appends() {
    let after = apply_move(&board(), &mv("todo", 1, "done", 99)).unwrap();
    assert_eq!(task_ids(&after, "done"), vec!["T2"]);
}

#[test]
fn bad_moves_are_rejected_without_side_effects() {
    let b = board();
    assert_eq!(
        apply_move(&b, &mv("nope", 0, "done", 0)),
        Err(ListError::ListNotFound(ListId::from("nope")))
    );
    assert_eq!(
        apply_move(&b, &mv("todo", 0, "nope", 0)),
        Err(ListError::ListNotFound(ListId::from("nope")))
    );
    assert_eq!(
        apply_move(&b, &mv("done", 0, "todo", 0)),
        Err(ListError::TaskIndexOutOfRange { list: ListId::from("done"), index: 0 })
    );
}

#[test]
fn validate_detects_duplicated_task() {
    let b = ListBoard { lists: vec![list("todo", &["T1"]), list("done", &["T1"])] };
    assert_eq!(b.validate(), Err(ListError::DuplicateTask(TaskId::from("T1"))));
}

// =============================================================
// Reconciler
// =============================================================

#[test]
fn reorder_is_optimistic_and_submits_full_snapshot() {
    let mut engine = ListReconciler::new(room());
    engine.on_snapshot(BoardSnapshot { revision: 1, board: board() });

    let submission = engine.reorder(mv("todo", 0, "done", 0)).unwrap();
    assert_eq!(submission.room, room());
    assert_eq!(task_ids(&submission.board, "todo"), vec!["T2"]);
    assert_eq!(task_ids(&submission.board, "done"), vec!["T1"]);
    assert_eq!(engine.board(), &submission.board);
    assert_eq!(engine.pending().count(), 1);

    let reconciled = engine.on_authority_response(submission.id, BoardSnapshot { revision: 2, board: submission.board.clone() });
    assert!(matches!(reconciled, Reconciled::Adopted(_)));
    assert_eq!(engine.revision(), Some(2));
    assert_eq!(engine.pending().count(), 0);
}

#[test]
fn rejected_reorder_leaves_mirror_unchanged() {
    let mut engine = ListReconciler::new(room());
    engine.on_snapshot(BoardSnapshot { revision: 1, board: board() });
    assert!(engine.reorder(mv("done", 3, "todo", 0)).is_err());
    assert_eq!(engine.board(), &board());
    assert_eq!(engine.pending().count(), 0);
}

#[test]
fn last_response_wins_by_revision_not_request_order() {
    let mut engine = ListReconciler::new(room());
    engine.on_snapshot(BoardSnapshot { revision: 1, board: board() });

    let first = engine.reorder(mv("todo", 0, "done", 0)).unwrap();
    let second = engine.reorder(mv("todo", 0, "done", 0)).unwrap();

    // The authority stamped the second submission with revision 3 and the
    // first with revision 2, but the responses arrive reversed.
    let newer = BoardSnapshot { revision: 3, board: second.board.clone() };
    let older = BoardSnapshot { revision: 2, board: first.board.clone() };
    assert!(matches!(engine.on_authority_response(second.id, newer), Reconciled::Adopted(_)));
    assert_eq!(
        engine.on_authority_response(first.id, older),
        Reconciled::Superseded { revision: 2, current: 3 }
    );

    assert_eq!(engine.board(), &second.board);
    assert_eq!(engine.pending().count(), 0);
}

#[test]
fn concurrent_moves_converge_on_later_authoritative_echo() {
    let mut alice = ListReconciler::new(room());
    let mut bob = ListReconciler::new(room());
    let initial = BoardSnapshot { revision: 1, board: board() };
    alice.on_snapshot(initial.clone());
    bob.on_snapshot(initial);

    // Both move near-simultaneously; each applies locally first.
    let a = alice.reorder(mv("todo", 0, "done", 0)).unwrap();
    let b = bob.reorder(mv("todo", 1, "todo", 0)).unwrap();
    assert_ne!(alice.board(), bob.board());

    // The authority accepted alice's first, then bob's (last submission wins).
    let rev2 = BoardSnapshot { revision: 2, board: a.board.clone() };
    let rev3 = BoardSnapshot { revision: 3, board: b.board.clone() };

    alice.on_authority_response(a.id, rev2.clone());
    bob.on_snapshot(rev2);
    bob.on_authority_response(b.id, rev3.clone());
    alice.on_snapshot(rev3);

    // Alice's move was overwritten: documented, intentional.
    assert_eq!(alice.board(), bob.board());
    assert_eq!(task_ids(alice.board(), "todo"), vec!["T2", "T1"]);
    assert!(task_ids(alice.board(), "done").is_empty());
}

#[test]
fn equal_revision_is_adopted_again() {
    let mut engine = ListReconciler::new(room());
    let snap = BoardSnapshot { revision: 4, board: board() };
    assert!(matches!(engine.on_snapshot(snap.clone()), Reconciled::Adopted(_)));
    assert!(matches!(engine.on_snapshot(snap), Reconciled::Adopted(_)));
}

#[test]
fn authority_failure_keeps_optimistic_board() {
    let mut engine = ListReconciler::new(room());
    engine.on_snapshot(BoardSnapshot { revision: 1, board: board() });
    let submission = engine.reorder(mv("todo", 0, "done", 0)).unwrap();

    engine.on_authority_failure(submission.id, &"connection refused");
    assert_eq!(engine.board(), &submission.board);
    assert_eq!(engine.pending().count(), 0);
    assert_eq!(engine.revision(), Some(1));
}

#[test]
fn cancel_pending_discards_intents() {
    let mut engine = ListReconciler::new(room());
    engine.on_snapshot(BoardSnapshot { revision: 1, board: board() });
    engine.reorder(mv("todo", 0, "done", 0)).unwrap();
    engine.reorder(mv("todo", 0, "done", 0)).unwrap();

    assert_eq!(engine.cancel_pending(), 2);
    assert_eq!(engine.pending().count(), 0);
}

#[test]
fn snapshot_wire_shape_flattens_lists() {
    let snap = BoardSnapshot { revision: 9, board: board() };
    let json = serde_json::to_value(&snap).unwrap();
    assert_eq!(json["revision"], 9);
    assert_eq!(json["lists"][0]["id"], "todo");
    assert_eq!(json["lists"][0]["tasks"][0]["id"], "T1");
}
