//! Presence over the wire: identity announcement, cursor updates and
//! per-user selection tracking.

mod common;

use common::{connect_peer, next_event, send_op, test_config, wait_for, Relay};
use forma_collab::{
    CollabSession, CursorPosition, OnlineUser, Operation, OperationPayload, OperationType,
    PresenceChange, SessionEvent,
};
use forma_core::{Component, DesignStore};

#[tokio::test]
async fn test_cursor_frames_upsert_presence() {
    let relay = Relay::start().await;
    let mut carol = connect_peer(&relay, "p1").await;
    let mut store = DesignStore::new();
    let mut session =
        CollabSession::open(test_config(&relay), "p1", OnlineUser::new("me", "Me", "")).unwrap();
    assert_eq!(next_event(&mut session, &mut store).await, SessionEvent::Connected);

    let mut identity = OnlineUser::new("carol", "Carol", "carol.png");
    identity.cursor = CursorPosition::new(10.0, 20.0);
    send_op(&mut carol, &Operation::cursor_move(&identity, 1)).await;

    // Later frames may carry a different identity; only the cursor sticks.
    let mut renamed = OnlineUser::new("carol", "Someone Else", "x.png");
    renamed.cursor = CursorPosition::new(30.0, 40.0);
    send_op(&mut carol, &Operation::cursor_move(&renamed, 2)).await;

    assert_eq!(
        next_event(&mut session, &mut store).await,
        SessionEvent::PresenceChanged {
            user_id: "carol".into(),
            change: PresenceChange::Joined
        }
    );
    assert_eq!(
        next_event(&mut session, &mut store).await,
        SessionEvent::PresenceChanged {
            user_id: "carol".into(),
            change: PresenceChange::Moved
        }
    );

    let carol_record = session.presence().get("carol").unwrap();
    assert_eq!(carol_record.name, "Carol");
    assert_eq!(carol_record.avatar, "carol.png");
    assert_eq!(carol_record.cursor, CursorPosition::new(30.0, 40.0));
    assert_eq!(session.presence().len(), 1);
    assert!(store.is_empty());
    assert!(!store.can_undo());
}

#[tokio::test]
async fn test_cursor_without_identity_gets_placeholder() {
    let relay = Relay::start().await;
    let mut peer = connect_peer(&relay, "p2").await;
    let mut store = DesignStore::new();
    let mut session =
        CollabSession::open(test_config(&relay), "p2", OnlineUser::new("me", "Me", "")).unwrap();
    assert_eq!(next_event(&mut session, &mut store).await, SessionEvent::Connected);

    let bare = Operation::new(
        OperationType::CursorMove,
        "ghost-42",
        7,
        OperationPayload::cursor(CursorPosition::new(1.0, 1.0), None),
    );
    send_op(&mut peer, &bare).await;
    next_event(&mut session, &mut store).await;

    let ghost = session.presence().get("ghost-42").unwrap();
    assert_eq!(ghost.name, "Peer-ghost-42");
    assert_eq!(ghost.cursor, CursorPosition::new(1.0, 1.0));
}

#[tokio::test]
async fn test_late_joiner_learns_identity_from_cursor() {
    let relay = Relay::start().await;
    let mut alice_store = DesignStore::new();
    let mut bob_store = DesignStore::new();

    let mut alice = CollabSession::open(
        test_config(&relay),
        "p3",
        OnlineUser::new("alice", "Alice", "a.png"),
    )
    .unwrap();
    assert_eq!(next_event(&mut alice, &mut alice_store).await, SessionEvent::Connected);

    let mut bob =
        CollabSession::open(test_config(&relay), "p3", OnlineUser::new("bob", "Bob", "b.png"))
            .unwrap();
    assert_eq!(next_event(&mut bob, &mut bob_store).await, SessionEvent::Connected);

    // Alice announced herself before Bob arrived; her next cursor move
    // still carries the full identity.
    alice.update_cursor(64.0, 48.0).await.unwrap();

    wait_for(&mut bob, &mut bob_store, |e| {
        matches!(e, SessionEvent::PresenceChanged { user_id, .. } if user_id == "alice")
    })
    .await;
    let seen = bob.presence().get("alice").unwrap();
    assert_eq!(seen.name, "Alice");
    assert_eq!(seen.avatar, "a.png");
    assert_eq!(seen.cursor, CursorPosition::new(64.0, 48.0));

    wait_for(&mut alice, &mut alice_store, |e| {
        matches!(e, SessionEvent::PresenceChanged { user_id, .. } if user_id == "bob")
    })
    .await;
    assert_eq!(alice.presence().get("bob").unwrap().name, "Bob");
}

#[tokio::test]
async fn test_selection_tracked_per_user() {
    let relay = Relay::start().await;
    let mut alice_store = DesignStore::new();
    let mut bob_store = DesignStore::new();

    let mut bob =
        CollabSession::open(test_config(&relay), "p4", OnlineUser::new("bob", "Bob", "")).unwrap();
    assert_eq!(next_event(&mut bob, &mut bob_store).await, SessionEvent::Connected);

    let mut alice = CollabSession::open(
        test_config(&relay),
        "p4",
        OnlineUser::new("alice", "Alice", ""),
    )
    .unwrap();
    assert_eq!(next_event(&mut alice, &mut alice_store).await, SessionEvent::Connected);

    let add = alice.operation(
        OperationType::AddComponent,
        OperationPayload::component(Component::new("card", "card")),
    );
    alice.apply_local(&mut alice_store, &add).await.unwrap();
    let select = alice.operation(
        OperationType::SelectComponent,
        OperationPayload::component_id("card"),
    );
    alice.apply_local(&mut alice_store, &select).await.unwrap();

    wait_for(&mut bob, &mut bob_store, |e| {
        matches!(e, SessionEvent::Applied(op) if op.op_type == OperationType::SelectComponent)
    })
    .await;

    let editors: Vec<&str> = bob
        .presence()
        .editing("card")
        .iter()
        .map(|u| u.id.as_str())
        .collect();
    assert_eq!(editors, ["alice"]);
    assert_eq!(bob_store.selected_id(), Some("card"));

    let clear = alice.operation(OperationType::ClearSelection, OperationPayload::default());
    alice.apply_local(&mut alice_store, &clear).await.unwrap();
    wait_for(&mut bob, &mut bob_store, |e| {
        matches!(e, SessionEvent::Applied(op) if op.op_type == OperationType::ClearSelection)
    })
    .await;
    assert!(bob.presence().editing("card").is_empty());
}
