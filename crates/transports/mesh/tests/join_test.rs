//! Integration tests for `MeshSession::join`
//!
//! Joining completes only once the local peer is meshed with everyone the
//! relay reports in the room, or fails on the configured bound.

mod harness;

use harness::TestMesh;
use remotemedia_mesh::{Error, MeshConfig, SessionEvent};
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn test_join_alone_completes_immediately() {
    let mut mesh = TestMesh::start().await;

    let join = mesh.spawn_join("lobby").await;
    mesh.room_count(1);

    timeout(Duration::from_secs(1), join)
        .await
        .expect("join should not wait for peers")
        .unwrap()
        .unwrap();

    assert_eq!(mesh.signaling.joins(), vec![("lobby".to_string(), None)]);
    assert!(mesh.connector.created().is_empty());
    assert_eq!(mesh.session.room_count(), Some(1));
    mesh.wait_for(|e| matches!(e, SessionEvent::FullConnect)).await;
}

#[tokio::test]
async fn test_join_ignores_room_count_from_before_the_call() {
    let mesh = TestMesh::start_with(
        MeshConfig::default().with_join_timeout(Duration::from_millis(300)),
    )
    .await;

    mesh.session.create("first", None, false).unwrap();
    mesh.room_count(1);
    mesh.settle().await;
    assert_eq!(mesh.session.room_count(), Some(1));

    let result = mesh.session.join("second", None).await;
    assert!(matches!(result, Err(Error::Timeout(_))));
}

#[tokio::test]
async fn test_join_accepts_repeated_sole_occupant_report() {
    let mesh = TestMesh::start().await;
    mesh.room_count(1);
    mesh.settle().await;

    let join = mesh.spawn_join("second").await;
    mesh.room_count(1);

    timeout(Duration::from_secs(1), join)
        .await
        .expect("a fresh report of one occupant completes the join")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_join_waits_for_every_occupant() {
    let mesh = TestMesh::start_with(
        MeshConfig::default().with_join_timeout(Duration::from_secs(5)),
    )
    .await;

    let join = mesh.spawn_join("lobby").await;
    mesh.room_count(3);
    mesh.inbound_signal("alice", serde_json::json!({"type": "offer"}));
    mesh.inbound_signal("bob", serde_json::json!({"type": "offer"}));
    mesh.settle().await;

    mesh.peer("alice").connect();
    mesh.settle().await;
    tokio::task::yield_now().await;
    assert!(!join.is_finished(), "join resolved with one of two peers");

    mesh.peer("bob").connect();
    timeout(Duration::from_secs(1), join)
        .await
        .expect("join should resolve on full mesh")
        .unwrap()
        .unwrap();

    assert!(mesh.session.is_fully_connected());
}

#[tokio::test]
async fn test_join_times_out_on_partial_mesh() {
    let mesh = TestMesh::start_with(
        MeshConfig::default().with_join_timeout(Duration::from_millis(100)),
    )
    .await;

    let join = mesh.spawn_join("lobby").await;
    mesh.room_count(3);
    mesh.connect_peers(&["alice"]).await;

    let result = join.await.unwrap();
    assert!(matches!(result, Err(Error::Timeout(_))));

    // the session stays usable after a failed join
    assert_eq!(mesh.settle().await.len(), 1);
    assert_eq!(mesh.session.broadcast("hi").await.unwrap(), 1);
}

#[tokio::test]
async fn test_join_without_room_count_times_out() {
    let mesh = TestMesh::start_with(
        MeshConfig::default().with_join_timeout(Duration::from_millis(50)),
    )
    .await;

    let result = mesh.session.join("lobby", Some("pw")).await;

    assert!(matches!(result, Err(Error::Timeout(_))));
    assert_eq!(
        mesh.signaling.joins(),
        vec![("lobby".to_string(), Some("pw".to_string()))]
    );
}

#[tokio::test]
async fn test_destroy_cancels_pending_join() {
    let mesh = TestMesh::start_with(
        MeshConfig::default().with_join_timeout(Duration::from_secs(5)),
    )
    .await;

    let join = mesh.spawn_join("lobby").await;
    mesh.room_count(2);
    mesh.settle().await;

    mesh.session.destroy().await;

    let result = timeout(Duration::from_secs(1), join)
        .await
        .expect("destroy should wake the pending join")
        .unwrap();
    assert!(matches!(result, Err(Error::SessionClosed)));

    assert!(matches!(
        mesh.session.join("lobby", None).await,
        Err(Error::SessionClosed)
    ));
}

#[tokio::test]
async fn test_second_join_needs_new_completion() {
    let mesh = TestMesh::start_with(
        MeshConfig::default().with_join_timeout(Duration::from_millis(200)),
    )
    .await;

    mesh.room_count(2);
    mesh.connect_peers(&["alice"]).await;
    assert!(mesh.session.is_fully_connected());

    // an earlier completion does not satisfy a later join
    let result = mesh.session.join("other", None).await;
    assert!(matches!(result, Err(Error::Timeout(_))));
}
