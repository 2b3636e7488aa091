mod common;

use std::time::Duration;

use common::{Behavior, FakeServer};
use pretty_assertions::assert_eq;
use tether::config::{BridgeOptions, CollisionPolicy};
use tether::error::{PoolError, SessionError};
use tether::pool::SessionPool;
use tether::session::SessionState;

#[tokio::test]
async fn tools_are_flattened_in_config_order() {
    let (a, _) = FakeServer::new("a")
        .tool("alpha", Behavior::Echo)
        .tool("beta", Behavior::Echo)
        .boxed();
    let (b, _) = FakeServer::new("b").tool("gamma", Behavior::Echo).boxed();
    let mut pool = SessionPool::new(vec![a, b], BridgeOptions::default());

    let tools = pool.start_all().await.expect("pool should start");
    let names: Vec<_> = tools
        .iter()
        .map(|tool| format!("{}/{}", tool.server, tool.exposed_name))
        .collect();
    assert_eq!(names, vec!["a/alpha", "a/beta", "b/gamma"]);

    let report = pool.stop_all().await;
    assert!(report.is_clean());
    assert!(pool
        .sessions()
        .iter()
        .all(|session| session.state() == SessionState::Closed));
}

#[tokio::test]
async fn one_failing_server_stops_every_session() {
    let (a, probe_a) = FakeServer::echo("a").boxed();
    let (b, probe_b) = FakeServer::echo("b").reject_initialize(-32001, "handshake refused").boxed();
    let mut pool = SessionPool::new(vec![a, b], BridgeOptions::default());

    let err = pool.start_all().await.expect_err("pool should fail");
    match &err {
        PoolError::Session { index, server, source } => {
            assert_eq!(*index, 1);
            assert_eq!(server, "b");
            assert!(matches!(source, SessionError::HandshakeRejected { code: -32001, .. }));
        }
        other => panic!("expected session failure, got {other:?}"),
    }
    assert!(err.to_string().contains("(b)"));

    assert_eq!(probe_a.closes(), 1, "healthy server must be closed");
    assert_eq!(probe_b.closes(), 1);
    assert!(probe_a.wait_disconnected(Duration::from_secs(2)).await);

    let report = tokio::time::timeout(Duration::from_secs(2), pool.stop_all())
        .await
        .expect("stop_all after failure should not hang");
    assert!(report.is_clean());
}

#[tokio::test]
async fn startup_timeout_applies_to_the_whole_pool() {
    let (a, probe_a) = FakeServer::echo("a").boxed();
    let (b, probe_b) = FakeServer::echo("b").hang_on_initialize().boxed();
    let options = BridgeOptions::builder()
        .startup_timeout(Duration::from_millis(200))
        .build();
    let mut pool = SessionPool::new(vec![a, b], options);

    let err = pool.start_all().await.expect_err("hung handshake should time out");
    match &err {
        PoolError::StartupTimeout { after, pending } => {
            assert_eq!(*after, Duration::from_millis(200));
            assert_eq!(pending, &vec![(1, "b".to_string())]);
        }
        other => panic!("expected startup timeout, got {other:?}"),
    }
    assert!(err.to_string().contains("#1 (b)"));
    assert_eq!(probe_a.closes(), 1);
    assert_eq!(probe_b.closes(), 1);
}

#[tokio::test]
async fn reject_policy_fails_startup_on_duplicates() {
    let (a, probe_a) = FakeServer::echo("a").boxed();
    let (b, probe_b) = FakeServer::echo("b").boxed();
    let options = BridgeOptions::builder()
        .collision_policy(CollisionPolicy::Reject)
        .build();
    let mut pool = SessionPool::new(vec![a, b], options);

    let err = pool.start_all().await.expect_err("duplicate names should be rejected");
    assert!(matches!(err, PoolError::DuplicateTool { ref tool, .. } if tool == "echo_tool"));
    assert_eq!(probe_a.closes(), 1);
    assert_eq!(probe_b.closes(), 1);
}

#[tokio::test]
async fn pool_starts_only_once() {
    let (a, _) = FakeServer::echo("a").boxed();
    let mut pool = SessionPool::new(vec![a], BridgeOptions::default());
    pool.start_all().await.expect("first start should succeed");

    let err = pool.start_all().await.expect_err("second start should fail");
    assert!(matches!(err, PoolError::AlreadyStarted));

    assert!(pool.stop_all().await.is_clean());
}
