//! Tests for the error taxonomy.

use std::error::Error as _;
use std::time::Duration;

use tether::error::*;

#[test]
fn transport_timeout_is_distinct_from_peer_close() {
    let timeout = TransportError::Timeout {
        server: "docs".into(),
        operation: "call_tool",
        after: Duration::from_millis(1500),
    };
    let closed = TransportError::Closed {
        server: "docs".into(),
    };

    assert!(timeout.is_timeout());
    assert!(!closed.is_timeout());
    assert_eq!(timeout.to_string(), "[docs] call_tool timed out after 1500ms");
    assert_eq!(closed.to_string(), "[docs] connection closed by peer");
}

#[test]
fn errors_name_the_offending_server_and_tool_through_every_layer() {
    struct Case {
        error: SessionError,
        expected_server: &'static str,
        expected_tool: Option<&'static str>,
    }

    let cases = vec![
        Case {
            error: SessionError::ToolNotFound {
                server: "echo".into(),
                tool: "missing".into(),
            },
            expected_server: "echo",
            expected_tool: Some("missing"),
        },
        Case {
            error: SessionError::ToolExecution {
                server: "echo".into(),
                tool: "echo_tool".into(),
                message: "boom".into(),
            },
            expected_server: "echo",
            expected_tool: Some("echo_tool"),
        },
        Case {
            error: SessionError::HandshakeRejected {
                server: "legacy".into(),
                code: -32602,
                message: "unsupported".into(),
            },
            expected_server: "legacy",
            expected_tool: None,
        },
        Case {
            error: TransportError::Io {
                server: "docs".into(),
                message: "broken pipe".into(),
            }
            .into(),
            expected_server: "docs",
            expected_tool: None,
        },
    ];

    for case in cases {
        assert_eq!(case.error.server(), case.expected_server, "{}", case.error);
        assert_eq!(case.error.tool(), case.expected_tool, "{}", case.error);
    }
}

#[test]
fn pool_error_keeps_failing_index_and_source() {
    let err = PoolError::Session {
        index: 1,
        server: "b".into(),
        source: SessionError::HandshakeRejected {
            server: "b".into(),
            code: -32600,
            message: "nope".into(),
        },
    };

    assert_eq!(
        err.to_string(),
        "server #1 (b) failed to start: [b] handshake rejected (code -32600): nope"
    );
    assert!(matches!(
        err.session_error(),
        Some(SessionError::HandshakeRejected { code: -32600, .. })
    ));
    assert!(err.source().is_some());

    let timeout = PoolError::StartupTimeout {
        after: Duration::from_secs(1),
        pending: vec![(0, "slow".into()), (2, "stuck".into())],
    };
    assert!(timeout.session_error().is_none());
    assert_eq!(
        timeout.to_string(),
        "pool startup timed out after 1000ms; still connecting: #0 (slow), #2 (stuck)"
    );
}

#[test]
fn bridge_error_classifies_misuse_and_cancellation() {
    let cancelled: BridgeError = SessionError::Cancelled {
        server: "echo".into(),
        operation: "call_tool",
    }
    .into();
    assert!(cancelled.is_cancelled());
    assert!(!cancelled.is_misuse());

    for misuse in [
        BridgeError::AlreadyEntered,
        BridgeError::NotEntered,
        BridgeError::AlreadyExited,
        BridgeError::ModeMismatch { entered: "async" },
        BridgeError::ScopeClosed {
            tool: "echo_tool".into(),
        },
    ] {
        assert!(misuse.is_misuse(), "{misuse}");
        assert!(!misuse.is_cancelled(), "{misuse}");
    }

    let warning = BridgeError::ShutdownTimeout {
        after: Duration::from_millis(250),
    };
    assert!(!warning.is_misuse());
    assert_eq!(warning.to_string(), "bridge shutdown did not finish within 250ms");
}
