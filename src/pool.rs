//! A set of sessions started and stopped together.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use tracing::{error, info, warn};

use crate::config::{BridgeOptions, CollisionPolicy, ServerConfig};
use crate::error::{BridgeError, PoolError, SessionError};
use crate::session::{Session, SessionState};
use crate::tools::ToolDescriptor;
use crate::transport::ToolTransport;

/// One session that failed to stop cleanly.
#[derive(Debug)]
pub struct TeardownFailure {
    /// Position of the server in the configured list.
    pub index: usize,
    pub server: String,
    pub error: SessionError,
}

/// Outcome of tearing a pool or bridge down. Never raised, only reported.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub errors: Vec<TeardownFailure>,
    pub warnings: Vec<BridgeError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// Owns one [`Session`] per configured server.
pub struct SessionPool {
    sessions: Vec<Arc<Session>>,
    options: BridgeOptions,
    started: bool,
}

impl SessionPool {
    pub fn new(transports: Vec<Box<dyn ToolTransport>>, options: BridgeOptions) -> Self {
        let sessions = transports
            .into_iter()
            .map(|transport| {
                Arc::new(Session::new(transport).with_protocol_fallback(options.protocol_fallback))
            })
            .collect();
        Self {
            sessions,
            options,
            started: false,
        }
    }

    pub fn from_configs(configs: Vec<ServerConfig>, options: BridgeOptions) -> Self {
        Self::new(
            configs
                .into_iter()
                .map(ServerConfig::into_transport)
                .collect(),
            options,
        )
    }

    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Start every session concurrently and return their tools in config order.
    ///
    /// All or nothing: if any session fails (or the startup timeout elapses),
    /// every session is stopped and the first failure is returned.
    pub async fn start_all(&mut self) -> Result<Vec<ToolDescriptor>, PoolError> {
        if self.started {
            return Err(PoolError::AlreadyStarted);
        }
        self.started = true;
        info!(servers = self.sessions.len(), "starting session pool");

        let startup = try_join_all(self.sessions.iter().enumerate().map(
            |(index, session)| async move {
                session.start().await.map_err(|source| PoolError::Session {
                    index,
                    server: session.label().to_owned(),
                    source,
                })
            },
        ));
        let after = self.options.startup_timeout;
        let outcome = match tokio::time::timeout(after, startup).await {
            Ok(outcome) => outcome,
            Err(_) => Err(PoolError::StartupTimeout {
                after,
                pending: self.pending_sessions(),
            }),
        };

        match outcome.and_then(|per_session| expose(self.options.collision_policy, per_session)) {
            Ok(tools) => {
                info!(tools = tools.len(), "session pool ready");
                Ok(tools)
            }
            Err(error) => {
                error!(%error, "session pool startup failed; stopping all sessions");
                let report = self.stop_all().await;
                for failure in &report.errors {
                    warn!(server = %failure.server, error = %failure.error, "cleanup after failed startup");
                }
                Err(error)
            }
        }
    }

    /// `(index, label)` of every session that has not finished its handshake.
    fn pending_sessions(&self) -> Vec<(usize, String)> {
        self.sessions
            .iter()
            .enumerate()
            .filter(|(_, session)| session.state() == SessionState::Connecting)
            .map(|(index, session)| (index, session.label().to_owned()))
            .collect()
    }

    /// Stop every session, collecting failures instead of raising them.
    pub async fn stop_all(&mut self) -> TeardownReport {
        let results = join_all(self.sessions.iter().map(|session| session.stop())).await;
        collect_failures(&self.sessions, results)
    }

    /// Force-release every session after a graceful stop ran out of time.
    pub async fn abort_all(&mut self) -> TeardownReport {
        let results = join_all(self.sessions.iter().map(|session| session.abort())).await;
        collect_failures(&self.sessions, results)
    }
}

fn collect_failures(
    sessions: &[Arc<Session>],
    results: Vec<Result<(), SessionError>>,
) -> TeardownReport {
    let mut report = TeardownReport::default();
    for (index, (session, result)) in sessions.iter().zip(results).enumerate() {
        if let Err(error) = result {
            warn!(server = %session.label(), %error, "session teardown failed");
            report.errors.push(TeardownFailure {
                index,
                server: session.label().to_owned(),
                error,
            });
        }
    }
    report
}

/// Flatten per-session tool lists and apply the collision policy.
fn expose(
    policy: CollisionPolicy,
    per_session: Vec<Vec<ToolDescriptor>>,
) -> Result<Vec<ToolDescriptor>, PoolError> {
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut tools = Vec::new();

    for mut tool in per_session.into_iter().flatten() {
        tool.exposed_name = policy.exposed_name(&tool.server, &tool.name);
        match owners.entry(tool.exposed_name.clone()) {
            Entry::Occupied(first) if policy == CollisionPolicy::Reject => {
                return Err(PoolError::DuplicateTool {
                    tool: tool.exposed_name,
                    first: first.get().clone(),
                    second: tool.server,
                });
            }
            Entry::Occupied(first) => {
                warn!(
                    tool = %tool.exposed_name,
                    first = %first.get(),
                    second = %tool.server,
                    "duplicate tool name across servers"
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(tool.server.clone());
            }
        }
        tools.push(tool);
    }
    Ok(tools)
}
