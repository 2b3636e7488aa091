//! Scoped enter/exit over a session pool, for async and blocking callers.
//!
//! A [`ToolBridge`] is used for exactly one scope. In async mode the pool runs
//! on the caller's runtime. In blocking mode the bridge owns a dedicated
//! thread running a current-thread runtime; readiness, calls and teardown are
//! passed to it as messages and the caller's thread blocks on the reply.
//!
//! ```no_run
//! use tether::prelude::*;
//!
//! # fn example() -> tether::error::Result<()> {
//! let mut bridge = ToolBridge::new(
//!     vec![ServerConfig::process("uv", vec!["run".into(), "echo.py".into()])],
//!     BridgeOptions::default(),
//! );
//! let tools = bridge.enter_blocking()?;
//! let echoed = tools[0].invocation.call(serde_json::json!({ "text": "hi" }))?;
//! println!("{}", echoed.into_value_or_text());
//! let report = bridge.exit_blocking()?;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

mod invocation;
mod worker;

pub use invocation::{AsyncInvocation, BlockingInvocation};

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{AsyncAdapter, BlockingAdapter};
use crate::config::{BridgeConfig, BridgeOptions, ServerConfig};
use crate::error::BridgeError;
use crate::pool::{SessionPool, TeardownReport};
use crate::tools::ToolDescriptor;
use crate::transport::ToolTransport;
use worker::Worker;

/// Upper bound for force-releasing sessions once a graceful stop overran.
pub(crate) const FORCE_RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// A discovered tool paired with the invocation bound to it.
#[derive(Debug, Clone)]
pub struct BoundTool<I> {
    pub descriptor: ToolDescriptor,
    pub invocation: I,
}

pub type AsyncTool = BoundTool<AsyncInvocation>;
pub type BlockingTool = BoundTool<BlockingInvocation>;

enum Scope {
    Idle(SessionPool),
    Async(SessionPool),
    Blocking(Worker),
    /// Enter failed; the pool already cleaned up after itself.
    Failed,
    Exited,
    /// Transient placeholder while a transition is in progress.
    Transitioning,
}

impl Scope {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle(_) => "idle",
            Self::Async(_) => "async",
            Self::Blocking(_) => "blocking",
            Self::Failed => "failed",
            Self::Exited => "exited",
            Self::Transitioning => "transitioning",
        }
    }
}

/// Single-use scoped acquisition of every configured tool server.
pub struct ToolBridge {
    scope: Scope,
    options: BridgeOptions,
    token: CancellationToken,
}

impl ToolBridge {
    pub fn new(servers: Vec<ServerConfig>, options: BridgeOptions) -> Self {
        Self::from_pool(SessionPool::from_configs(servers, options), options)
    }

    pub fn from_config(config: BridgeConfig) -> Self {
        Self::new(config.servers, config.options)
    }

    /// Build a bridge over caller-supplied transports.
    pub fn with_transports(transports: Vec<Box<dyn ToolTransport>>, options: BridgeOptions) -> Self {
        Self::from_pool(SessionPool::new(transports, options), options)
    }

    fn from_pool(pool: SessionPool, options: BridgeOptions) -> Self {
        Self {
            scope: Scope::Idle(pool),
            options,
            token: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Whether the scope is currently open.
    pub fn is_entered(&self) -> bool {
        matches!(self.scope, Scope::Async(_) | Scope::Blocking(_))
    }

    fn take_idle_pool(&mut self) -> Result<SessionPool, BridgeError> {
        match std::mem::replace(&mut self.scope, Scope::Transitioning) {
            Scope::Idle(pool) => Ok(pool),
            other => {
                self.scope = other;
                Err(BridgeError::AlreadyEntered)
            }
        }
    }

    // --- async mode ---

    /// Start every server on the current runtime and bind async invocations.
    pub async fn enter(&mut self) -> Result<Vec<AsyncTool>, BridgeError> {
        let mut pool = self.take_idle_pool()?;
        info!(servers = pool.len(), mode = "async", "entering bridge scope");

        match pool.start_all().await {
            Ok(tools) => {
                let bound = tools
                    .into_iter()
                    .map(|descriptor| BoundTool {
                        invocation: AsyncInvocation::new(&descriptor, self.token.clone()),
                        descriptor,
                    })
                    .collect();
                self.scope = Scope::Async(pool);
                Ok(bound)
            }
            Err(error) => {
                self.scope = Scope::Failed;
                Err(error.into())
            }
        }
    }

    /// [`enter`](Self::enter), converting each tool with `adapter`.
    pub async fn enter_with<A: AsyncAdapter>(
        &mut self,
        adapter: &A,
    ) -> Result<Vec<A::Tool>, BridgeError> {
        let tools = self.enter().await?;
        Ok(tools
            .into_iter()
            .map(|tool| adapter.adapt_async(&tool.descriptor, tool.invocation))
            .collect())
    }

    /// Tear down an async-mode scope.
    ///
    /// Bounded by the shutdown timeout; sessions still stopping when it
    /// elapses are force-released, which kills their child processes.
    pub async fn exit(&mut self) -> Result<TeardownReport, BridgeError> {
        let mut pool = match std::mem::replace(&mut self.scope, Scope::Transitioning) {
            Scope::Async(pool) => pool,
            Scope::Failed => {
                self.scope = Scope::Exited;
                return Ok(TeardownReport::default());
            }
            Scope::Blocking(worker) => {
                self.scope = Scope::Blocking(worker);
                return Err(BridgeError::ModeMismatch { entered: "blocking" });
            }
            other => return Err(self.restore_and_reject(other)),
        };
        self.token.cancel();

        let after = self.options.shutdown_timeout;
        let report = match tokio::time::timeout(after, pool.stop_all()).await {
            Ok(report) => report,
            Err(_) => {
                warn!(timeout_ms = after.as_millis() as u64, "bridge shutdown timed out; force-releasing sessions");
                let mut report =
                    match tokio::time::timeout(FORCE_RELEASE_TIMEOUT, pool.abort_all()).await {
                        Ok(report) => report,
                        Err(_) => {
                            warn!("force release timed out; dropping sessions");
                            TeardownReport::default()
                        }
                    };
                report.warnings.insert(0, BridgeError::ShutdownTimeout { after });
                report
            }
        };
        drop(pool);
        self.scope = Scope::Exited;
        log_report(&report);
        Ok(report)
    }

    /// Run `body` inside an async-mode scope and always exit afterwards.
    pub async fn scoped<F, Fut, T>(mut self, body: F) -> Result<(T, TeardownReport), BridgeError>
    where
        F: FnOnce(Vec<AsyncTool>) -> Fut,
        Fut: Future<Output = T>,
    {
        let tools = self.enter().await?;
        let output = body(tools).await;
        let report = self.exit().await?;
        Ok((output, report))
    }

    // --- blocking mode ---

    /// Start every server on a dedicated background runtime and bind blocking
    /// invocations. Blocks until all servers are ready or one has failed.
    pub fn enter_blocking(&mut self) -> Result<Vec<BlockingTool>, BridgeError> {
        let pool = self.take_idle_pool()?;
        info!(servers = pool.len(), mode = "blocking", "entering bridge scope");

        match Worker::start(pool) {
            Ok((worker, tools, runtime)) => {
                let bound = tools
                    .into_iter()
                    .map(|descriptor| BoundTool {
                        invocation: BlockingInvocation::new(
                            &descriptor,
                            self.token.clone(),
                            runtime.clone(),
                        ),
                        descriptor,
                    })
                    .collect();
                self.scope = Scope::Blocking(worker);
                Ok(bound)
            }
            Err(error) => {
                self.scope = Scope::Failed;
                Err(error)
            }
        }
    }

    /// [`enter_blocking`](Self::enter_blocking), converting each tool with `adapter`.
    pub fn enter_blocking_with<A: BlockingAdapter>(
        &mut self,
        adapter: &A,
    ) -> Result<Vec<A::Tool>, BridgeError> {
        let tools = self.enter_blocking()?;
        Ok(tools
            .into_iter()
            .map(|tool| adapter.adapt(&tool.descriptor, tool.invocation))
            .collect())
    }

    /// Tear down a blocking-mode scope and stop its background runtime.
    ///
    /// A shutdown that overruns the timeout is reported as a warning in the
    /// returned report; control always comes back to the caller.
    pub fn exit_blocking(&mut self) -> Result<TeardownReport, BridgeError> {
        let worker = match std::mem::replace(&mut self.scope, Scope::Transitioning) {
            Scope::Blocking(worker) => worker,
            Scope::Failed => {
                self.scope = Scope::Exited;
                return Ok(TeardownReport::default());
            }
            Scope::Async(pool) => {
                self.scope = Scope::Async(pool);
                return Err(BridgeError::ModeMismatch { entered: "async" });
            }
            other => return Err(self.restore_and_reject(other)),
        };
        self.token.cancel();

        let report = worker.shutdown(self.options.shutdown_timeout);
        self.scope = Scope::Exited;
        log_report(&report);
        Ok(report)
    }

    /// Run `body` inside a blocking-mode scope and always exit afterwards.
    pub fn scoped_blocking<F, T>(mut self, body: F) -> Result<(T, TeardownReport), BridgeError>
    where
        F: FnOnce(Vec<BlockingTool>) -> T,
    {
        let tools = self.enter_blocking()?;
        let output = body(tools);
        let report = self.exit_blocking()?;
        Ok((output, report))
    }

    fn restore_and_reject(&mut self, scope: Scope) -> BridgeError {
        let error = match scope {
            Scope::Exited => BridgeError::AlreadyExited,
            _ => BridgeError::NotEntered,
        };
        self.scope = scope;
        error
    }
}

impl Drop for ToolBridge {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.scope, Scope::Exited) {
            Scope::Blocking(worker) => {
                warn!("bridge dropped while entered; shutting down background runtime");
                self.token.cancel();
                log_report(&worker.shutdown(self.options.shutdown_timeout));
            }
            Scope::Async(pool) => {
                warn!("bridge dropped while entered; dropping sessions without graceful stop");
                self.token.cancel();
                drop(pool);
            }
            other => debug!(scope = other.name(), "bridge dropped"),
        }
    }
}

fn log_report(report: &TeardownReport) {
    if report.is_clean() {
        info!("bridge scope exited cleanly");
        return;
    }
    for failure in &report.errors {
        warn!(server = %failure.server, error = %failure.error, "teardown error");
    }
    for warning in &report.warnings {
        warn!(%warning, "teardown warning");
    }
}
