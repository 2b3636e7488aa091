//! Background runtime thread that drives a pool for a sync-mode bridge.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::pool::{SessionPool, TeardownReport};
use crate::tools::ToolDescriptor;

use super::FORCE_RELEASE_TIMEOUT;

type Readiness = Result<(Vec<ToolDescriptor>, Handle), BridgeError>;

/// Owns the dedicated thread and current-thread runtime for one bridge scope.
pub(crate) struct Worker {
    thread: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
    /// Fired when a graceful stop overran; the worker kills what is left.
    force: CancellationToken,
    report: mpsc::Receiver<TeardownReport>,
}

impl Worker {
    /// Spawn the worker, start the pool on it, and block until it is ready.
    pub(crate) fn start(
        mut pool: SessionPool,
    ) -> Result<(Self, Vec<ToolDescriptor>, Handle), BridgeError> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Readiness>(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (report_tx, report_rx) = mpsc::sync_channel::<TeardownReport>(1);
        let force = CancellationToken::new();
        let force_rx = force.clone();

        let thread = std::thread::Builder::new()
            .name("tether-bridge".into())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(error) => {
                        let _ = ready_tx.send(Err(BridgeError::Runtime(error)));
                        return;
                    }
                };
                let handle = runtime.handle().clone();

                runtime.block_on(async move {
                    match pool.start_all().await {
                        Ok(tools) => {
                            if ready_tx.send(Ok((tools, handle))).is_err() {
                                pool.stop_all().await;
                                return;
                            }
                        }
                        Err(error) => {
                            let _ = ready_tx.send(Err(error.into()));
                            return;
                        }
                    }

                    // A dropped sender means the bridge went away; tear down either way.
                    let _ = shutdown_rx.await;
                    debug!("bridge worker shutting down");
                    let graceful = tokio::select! {
                        report = pool.stop_all() => Some(report),
                        _ = force_rx.cancelled() => None,
                    };
                    let report = match graceful {
                        Some(report) => report,
                        None => {
                            warn!("graceful stop abandoned; force-releasing sessions");
                            pool.abort_all().await
                        }
                    };
                    let _ = report_tx.send(report);
                });
            })
            .map_err(BridgeError::Runtime)?;

        let worker = Self {
            thread: Some(thread),
            shutdown: Some(shutdown_tx),
            force,
            report: report_rx,
        };
        match ready_rx.recv() {
            Ok(Ok((tools, handle))) => Ok((worker, tools, handle)),
            Ok(Err(error)) => {
                worker.join();
                Err(error)
            }
            Err(_) => {
                worker.join();
                Err(BridgeError::WorkerLost)
            }
        }
    }

    /// Stop the pool on the worker and wait up to `timeout` for it to finish.
    ///
    /// On timeout the worker drops the graceful stop and kills every remaining
    /// transport. If even that does not report back in time the thread is
    /// detached.
    pub(crate) fn shutdown(mut self, timeout: Duration) -> TeardownReport {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        match self.report.recv_timeout(timeout) {
            Ok(report) => {
                self.join();
                report
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "bridge shutdown timed out; force-releasing background runtime"
                );
                self.force.cancel();
                let mut report = match self.report.recv_timeout(FORCE_RELEASE_TIMEOUT) {
                    Ok(report) => {
                        self.join();
                        report
                    }
                    Err(_) => {
                        warn!("background runtime did not release in time; detaching it");
                        self.thread.take();
                        TeardownReport::default()
                    }
                };
                report
                    .warnings
                    .insert(0, BridgeError::ShutdownTimeout { after: timeout });
                report
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.join();
                TeardownReport {
                    errors: Vec::new(),
                    warnings: vec![BridgeError::WorkerLost],
                }
            }
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("bridge worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}
