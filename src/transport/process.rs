use std::process::Stdio;

use async_trait::async_trait;
use rmcp::model::ClientInfo;
use rmcp::service::ServiceExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{ClientSession, OpenError, ToolTransport};
use crate::config::ProcessConfig;
use crate::error::TransportError;

/// Child-process transport speaking line-delimited JSON-RPC over stdio.
pub struct ProcessTransport {
    config: ProcessConfig,
    label: String,
    child: Option<Child>,
    closed: bool,
}

impl ProcessTransport {
    pub fn new(config: ProcessConfig) -> Self {
        let label = config.label();
        Self {
            config,
            label,
            child: None,
            closed: false,
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// OS process id of the running child, if one is alive.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    fn spawn(&mut self) -> Result<(ChildStdout, ChildStdin), TransportError> {
        let (program, args) =
            self.config
                .resolved_command()
                .map_err(|message| TransportError::Configuration {
                    server: self.label.clone(),
                    message,
                })?;

        let mut command = Command::new(&program);
        command
            .args(&args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if self.config.inherit_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }
        // Own process group: a Ctrl-C at the terminal does not reach the
        // child, which is stopped through close/kill instead.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            server: self.label.clone(),
            command: program.clone(),
            source,
        })?;

        let pipes = child.stdout.take().zip(child.stdin.take());
        let pid = child.id();
        self.child = Some(child);
        let (stdout, stdin) = pipes.ok_or_else(|| TransportError::Io {
            server: self.label.clone(),
            message: "child stdio pipes unavailable".into(),
        })?;

        info!(server = %self.label, command = %program, ?args, pid, "spawned tool server");
        Ok((stdout, stdin))
    }

    /// Wait out the grace period for the child to exit, then kill it.
    ///
    /// The child stays in `self.child` while waiting, so an abandoned reap
    /// leaves it reachable for [`ToolTransport::kill`].
    async fn reap(&mut self) -> Result<(), TransportError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let grace = self.config.grace_period_duration();
        let pid = child.id();

        let waited = tokio::time::timeout(grace, child.wait()).await;
        match waited {
            Ok(Ok(status)) => {
                self.child = None;
                debug!(server = %self.label, pid, %status, "tool server exited");
                Ok(())
            }
            Ok(Err(error)) => {
                self.child = None;
                Err(TransportError::Io {
                    server: self.label.clone(),
                    message: format!("failed to wait for child: {error}"),
                })
            }
            Err(_) => {
                warn!(
                    server = %self.label,
                    pid,
                    grace_ms = grace.as_millis() as u64,
                    "tool server did not exit within grace period; killing"
                );
                self.kill_child().await
            }
        }
    }

    /// SIGKILL the child (if still running) and wait for it to be reaped.
    async fn kill_child(&mut self) -> Result<(), TransportError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!(server = %self.label, %status, "tool server already exited");
            return Ok(());
        }
        child.kill().await.map_err(|error| TransportError::Io {
            server: self.label.clone(),
            message: format!("failed to kill child: {error}"),
        })
    }
}

#[async_trait]
impl ToolTransport for ProcessTransport {
    fn label(&self) -> &str {
        &self.label
    }

    async fn open(&mut self, client_info: ClientInfo) -> Result<ClientSession, OpenError> {
        if self.closed {
            return Err(TransportError::Closed {
                server: self.label.clone(),
            }
            .into());
        }
        if let Err(error) = self.reap().await {
            warn!(server = %self.label, %error, "failed to reap previous tool server");
        }

        let pipes = self.spawn()?;
        client_info
            .into_dyn()
            .serve(pipes)
            .await
            .map_err(OpenError::Initialize)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.reap().await
    }

    async fn kill(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        let pid = self.pid();
        if pid.is_some() {
            warn!(server = %self.label, pid, "force-killing tool server");
        }
        self.kill_child().await
    }
}
