//! Remote command execution
//!
//! The router is driven entirely through a synchronous command channel: one
//! blocking call per command, exit status and captured stdout back.  Any
//! transport that can do that (SSH, local shell, RPC) satisfies
//! [`RemoteExecutor`].

use crate::error::{RouterError, RouterResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Timeout applied to commands that have no caller-supplied bound
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one remote command
#[derive(Debug, Clone)]
pub struct CmdResult {
    pub exit_status: i32,
    pub stdout: String,
}

impl CmdResult {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Synchronous remote command execution
///
/// With `ignore_status` unset, a nonzero exit becomes `CommandFailed`; with it
/// set the caller inspects the exit status itself.  Exceeding `timeout` is
/// always an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(
        &self,
        command: &str,
        timeout: Duration,
        ignore_status: bool,
    ) -> RouterResult<CmdResult>;
}

/// Executor that reaches the router over ssh
pub struct SshExecutor {
    host: String,
    user: Option<String>,
    port: u16,
}

impl SshExecutor {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: 22,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn target(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        command: &str,
        timeout: Duration,
        ignore_status: bool,
    ) -> RouterResult<CmdResult> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-p")
            .arg(self.port.to_string())
            .arg(self.target())
            .arg(command);
        run_command(cmd, command, timeout, ignore_status).await
    }
}

/// Executor that runs commands on the local machine
///
/// Useful when the test rig and the router are the same host, and for
/// exercising the command layer without a remote end.
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn run(
        &self,
        command: &str,
        timeout: Duration,
        ignore_status: bool,
    ) -> RouterResult<CmdResult> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        run_command(cmd, command, timeout, ignore_status).await
    }
}

async fn run_command(
    mut cmd: Command,
    display: &str,
    timeout: Duration,
    ignore_status: bool,
) -> RouterResult<CmdResult> {
    let cmd_str = display;
    debug!("running: {cmd_str}");

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            RouterError::Timeout(format!(
                "command '{}' did not finish within {:?}",
                display, timeout
            ))
        })?
        .map_err(|e| RouterError::CommandFailed {
            cmd: display.to_string(),
            code: None,
            stderr: e.to_string(),
        })?;

    let exit_status = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();

    if !ignore_status && exit_status != 0 {
        return Err(RouterError::CommandFailed {
            cmd: display.to_string(),
            code: Some(exit_status),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(CmdResult {
        exit_status,
        stdout,
    })
}

/// Kill a process on the router by name, optionally scoped to one instance
///
/// The instance pattern narrows the pkill match, e.g. killing only the
/// hostapd that was started with a particular config file.  With a nonzero
/// `wait`, the remote command itself polls until the process is gone; the
/// wait loop runs on the router, not here.  Never raises: teardown must keep
/// going even when the process already exited.
pub async fn kill_process_instance(
    executor: &dyn RemoteExecutor,
    process: &str,
    instance: Option<&str>,
    wait: Duration,
) {
    let search_arg = match instance {
        Some(instance) => format!("-f \"{}.*{}\"", process, instance),
        None => process.to_string(),
    };

    let mut cmd = format!("pkill {} >/dev/null 2>&1", search_arg);
    let timeout = if wait.is_zero() {
        DEFAULT_COMMAND_TIMEOUT
    } else {
        cmd.push_str(&format!(
            " && while pgrep {} &> /dev/null; do sleep 1; done",
            search_arg
        ));
        wait
    };

    if let Err(e) = executor.run(&cmd, timeout, true).await {
        warn!("failed to kill {}: {}", process, e);
    }
}
