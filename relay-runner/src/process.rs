//! Subprocess lifecycle: spawn in a fresh process group, stream its pipes,
//! and tear it down without leaking descendants. Grounded on
//! `original_source/src/takopi/runner.py`'s `manage_subprocess` /
//! `JsonlSubprocessRunner.run_impl`, translated from asyncio's
//! `create_subprocess_exec` + process-group kill into `tokio::process`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::warn;

use relay_core::{RelayError, Result};

/// How long a terminated subprocess gets to exit cleanly before SIGKILL
/// (spec.md §4.2).
const GRACE_PERIOD: Duration = Duration::from_secs(2);

/// One spawned engine CLI invocation, isolated in its own process group so
/// cancellation can kill it and every descendant it forked.
pub struct ManagedProcess {
    child: Child,
    pid: i32,
}

impl ManagedProcess {
    pub fn spawn(
        program: &str,
        args: &[String],
        env: Option<&[(String, String)]>,
        cwd: Option<&Path>,
    ) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = env {
            cmd.env_clear();
            cmd.envs(env.iter().cloned());
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(RelayError::Io)?;
        let pid = child
            .id()
            .ok_or_else(|| RelayError::State("subprocess exited before it could be observed".into()))?
            as i32;
        let _ = &mut child;
        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await.map_err(RelayError::Io)?;
        Ok(status.code().unwrap_or(-1))
    }

    /// SIGTERM the whole process group, give it [`GRACE_PERIOD`] to exit,
    /// then SIGKILL. Idempotent: safe to call on an already-exited child.
    pub async fn terminate(&mut self) {
        self.signal_group(libc_sigterm());
        if timeout(GRACE_PERIOD, self.child.wait()).await.is_err() {
            warn!(pid = self.pid, "subprocess did not exit within grace period, sending SIGKILL");
            self.signal_group(libc_sigkill());
            let _ = self.child.wait().await;
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, sig: i32) {
        // Negative pid addresses the whole process group created by
        // `process_group(0)` at spawn time.
        unsafe {
            libc::kill(-self.pid, sig);
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&self, _sig: i32) {}
}

#[cfg(unix)]
fn libc_sigterm() -> i32 {
    libc::SIGTERM
}
#[cfg(not(unix))]
fn libc_sigterm() -> i32 {
    0
}

#[cfg(unix)]
fn libc_sigkill() -> i32 {
    libc::SIGKILL
}
#[cfg(not(unix))]
fn libc_sigkill() -> i32 {
    0
}
