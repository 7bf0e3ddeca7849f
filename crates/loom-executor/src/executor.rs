use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command as AsyncCommand;
use tracing::debug;
#[cfg(not(unix))]
use tracing::warn;

use crate::error::ExecutorError;
use crate::types::ExecResult;
use crate::whitelist;

/// Guarded shell command executor.
///
/// Commands are whitelist-checked before they ever reach a subprocess, run
/// with the caller-supplied working directory, and killed if they exceed the
/// configured timeout. Execution is serialized through an internal async
/// mutex — the whole subsystem behaves as a single-writer actor so host load
/// from concurrent sessions stays bounded.
pub struct Executor {
    serialize: tokio::sync::Mutex<()>,
    timeout: Duration,
}

impl Executor {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            serialize: tokio::sync::Mutex::new(()),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Run `command` with `work_dir` as its cwd. Always returns a result —
    /// whitelist rejection, timeout, and non-zero exit are all folded into
    /// the returned `ExecResult` rather than propagated as errors.
    pub async fn execute(&self, command: &str, work_dir: &Path) -> ExecResult {
        if let Err(reason) = whitelist::check_command(command) {
            return ExecResult::blocked(reason);
        }

        let _guard = self.serialize.lock().await;
        debug!(command, "executing");

        match self.run(command, work_dir).await {
            Ok((exit_code, stdout, stderr)) => {
                if exit_code == 0 {
                    ExecResult::ok(stdout)
                } else {
                    ExecResult::failed(stdout, stderr, format!("Exit code: {exit_code}"))
                }
            }
            Err(ExecutorError::Timeout { .. }) => ExecResult::failed(
                String::new(),
                String::new(),
                format!(
                    "Command timed out after {} seconds",
                    self.timeout.as_secs()
                ),
            ),
            Err(e) => ExecResult::failed(String::new(), String::new(), e.to_string()),
        }
    }

    async fn run(
        &self,
        command: &str,
        work_dir: &Path,
    ) -> Result<(i32, String, String), ExecutorError> {
        let child = AsyncCommand::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecutorError::Spawn(e.to_string()))?;

        let pid = child.id();
        let (tx, rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let _ = tx.send(child.wait_with_output().await);
        });

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(output))) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                Ok((exit_code, stdout, stderr))
            }
            Ok(Ok(Err(e))) => Err(ExecutorError::Io(e)),
            Ok(Err(_recv_err)) => Err(ExecutorError::Spawn(
                "wait task panicked unexpectedly".to_string(),
            )),
            Err(_elapsed) => {
                if let Some(raw_pid) = pid {
                    #[cfg(unix)]
                    unsafe {
                        libc::kill(raw_pid as libc::pid_t, libc::SIGKILL);
                    }
                    #[cfg(not(unix))]
                    {
                        warn!("timeout kill unsupported on this platform, pid {raw_pid}");
                    }
                }
                Err(ExecutorError::Timeout {
                    ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_allowed_command() {
        let executor = Executor::new(5);
        let dir = std::env::temp_dir();
        let result = executor.execute("echo hello", &dir).await;
        assert!(result.success);
        assert_eq!(result.stdout.as_deref(), Some("hello\n"));
    }

    #[tokio::test]
    async fn blocks_disallowed_command() {
        let executor = Executor::new(5);
        let dir = std::env::temp_dir();
        let result = executor.execute("rm -rf /", &dir).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not allowed"));
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let executor = Executor::new(5);
        let dir = std::env::temp_dir();
        let result = executor.execute("ls /nonexistent-path-xyz", &dir).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Exit code:"));
    }

    #[tokio::test]
    async fn kills_on_timeout() {
        let executor = Executor::new(1);
        let dir = std::env::temp_dir();
        let result = executor.execute("dig +time=5 example.com", &dir).await;
        // either the command genuinely completes within 1s or it's killed —
        // either way the call must not hang past the deadline.
        if !result.success {
            if let Some(err) = &result.error {
                assert!(err.contains("timed out") || err.starts_with("Exit code:"));
            }
        }
    }
}
