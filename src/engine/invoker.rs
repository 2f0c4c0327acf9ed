//! External measurement tool invocation
//!
//! The orchestrator only sees [`ProcessExecutor`]: hand it a resolved command
//! line and a kill signal, get back a [`ProcessOutput`] once the tool is done.
//! [`ToolExecutor`] is the real implementation on top of `tokio::process`.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use crate::common::config::Config;
use crate::common::Error;

/// Fires (or is dropped) when the orchestrator wants the tool gone
pub type KillSignal = oneshot::Receiver<()>;

/// How the tool process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    /// Exited on its own with an exit code
    Normal,
    /// Killed by a signal, timed out, or otherwise ended without an exit code
    Crashed,
    /// Could not be spawned at all
    FailedToStart,
}

/// Everything the orchestrator learns from one tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub exit_kind: ExitKind,
    /// Decoded and trimmed stdout; the step's raw value
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// A tool that exited by itself
    pub fn exited(code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            exit_code: Some(code),
            exit_kind: ExitKind::Normal,
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
        }
    }

    /// A tool that ended abnormally
    pub fn crashed(stdout: &str, stderr: &str) -> Self {
        Self {
            exit_code: None,
            exit_kind: ExitKind::Crashed,
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
        }
    }

    /// A tool that never ran
    pub fn failed_to_start(reason: &str) -> Self {
        Self {
            exit_code: None,
            exit_kind: ExitKind::FailedToStart,
            stdout: String::new(),
            stderr: reason.to_string(),
        }
    }

    /// The step's raw measurement value
    pub fn raw_value(&self) -> &str {
        &self.stdout
    }

    /// The process-level failure, if the run was not clean
    ///
    /// Only a normal exit with code 0 is eligible for validation.
    pub fn failure(&self, program: &str) -> Option<Error> {
        match (self.exit_kind, self.exit_code) {
            (ExitKind::FailedToStart, _) => Some(Error::process_start(program, &self.stderr)),
            (ExitKind::Crashed, _) | (ExitKind::Normal, None) => {
                Some(Error::ProcessCrash(self.stderr.clone()))
            }
            (ExitKind::Normal, Some(0)) => None,
            (ExitKind::Normal, Some(code)) => Some(Error::ProcessNonZeroExit {
                code,
                stderr: self.stderr.clone(),
            }),
        }
    }
}

/// Runs one resolved command line to completion
///
/// Implementations must return promptly once `kill` fires or its sender is
/// dropped, after making sure the process is gone.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn execute(&self, command_line: &str, kill: KillSignal) -> ProcessOutput;
}

/// Launches tools from a tools directory without a shell
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    tools_root: PathBuf,
    timeout: Duration,
    kill_grace: Duration,
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Killed,
}

impl ToolExecutor {
    pub fn new(tools_root: impl Into<PathBuf>, timeout: Duration, kill_grace: Duration) -> Self {
        Self {
            tools_root: tools_root.into(),
            timeout,
            kill_grace,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.tools.root.clone(),
            config.timeouts.step(),
            config.timeouts.kill_grace(),
        )
    }

    /// Split a command line into the tool path and its arguments
    ///
    /// The first whitespace-delimited token is joined onto the tools root
    /// (an absolute token is used as is); the rest are passed through
    /// verbatim. Returns `None` for a blank command line.
    pub fn resolve(&self, command_line: &str) -> Option<(PathBuf, Vec<String>)> {
        let mut tokens = command_line.split_whitespace();
        let program = tokens.next()?;
        let args = tokens.map(str::to_string).collect();

        let mut root = self.tools_root.clone();
        if root.is_relative() {
            if let Ok(cwd) = std::env::current_dir() {
                root = cwd.join(root);
            }
        }
        Some((root.join(program), args))
    }

    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            // The tool leads its own process group; take its helpers down too
            if let Some(pid) = child.id() {
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGKILL);
                }
            }
        }
        let _ = child.start_kill();

        if tokio::time::timeout(self.kill_grace, child.wait()).await.is_err() {
            tracing::warn!(
                "Tool did not exit within {} ms of being killed",
                self.kill_grace.as_millis()
            );
        }
    }
}

#[async_trait]
impl ProcessExecutor for ToolExecutor {
    async fn execute(&self, command_line: &str, mut kill: KillSignal) -> ProcessOutput {
        let Some((program, args)) = self.resolve(command_line) else {
            return ProcessOutput::failed_to_start("empty command line");
        };

        tracing::debug!(program = %program.display(), ?args, "Launching tool");

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("Failed to start {}: {}", program.display(), e);
                return ProcessOutput::failed_to_start(&e.to_string());
            }
        };

        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = tokio::time::sleep(self.timeout) => Waited::TimedOut,
            _ = &mut kill => Waited::Killed,
        };

        if !matches!(waited, Waited::Exited(_)) {
            self.terminate(&mut child).await;
        }

        let stdout = collect(stdout, self.kill_grace).await;
        let mut stderr = collect(stderr, self.kill_grace).await;

        match waited {
            Waited::Exited(Ok(status)) => match status.code() {
                Some(code) => ProcessOutput::exited(code, &stdout, &stderr),
                None => {
                    if stderr.trim().is_empty() {
                        stderr = format!("terminated abnormally ({})", status);
                    }
                    ProcessOutput::crashed(&stdout, &stderr)
                }
            },
            Waited::Exited(Err(e)) => {
                ProcessOutput::crashed(&stdout, &format!("failed to wait for tool: {}", e))
            }
            Waited::TimedOut => ProcessOutput::crashed(
                &stdout,
                &format!("timed out after {} seconds", self.timeout.as_secs()),
            ),
            Waited::Killed => ProcessOutput::crashed(&stdout, "killed on request"),
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

async fn collect(task: tokio::task::JoinHandle<Vec<u8>>, grace: Duration) -> String {
    let abort = task.abort_handle();
    match tokio::time::timeout(grace, task).await {
        Ok(Ok(bytes)) => decode_permissive(&bytes),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

/// Decode tool output, dropping bytes that are not valid UTF-8
pub fn decode_permissive(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_drops_invalid_bytes() {
        assert_eq!(decode_permissive(b"15\n"), "15\n");
        assert_eq!(decode_permissive(b"1\xff5"), "15");
        assert_eq!(decode_permissive(b"\xc3\x28ok"), "(ok");
        assert_eq!(decode_permissive("温度 25".as_bytes()), "温度 25");
    }

    #[test]
    fn test_output_classification() {
        assert!(ProcessOutput::exited(0, " 15 \n", "").failure("t").is_none());
        assert_eq!(ProcessOutput::exited(0, " 15 \n", "").raw_value(), "15");

        assert!(matches!(
            ProcessOutput::exited(3, "", "bad").failure("t"),
            Some(Error::ProcessNonZeroExit { code: 3, .. })
        ));
        assert!(matches!(
            ProcessOutput::crashed("", "signal 9").failure("t"),
            Some(Error::ProcessCrash(_))
        ));
        assert!(matches!(
            ProcessOutput::failed_to_start("not found").failure("t"),
            Some(Error::ProcessStart { .. })
        ));
    }

    #[test]
    fn test_resolve_against_tools_root() {
        let exec = ToolExecutor::new("/opt/tools", Duration::from_secs(1), Duration::ZERO);
        let (program, args) = exec.resolve("  meter.exe --port 3  AA:BB ").unwrap();
        assert_eq!(program, PathBuf::from("/opt/tools/meter.exe"));
        assert_eq!(args, vec!["--port", "3", "AA:BB"]);

        assert!(exec.resolve("   ").is_none());
    }

    #[test]
    fn test_resolve_relative_root_is_absolute() {
        let exec = ToolExecutor::new("tools", Duration::from_secs(1), Duration::ZERO);
        let (program, _) = exec.resolve("meter.exe").unwrap();
        assert!(program.is_absolute());
        assert!(program.ends_with("tools/meter.exe"));
    }

    #[tokio::test]
    async fn test_missing_tool_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ToolExecutor::new(dir.path(), Duration::from_secs(5), Duration::from_millis(200));
        let (_tx, rx) = oneshot::channel();
        let output = exec.execute("does-not-exist.exe", rx).await;
        assert_eq!(output.exit_kind, ExitKind::FailedToStart);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn tool(dir: &std::path::Path, name: &str, body: &str) {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        #[tokio::test]
        async fn test_captures_trimmed_stdout() {
            let dir = tempfile::tempdir().unwrap();
            tool(dir.path(), "echo.sh", "echo \"  $1  \"; echo oops >&2");
            let exec =
                ToolExecutor::new(dir.path(), Duration::from_secs(5), Duration::from_millis(200));
            let (_tx, rx) = oneshot::channel();
            let output = exec.execute("echo.sh 15", rx).await;
            assert_eq!(output.exit_kind, ExitKind::Normal);
            assert_eq!(output.exit_code, Some(0));
            assert_eq!(output.stdout, "15");
            assert_eq!(output.stderr, "oops");
        }

        #[tokio::test]
        async fn test_no_shell_interpretation() {
            let dir = tempfile::tempdir().unwrap();
            tool(dir.path(), "args.sh", "echo \"$#:$1\"");
            let exec =
                ToolExecutor::new(dir.path(), Duration::from_secs(5), Duration::from_millis(200));
            let (_tx, rx) = oneshot::channel();
            let output = exec.execute("args.sh $(reboot);x", rx).await;
            assert_eq!(output.stdout, "1:$(reboot);x");
        }

        #[tokio::test]
        async fn test_nonzero_exit_code() {
            let dir = tempfile::tempdir().unwrap();
            tool(dir.path(), "fail.sh", "echo 12; exit 4");
            let exec =
                ToolExecutor::new(dir.path(), Duration::from_secs(5), Duration::from_millis(200));
            let (_tx, rx) = oneshot::channel();
            let output = exec.execute("fail.sh", rx).await;
            assert_eq!(output.exit_code, Some(4));
            assert!(matches!(
                output.failure("fail.sh"),
                Some(Error::ProcessNonZeroExit { code: 4, .. })
            ));
        }

        #[tokio::test]
        async fn test_timeout_kills_tool() {
            let dir = tempfile::tempdir().unwrap();
            tool(dir.path(), "hang.sh", "sleep 30");
            let exec = ToolExecutor::new(
                dir.path(),
                Duration::from_millis(200),
                Duration::from_millis(500),
            );
            let (_tx, rx) = oneshot::channel();
            let started = std::time::Instant::now();
            let output = exec.execute("hang.sh", rx).await;
            assert_eq!(output.exit_kind, ExitKind::Crashed);
            assert!(output.stderr.contains("timed out"));
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[tokio::test]
        async fn test_kill_signal_stops_tool() {
            let dir = tempfile::tempdir().unwrap();
            tool(dir.path(), "hang.sh", "sleep 30");
            let exec =
                ToolExecutor::new(dir.path(), Duration::from_secs(60), Duration::from_millis(500));
            let (tx, rx) = oneshot::channel();
            let handle = tokio::spawn(async move { exec.execute("hang.sh", rx).await });
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(());
            let output = tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("tool was not killed")
                .unwrap();
            assert_eq!(output.exit_kind, ExitKind::Crashed);
        }
    }
}
