// ABOUTME: Duplex byte stream over an agent child process's stdin and stdout.
// ABOUTME: Captures bounded stderr for failure classification and kills the child on drop.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::error::{AgentError, Result};
use crate::process::ExitState;

/// Upper bound on captured agent error output.
pub const MAX_CAPTURED_ERROR_OUTPUT: usize = 64 * 1024;

/// How long a terminating agent gets to exit after its stdin closes.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// A running agent process presented as one duplex stream.
pub struct AgentStream {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    error_output: Arc<Mutex<String>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl AgentStream {
    /// Spawn `command` with piped stdio and wrap it.
    pub fn spawn(mut command: Command) -> Result<Self> {
        let program = command
            .as_std()
            .get_program()
            .to_string_lossy()
            .into_owned();

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|source| AgentError::Spawn { program, source })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("agent stdout was not captured"))?;

        let error_output = Arc::new(Mutex::new(String::new()));
        let stderr_task = child.stderr.take().map(|stderr| {
            let captured = Arc::clone(&error_output);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(line = %line, "agent stderr");
                    if let Ok(mut captured) = captured.lock() {
                        if captured.len() + line.len() < MAX_CAPTURED_ERROR_OUTPUT {
                            captured.push_str(&line);
                            captured.push('\n');
                        }
                    }
                }
            })
        });

        tracing::debug!(pid = ?child.id(), "Spawned agent process");

        Ok(Self {
            child,
            stdin,
            stdout,
            error_output,
            stderr_task,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Error output captured so far.
    pub fn error_output(&self) -> String {
        self.error_output
            .lock()
            .map(|captured| captured.clone())
            .unwrap_or_default()
    }

    /// Close stdin, wait for the agent to exit, and collect its exit state
    /// and error output. Agents that outlive the grace period are killed.
    pub async fn terminate(mut self) -> (ExitState, String) {
        drop(self.stdin.take());

        let exit = match tokio::time::timeout(TERMINATION_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => ExitState::from(status),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to wait for agent process");
                ExitState::unknown()
            }
            Err(_) => {
                tracing::warn!("Agent did not exit after stdin closed, killing it");
                let _ = self.child.kill().await;
                ExitState::unknown()
            }
        };

        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(TERMINATION_GRACE, task).await;
        }

        (exit, self.error_output())
    }

    /// Kill the agent and release its pipes.
    pub async fn close(mut self) {
        drop(self.stdin.take());
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "Agent process already gone");
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for AgentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStream")
            .field("pid", &self.child.id())
            .field("stdin_open", &self.stdin.is_some())
            .finish()
    }
}

impl Drop for AgentStream {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

impl AsyncRead for AgentStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for AgentStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_write(cx, buf),
            None => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
