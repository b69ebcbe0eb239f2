// ABOUTME: Bounded agent dial loop driven by transport failure classification.
// ABOUTME: Launches the agent, handshakes, and retries under dialect and installation hypotheses.

use std::fmt;
use std::path::PathBuf;

use crate::error::{AgentError, Result};
use crate::handshake::client_handshake;
use crate::hypothesis::{Decision, Dialect, HypothesisState, RetryPolicy};
use crate::process::ExitState;
use crate::stream::AgentStream;
use crate::transport::{AgentTransport, AGENT_BASE_NAME};
use crate::VERSION;

/// Directory, relative to the remote home, that holds installed agents.
pub const AGENT_DIRECTORY: &str = ".tether/agents";

/// The role an agent process is launched in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Synchronizer,
    Forwarder,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Synchronizer => "synchronizer",
            AgentMode::Forwarder => "forwarder",
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the agent for this version is installed, relative to the remote home.
pub fn install_path() -> String {
    format!("{AGENT_DIRECTORY}/{VERSION}/{AGENT_BASE_NAME}")
}

/// The generic agent invocation for `mode` under `dialect`.
pub fn agent_invocation(mode: AgentMode, dialect: Dialect) -> String {
    let invocation = format!("{} {}", install_path(), mode);
    match dialect {
        Dialect::PosixShell => invocation,
        Dialect::WindowsCmd => invocation.replace('/', "\\"),
    }
}

/// Options for one logical dial.
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    pub policy: RetryPolicy,
    /// Local agent binary used when a transport asks for installation.
    pub agent_binary: Option<PathBuf>,
}

impl DialOptions {
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_agent_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.agent_binary = Some(path.into());
        self
    }
}

/// How a single launch attempt failed.
enum AttemptError {
    /// Not a launch failure; never retried.
    Fatal(AgentError),
    /// The agent did not come up. Classified by the transport.
    Launch {
        error: AgentError,
        exit: ExitState,
        output: String,
    },
}

/// Dial an agent over `transport`, returning a stream positioned just past
/// the greeting.
pub async fn dial<T: AgentTransport + ?Sized>(
    transport: &T,
    mode: AgentMode,
    options: &DialOptions,
) -> Result<AgentStream> {
    let mut state = HypothesisState::new(options.policy.clone());

    loop {
        let attempt = state.begin_attempt();
        let invocation = agent_invocation(mode, state.dialect());
        tracing::debug!(attempt, dialect = ?state.dialect(), %invocation, "Dialing agent");

        let (error, exit, output) = match launch(transport, &invocation).await {
            Ok(stream) => {
                tracing::info!(attempt, pid = ?stream.id(), "Agent connected");
                return Ok(stream);
            }
            Err(AttemptError::Fatal(error)) => return Err(error),
            Err(AttemptError::Launch {
                error,
                exit,
                output,
            }) => (error, exit, output),
        };

        tracing::warn!(attempt, error = %error, exit_code = ?exit.code(), "Agent launch failed");

        let classification = transport.classify_error(&exit, &output)?;
        match state.decide(classification) {
            Decision::GiveUp => return Err(error),
            Decision::Exhausted => {
                return Err(AgentError::RetriesExhausted {
                    attempts: state.attempts(),
                    source: Box::new(error),
                })
            }
            Decision::InstallThenRetry => {
                let binary = options
                    .agent_binary
                    .as_deref()
                    .ok_or(AgentError::NoAgentBinary)?;
                transport.copy(binary, &install_path())?;
            }
            Decision::Retry => {}
        }

        tokio::time::sleep(state.policy().backoff_for(attempt)).await;
    }
}

async fn launch<T: AgentTransport + ?Sized>(
    transport: &T,
    invocation: &str,
) -> std::result::Result<AgentStream, AttemptError> {
    let command = transport.command(invocation).map_err(AttemptError::Fatal)?;

    let mut stream = match AgentStream::spawn(command) {
        Ok(stream) => stream,
        Err(AgentError::Spawn { program, source })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            return Err(AttemptError::Launch {
                error: AgentError::Spawn { program, source },
                exit: ExitState::command_not_found(),
                output: String::new(),
            });
        }
        Err(error) => return Err(AttemptError::Fatal(error)),
    };

    match client_handshake(&mut stream).await {
        Ok(()) => Ok(stream),
        Err(error @ AgentError::VersionMismatch { .. }) => {
            stream.close().await;
            Err(AttemptError::Fatal(error))
        }
        Err(error) => {
            let (exit, output) = stream.terminate().await;
            let error = match (error, output.trim()) {
                (AgentError::Handshake(reason), detail) if !detail.is_empty() => {
                    AgentError::Handshake(format!("{reason} (error output: {detail})"))
                }
                (error, _) => error,
            };
            Err(AttemptError::Launch {
                error,
                exit,
                output,
            })
        }
    }
}
