// ABOUTME: Exec transport that reaches a pre-installed agent through a wrapper command.
// ABOUTME: Splits a kubectl-style wrapper manually because its path prefix may contain spaces.

use std::path::Path;

use tokio::process::Command;

use super::{
    classify_with, detach, AgentTransport, Classification, Platform, ResponseTable,
    AGENT_BASE_NAME,
};
use crate::error::{AgentError, Result};
use crate::process::{ExitState, FailureSignal};

/// Installation is never attempted. POSIX shell failures are final; cmd.exe
/// failures usually mean POSIX syntax reached a Windows shell, so they ask
/// for a dialect switch.
const EXEC_RESPONSES: ResponseTable = &[
    (FailureSignal::PosixInvalidCommand, Classification::TERMINAL),
    (FailureSignal::PosixCommandNotFound, Classification::TERMINAL),
    (
        FailureSignal::WindowsInvalidCommand,
        Classification::new(false, true),
    ),
    (
        FailureSignal::WindowsCommandNotFound,
        Classification::new(false, true),
    ),
];

/// Transport that launches the agent with a command taken from an exec URL.
///
/// The agent is expected to already exist on the far side (for example baked
/// into a container image), so [`AgentTransport::copy`] does nothing.
#[derive(Debug, Clone)]
pub struct ExecTransport {
    command: String,
    prompter: String,
    platform: Platform,
}

impl ExecTransport {
    /// Create an exec transport for the stored wrapper command.
    pub fn new(command: impl Into<String>, prompter: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            prompter: prompter.into(),
            platform: Platform::current(),
        }
    }

    /// Override the platform used to locate the wrapper marker.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn stored_command(&self) -> &str {
        &self.command
    }

    pub fn prompter(&self) -> &str {
        &self.prompter
    }

    fn marker(&self) -> &'static str {
        match self.platform {
            Platform::Windows => "\\kubectl.exe ",
            Platform::Posix => "/kubectl ",
        }
    }

    /// Split the stored command into program and arguments.
    ///
    /// Everything through the marker (minus its trailing space) is the
    /// program; the rest is split on single spaces.
    fn split_invocation(&self) -> Result<(String, Vec<String>)> {
        let marker = self.marker();
        let index = self
            .command
            .find(marker)
            .ok_or(AgentError::UnidentifiedInvocation)?;

        let program = self.command[..index + marker.len() - 1].to_string();
        let arguments = self.command[index + marker.len()..]
            .split(' ')
            .map(str::to_string)
            .collect();

        Ok((program, arguments))
    }
}

impl AgentTransport for ExecTransport {
    fn copy(&self, _local_path: &Path, _remote_name: &str) -> Result<()> {
        Ok(())
    }

    fn command(&self, command: &str) -> Result<Command> {
        // Only the agent launch is supported, and the generic invocation is
        // replaced wholesale by the stored wrapper command.
        if !command.contains(AGENT_BASE_NAME) {
            return Err(AgentError::UnsupportedCommand);
        }

        let (program, arguments) = self.split_invocation()?;
        tracing::debug!(
            program = %program,
            arguments = ?arguments,
            prompter = %self.prompter,
            "Built exec agent command"
        );

        let mut process = Command::new(program);
        process.args(arguments);
        detach(&mut process);
        process.env_clear().envs(std::env::vars_os());

        Ok(process)
    }

    fn classify_error(&self, exit: &ExitState, error_output: &str) -> Result<Classification> {
        classify_with(EXEC_RESPONSES, exit, error_output)
    }
}
