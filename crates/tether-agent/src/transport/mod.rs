// ABOUTME: Transport capability set and its closed set of variants.
// ABOUTME: Each variant stages the agent, builds its invocation, and classifies failed launches.

mod exec;
mod local;

use std::path::Path;

use tokio::process::Command;

pub use exec::ExecTransport;
pub use local::LocalTransport;

use crate::error::{AgentError, Result};
use crate::process::{detect_failure, ExitState, FailureSignal};

/// Base name of the agent executable. Every agent invocation contains it.
pub const AGENT_BASE_NAME: &str = "tether-agent";

/// What the dial loop should do about a classified launch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    /// Install the agent before the next attempt.
    pub try_install: bool,
    /// Flip the command-dialect hypothesis before the next attempt.
    pub switch_dialect: bool,
}

impl Classification {
    /// A recognized failure that warrants no retry.
    pub const TERMINAL: Self = Self {
        try_install: false,
        switch_dialect: false,
    };

    pub const fn new(try_install: bool, switch_dialect: bool) -> Self {
        Self {
            try_install,
            switch_dialect,
        }
    }
}

/// Per-transport mapping from failure signal to classification.
pub(crate) type ResponseTable = &'static [(FailureSignal, Classification)];

/// Classify a failed launch against a transport's response table.
///
/// Failures that match no known signal, or a signal the table does not
/// cover, are reported as [`AgentError::UnknownErrorCondition`].
pub(crate) fn classify_with(
    table: ResponseTable,
    exit: &ExitState,
    error_output: &str,
) -> Result<Classification> {
    let signal = detect_failure(exit, error_output).ok_or(AgentError::UnknownErrorCondition)?;
    table
        .iter()
        .find(|(candidate, _)| *candidate == signal)
        .map(|(_, classification)| *classification)
        .ok_or(AgentError::UnknownErrorCondition)
}

/// The platform whose command syntax a transport builds processes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Posix,
    Windows,
}

impl Platform {
    /// The platform this process is running on.
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }
}

/// Capability set every transport variant provides.
pub trait AgentTransport: Send + Sync {
    /// Stage a local agent binary at `remote_name` on the far side.
    fn copy(&self, local_path: &Path, remote_name: &str) -> Result<()>;

    /// Build the process that runs `command` on the far side.
    fn command(&self, command: &str) -> Result<Command>;

    /// Interpret a failed agent launch.
    fn classify_error(&self, exit: &ExitState, error_output: &str) -> Result<Classification>;
}

/// The closed set of transport variants.
#[derive(Debug, Clone)]
pub enum Transport {
    Exec(ExecTransport),
    Local(LocalTransport),
}

impl AgentTransport for Transport {
    fn copy(&self, local_path: &Path, remote_name: &str) -> Result<()> {
        match self {
            Transport::Exec(transport) => transport.copy(local_path, remote_name),
            Transport::Local(transport) => transport.copy(local_path, remote_name),
        }
    }

    fn command(&self, command: &str) -> Result<Command> {
        match self {
            Transport::Exec(transport) => transport.command(command),
            Transport::Local(transport) => transport.command(command),
        }
    }

    fn classify_error(&self, exit: &ExitState, error_output: &str) -> Result<Classification> {
        match self {
            Transport::Exec(transport) => transport.classify_error(exit, error_output),
            Transport::Local(transport) => transport.classify_error(exit, error_output),
        }
    }
}

impl From<ExecTransport> for Transport {
    fn from(transport: ExecTransport) -> Self {
        Transport::Exec(transport)
    }
}

impl From<LocalTransport> for Transport {
    fn from(transport: LocalTransport) -> Self {
        Transport::Local(transport)
    }
}

/// Detach a process from the controlling terminal's process group so that
/// terminal signals aimed at the caller do not reach the agent.
pub(crate) fn detach(command: &mut Command) {
    #[cfg(unix)]
    {
        command.process_group(0);
    }
    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        command.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: ResponseTable = &[(
        FailureSignal::PosixCommandNotFound,
        Classification::new(true, false),
    )];

    #[test]
    fn test_classify_with_known_signal() {
        let classification = classify_with(TABLE, &ExitState::from_code(127), "").unwrap();
        assert!(classification.try_install);
        assert!(!classification.switch_dialect);
    }

    #[test]
    fn test_classify_with_signal_missing_from_table() {
        let result = classify_with(TABLE, &ExitState::from_code(126), "");
        assert!(matches!(result, Err(AgentError::UnknownErrorCondition)));
    }

    #[test]
    fn test_classify_with_unrecognized_failure() {
        let result = classify_with(TABLE, &ExitState::from_code(2), "segfault");
        assert!(matches!(result, Err(AgentError::UnknownErrorCondition)));
    }

    #[test]
    fn test_transport_enum_dispatches() {
        let transport = Transport::from(ExecTransport::new("/usr/bin/kubectl exec pod", ""));
        let result = transport.command("ls -la");
        assert!(matches!(result, Err(AgentError::UnsupportedCommand)));
        assert!(transport.copy(Path::new("/tmp/agent"), "agent").is_ok());
    }

    #[test]
    fn test_platform_current() {
        if cfg!(windows) {
            assert_eq!(Platform::current(), Platform::Windows);
        } else {
            assert_eq!(Platform::current(), Platform::Posix);
        }
    }
}
