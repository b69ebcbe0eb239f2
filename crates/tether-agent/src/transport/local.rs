// ABOUTME: Local transport that runs the agent out of a staging directory on this machine.
// ABOUTME: Supports installation, so missing agents are copied into place and retried.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use super::{classify_with, detach, AgentTransport, Classification, ResponseTable};
use crate::error::{AgentError, Result};
use crate::process::{ExitState, FailureSignal};

/// A missing or unusable agent is installed and retried. cmd.exe failures
/// additionally flip the dialect.
const LOCAL_RESPONSES: ResponseTable = &[
    (
        FailureSignal::PosixInvalidCommand,
        Classification::new(true, false),
    ),
    (
        FailureSignal::PosixCommandNotFound,
        Classification::new(true, false),
    ),
    (
        FailureSignal::WindowsInvalidCommand,
        Classification::new(true, true),
    ),
    (
        FailureSignal::WindowsCommandNotFound,
        Classification::new(true, true),
    ),
];

/// Transport rooted at a local staging directory.
///
/// Agent invocations are relative paths such as
/// `.tether/agents/<version>/tether-agent synchronizer`; the program is
/// resolved against the root and the rest is split on spaces.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    root: PathBuf,
}

impl LocalTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative name, written with either separator, under the root.
    fn resolve(&self, name: &str) -> PathBuf {
        name.split(['/', '\\'])
            .filter(|component| !component.is_empty())
            .fold(self.root.clone(), |path, component| path.join(component))
    }
}

impl AgentTransport for LocalTransport {
    fn copy(&self, local_path: &Path, remote_name: &str) -> Result<()> {
        let destination = self.resolve(remote_name);
        let install_error = |source| AgentError::Install {
            destination: destination.clone(),
            source,
        };

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(install_error)?;
        }
        std::fs::copy(local_path, &destination).map_err(install_error)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&destination, std::fs::Permissions::from_mode(0o755))
                .map_err(install_error)?;
        }

        tracing::info!(
            source = %local_path.display(),
            destination = %destination.display(),
            "Installed agent"
        );
        Ok(())
    }

    fn command(&self, command: &str) -> Result<Command> {
        let mut parts = command.split(' ').filter(|part| !part.is_empty());
        let program = parts.next().ok_or(AgentError::EmptyInvocation)?;

        let mut process = Command::new(self.resolve(program));
        process.args(parts).current_dir(&self.root);
        detach(&mut process);

        tracing::debug!(program, root = %self.root.display(), "Built local agent command");
        Ok(process)
    }

    fn classify_error(&self, exit: &ExitState, error_output: &str) -> Result<Classification> {
        classify_with(LOCAL_RESPONSES, exit, error_output)
    }
}
