// ABOUTME: Exit-state and error-output pattern tables for failed agent launches.
// ABOUTME: Detects POSIX shell and Windows cmd.exe failure signatures, first match wins.

use std::process::ExitStatus;

/// Exit code a POSIX shell uses when a command exists but cannot be executed.
pub const POSIX_INVALID_COMMAND_EXIT_CODE: i32 = 126;

/// Exit code a POSIX shell uses when a command cannot be found.
pub const POSIX_COMMAND_NOT_FOUND_EXIT_CODE: i32 = 127;

/// Fragment of cmd.exe output for an unrecognized command.
pub const WINDOWS_INVALID_COMMAND_FRAGMENT: &str =
    "is not recognized as an internal or external command";

/// Fragment of cmd.exe output for a command path that does not exist.
pub const WINDOWS_COMMAND_NOT_FOUND_FRAGMENT: &str = "The system cannot find the path specified";

/// How a process ended, reduced to what classification needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitState {
    code: Option<i32>,
}

impl ExitState {
    /// An exit with a known code.
    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// An exit whose code is unknown (killed by a signal, or never reaped).
    pub fn unknown() -> Self {
        Self { code: None }
    }

    /// The state a POSIX shell would report for a missing command.
    pub fn command_not_found() -> Self {
        Self::from_code(POSIX_COMMAND_NOT_FOUND_EXIT_CODE)
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }
}

impl From<ExitStatus> for ExitState {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// A recognized failure signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSignal {
    PosixInvalidCommand,
    PosixCommandNotFound,
    WindowsInvalidCommand,
    WindowsCommandNotFound,
}

#[derive(Debug, Clone, Copy)]
enum Matcher {
    ExitCode(i32),
    OutputContains(&'static str),
}

impl Matcher {
    fn matches(&self, exit: &ExitState, output: &str) -> bool {
        match self {
            Matcher::ExitCode(code) => exit.code() == Some(*code),
            Matcher::OutputContains(fragment) => output.contains(fragment),
        }
    }
}

/// Checked in order; the first matching entry decides the signal.
const FAILURE_PATTERNS: &[(FailureSignal, Matcher)] = &[
    (
        FailureSignal::PosixInvalidCommand,
        Matcher::ExitCode(POSIX_INVALID_COMMAND_EXIT_CODE),
    ),
    (
        FailureSignal::PosixCommandNotFound,
        Matcher::ExitCode(POSIX_COMMAND_NOT_FOUND_EXIT_CODE),
    ),
    (
        FailureSignal::WindowsInvalidCommand,
        Matcher::OutputContains(WINDOWS_INVALID_COMMAND_FRAGMENT),
    ),
    (
        FailureSignal::WindowsCommandNotFound,
        Matcher::OutputContains(WINDOWS_COMMAND_NOT_FOUND_FRAGMENT),
    ),
];

/// Detect which known failure signature, if any, a failed launch shows.
pub fn detect_failure(exit: &ExitState, error_output: &str) -> Option<FailureSignal> {
    FAILURE_PATTERNS
        .iter()
        .find(|(_, matcher)| matcher.matches(exit, error_output))
        .map(|(signal, _)| *signal)
}
