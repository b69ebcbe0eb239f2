// ABOUTME: Error types for the tether-agent crate.
// ABOUTME: Covers transport construction, handshake, classification, installation, and retry exhaustion.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reaching an agent.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The transport was asked to run something other than the agent.
    #[error("transport does not support this command")]
    UnsupportedCommand,

    /// The stored exec command does not contain a recognizable kubectl invocation.
    #[error("unable to identify kubectl invocation")]
    UnidentifiedInvocation,

    /// The agent invocation was empty after splitting.
    #[error("empty agent invocation")]
    EmptyInvocation,

    /// The agent process could not be started.
    #[error("unable to start agent process {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The agent did not complete the handshake.
    #[error("unable to handshake with agent process: {0}")]
    Handshake(String),

    /// The agent answered with a different version.
    #[error("agent version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    /// A failed launch did not match any known failure pattern.
    #[error("unknown error condition encountered")]
    UnknownErrorCondition,

    /// Installation was requested but no local agent binary is configured.
    #[error("no local agent binary available for installation")]
    NoAgentBinary,

    /// Installing the agent binary failed.
    #[error("unable to install agent to {destination}: {source}")]
    Install {
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The retry budget ran out while the failure was still retryable.
    #[error("agent dialing failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<AgentError>,
    },

    /// I/O error on the agent stream.
    #[error("agent I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using AgentError.
pub type Result<T> = std::result::Result<T, AgentError>;
