// ABOUTME: Error types for the tether-sync crate.
// ABOUTME: Separates connect-time failures from endpoint serving and synchronizer failures.

use std::path::PathBuf;

use tether_agent::AgentError;
use tether_rpc::RpcError;
use tether_url::Protocol;
use thiserror::Error;

/// Errors from connecting to an endpoint.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The URL carries input its protocol does not accept.
    #[error("{0}")]
    UnsupportedInput(String),

    /// No handler is registered for the URL's protocol.
    #[error("no protocol handler registered for {0} URLs")]
    UnsupportedProtocol(Protocol),

    /// The caller cancelled the connect before dialing finished.
    #[error("connect operation cancelled")]
    Cancelled,

    /// Dialing the agent failed.
    #[error("unable to dial agent endpoint: {0}")]
    Dial(#[source] AgentError),

    /// The dialing task ended without delivering a result.
    #[error("agent dialing task ended without a result")]
    DialAbandoned,

    /// The endpoint could not be set up over the dialed stream.
    #[error("unable to create endpoint: {0}")]
    Endpoint(#[source] EndpointError),
}

/// Errors from serving or driving an endpoint.
#[derive(Error, Debug)]
pub enum EndpointError {
    /// A method other than Initialize arrived first.
    #[error("endpoint not initialized")]
    NotInitialized,

    /// Initialize arrived twice.
    #[error("endpoint already initialized")]
    AlreadyInitialized,

    /// A path from the peer escapes the synchronization root.
    #[error("invalid synchronization path: {0:?}")]
    InvalidPath(String),

    /// A scan found more entries than the configuration allows.
    #[error("scan exceeded maximum entry count ({limit})")]
    TooManyEntries { limit: u64 },

    /// Filesystem access under the root failed.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The synchronizer backend failed for another reason.
    #[error("synchronizer error: {0}")]
    Backend(String),

    /// An RPC call to or from the peer failed.
    #[error("endpoint RPC failed: {0}")]
    Rpc(#[from] RpcError),

    /// The serve loop ended. This is how serving normally finishes.
    #[error("error serving RPC requests: {source}")]
    Serve {
        #[source]
        source: RpcError,
    },
}

impl EndpointError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias using EndpointError.
pub type Result<T> = std::result::Result<T, EndpointError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_connect_error_display() {
        assert_eq!(
            ConnectError::Cancelled.to_string(),
            "connect operation cancelled"
        );
        assert_eq!(
            ConnectError::UnsupportedInput("exec URL contains environment variables".to_string())
                .to_string(),
            "exec URL contains environment variables"
        );
        assert_eq!(
            ConnectError::UnsupportedProtocol(Protocol::Ssh).to_string(),
            "no protocol handler registered for ssh URLs"
        );
    }

    #[test]
    fn test_dial_error_keeps_cause() {
        let err = ConnectError::Dial(AgentError::UnknownErrorCondition);
        assert_eq!(
            err.to_string(),
            "unable to dial agent endpoint: unknown error condition encountered"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_serve_error_wraps_accept_failure() {
        let err = EndpointError::Serve {
            source: RpcError::Accept {
                source: Box::new(RpcError::Closed),
            },
        };
        assert_eq!(
            err.to_string(),
            "error serving RPC requests: unable to accept stream: multiplexed connection closed"
        );
    }
}
