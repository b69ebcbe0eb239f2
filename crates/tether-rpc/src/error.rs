// ABOUTME: Error types for the tether-rpc crate.
// ABOUTME: Covers framing, multiplexer lifecycle, method dispatch, and message encoding.

use thiserror::Error;

/// Errors that can occur on a multiplexed RPC connection.
#[derive(Error, Debug)]
pub enum RpcError {
    /// I/O on the underlying byte stream failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent something the framing layer does not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The multiplexed connection is closed.
    #[error("multiplexed connection closed")]
    Closed,

    /// A message exceeds what one frame can carry. The connection stays usable.
    #[error("message of {size} bytes exceeds the {limit} byte frame limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// A logical stream ended before the expected message arrived.
    #[error("stream ended unexpectedly")]
    UnexpectedEnd,

    /// Accepting a new logical stream failed. Ends the serve loop.
    #[error("unable to accept stream: {source}")]
    Accept {
        #[source]
        source: Box<RpcError>,
    },

    /// The server has no handler registered for the method.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// The remote handler reported a failure.
    #[error("remote error: {0}")]
    Remote(String),

    /// A message could not be encoded or decoded.
    #[error("message encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
