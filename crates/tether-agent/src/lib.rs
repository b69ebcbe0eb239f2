// ABOUTME: Agent transport layer for tether.
// ABOUTME: Launches the remote agent over a transport, classifies failures, and retries under dialect hypotheses.

pub mod dial;
pub mod error;
pub mod handshake;
pub mod hypothesis;
pub mod process;
pub mod stream;
pub mod transport;

/// Version string exchanged during the agent handshake.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Dialing
pub use dial::{agent_invocation, dial, install_path, AgentMode, DialOptions, AGENT_DIRECTORY};

// Error types
pub use error::AgentError;

// Handshake
pub use handshake::{client_handshake, server_handshake, HANDSHAKE_MAGIC};

// Hypothesis and retry state
pub use hypothesis::{Decision, Dialect, HypothesisState, RetryPolicy, DEFAULT_MAX_ATTEMPTS};

// Failure detection
pub use process::{detect_failure, ExitState, FailureSignal};

// Streams
pub use stream::AgentStream;

// Transports
pub use transport::{
    AgentTransport, Classification, ExecTransport, LocalTransport, Platform, Transport,
    AGENT_BASE_NAME,
};
