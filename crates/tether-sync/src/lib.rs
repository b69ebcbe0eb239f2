// ABOUTME: Synchronization endpoints for tether.
// ABOUTME: Serves the endpoint methods over agent streams and connects URLs through protocol handlers.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod exec;
pub mod local;
pub mod messages;
pub mod protocol;
pub mod remote;
pub mod session;
pub mod synchronizer;

// Configuration
pub use config::{Config, DialConfig};

// Endpoint service
pub use endpoint::{serve_endpoint, ENDPOINT_ACCEPT_BACKLOG};
pub use remote::RemoteEndpoint;

// Error types
pub use error::{ConnectError, EndpointError};

// Protocol handlers
pub use exec::{dial_cancellable, Closable, ExecProtocolHandler};
pub use local::LocalProtocolHandler;
pub use protocol::{ProtocolHandler, ProtocolRegistry, SessionParameters};

// Session types and messages
pub use messages::{Change, Entry, EntryKind, FileContents, InitializeRequest};
pub use session::{Configuration, ScanMode, Version};

// Backends
pub use synchronizer::{filesystem_factory, FilesystemSynchronizer, Synchronizer, SynchronizerFactory};
