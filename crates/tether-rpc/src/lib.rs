// ABOUTME: Multiplexed RPC substrate for tether.
// ABOUTME: Splits one duplex byte stream into logical streams and dispatches named methods over them.

pub mod client;
pub mod error;
pub mod frame;
pub mod mux;
pub mod server;
pub mod stream;

// Error types
pub use error::{Result, RpcError};

// Framing
pub use frame::{Frame, FrameCodec, FrameKind};

// Multiplexing
pub use mux::{Multiplexer, Role, Substream, DEFAULT_ACCEPT_BACKLOG};

// RPC
pub use client::Client;
pub use server::{MethodHandler, Server};
pub use stream::{MessageStream, Reply};
