// ABOUTME: Shared pieces of the tether and tether-agent binaries.
// ABOUTME: Stdio duplex stream for the agent side and output formatting for the CLI.

//! # tether-cli
//!
//! Two binaries share this crate:
//!
//! ```text
//! tether
//! ├── parse <url>                   # Show how a URL is understood
//! └── connect <url>                 # Dial the endpoint and list its entries
//!
//! tether-agent
//! ├── synchronizer                  # Serve the endpoint over stdin/stdout
//! └── version                       # Print the agent version
//! ```

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tether_sync::{Entry, EntryKind};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, Stdin, Stdout};

/// Version of the tether binaries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// This process's stdin and stdout as one duplex stream.
#[derive(Debug)]
pub struct StdioStream {
    stdin: Stdin,
    stdout: Stdout,
}

impl StdioStream {
    pub fn new() -> Self {
        Self {
            stdin: tokio::io::stdin(),
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for StdioStream {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncRead for StdioStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdin).poll_read(cx, buf)
    }
}

impl AsyncWrite for StdioStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stdout).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_shutdown(cx)
    }
}

/// One line per entry: kind marker, size, path.
pub fn format_entry(entry: &Entry) -> String {
    let marker = match entry.kind {
        EntryKind::Directory => 'd',
        EntryKind::Symlink => 'l',
        EntryKind::File if entry.executable => 'x',
        EntryKind::File => '-',
    };
    format!("{marker} {:>10} {}", entry.size, entry.path)
}
