// ABOUTME: Agent process launched on the remote side of a tether connection.
// ABOUTME: Greets the dialer on stdout, then serves the endpoint over stdin/stdout.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tether_agent::server_handshake;
use tether_cli::{StdioStream, VERSION};
use tether_sync::{filesystem_factory, serve_endpoint, EndpointError};
use tracing::Level;

#[derive(Parser)]
#[command(name = "tether-agent")]
#[command(about = "Remote endpoint for tether sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve a synchronization endpoint on stdin/stdout
    Synchronizer,

    /// Serve a forwarding endpoint on stdin/stdout
    Forwarder,

    /// Print the agent version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tether_log::init_stderr(Level::WARN);

    let cli = Cli::parse();

    match cli.mode {
        Mode::Synchronizer => {
            let mut stream = StdioStream::new();
            server_handshake(&mut stream).await?;

            match serve_endpoint(stream, filesystem_factory()).await {
                // The peer hanging up is how a session ends.
                EndpointError::Serve { source } => {
                    tracing::debug!(error = %source, "Endpoint connection closed");
                }
                err => return Err(err.into()),
            }
        }
        Mode::Forwarder => {
            anyhow::bail!("forwarding endpoints are not supported by this agent");
        }
        Mode::Version => {
            println!("{VERSION}");
        }
    }

    Ok(())
}
