// ABOUTME: Shared logging setup for the tether and tether-agent binaries
// ABOUTME: Both write to stderr; stdout carries command output or the agent protocol

use std::io::Stderr;

use tracing::Level;
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::EnvFilter;

type StderrSubscriber = SubscriberBuilder<DefaultFields, Format, EnvFilter, fn() -> Stderr>;

/// Standard logging for the control-side CLI. Default: INFO level, RUST_LOG override.
///
/// Goes to stderr so it never interleaves with what a command prints.
pub fn init() {
    stderr_subscriber(Level::INFO).init();
}

/// Logging to stderr only, at the given default level, without colors.
///
/// The agent speaks its wire protocol on stdout, so nothing else may be
/// written there. Stderr output is what the dialer captures to classify a
/// failed launch.
pub fn init_stderr(level: Level) {
    stderr_subscriber(level).with_ansi(false).init();
}

fn stderr_subscriber(level: Level) -> StderrSubscriber {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr as fn() -> Stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
}

#[cfg(test)]
mod tests {
    #[test]
    fn exports_init() {
        let _ = super::init as fn();
    }

    #[test]
    fn exports_init_stderr() {
        let _ = super::init_stderr as fn(tracing::Level);
    }
}
