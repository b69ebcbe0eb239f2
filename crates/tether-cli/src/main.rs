// ABOUTME: Entry point for the tether control CLI.
// ABOUTME: Parses endpoint URLs and connects to endpoints through the protocol registry.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tether_cli::format_entry;
use tether_sync::{Config, ProtocolRegistry, ScanMode, SessionParameters};
use tether_url::{Kind, Url};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Reach synchronization endpoints through local paths or wrapper commands")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how a URL is understood
    Parse {
        /// Endpoint URL, e.g. exec:"kubectl exec -i pod --":/data
        url: String,

        /// Session kind the URL is used for
        #[arg(long, value_enum, default_value_t = KindArg::Synchronization)]
        kind: KindArg,
    },

    /// Dial an endpoint and list its entries
    Connect {
        /// Endpoint URL
        url: String,

        /// Session identifier (random when omitted)
        #[arg(long)]
        session: Option<String>,

        /// Identifier of the prompter that answers interactive questions
        #[arg(long, default_value = "")]
        prompter: String,

        /// Treat the endpoint as the alpha side of the session
        #[arg(long)]
        alpha: bool,

        /// Force a full scan
        #[arg(long)]
        full: bool,

        /// Override the configured scan mode
        #[arg(long)]
        scan_mode: Option<ScanMode>,

        /// Extra ignore pattern (repeatable)
        #[arg(long = "ignore")]
        ignores: Vec<String>,

        /// Config file path
        #[arg(long, env = "TETHER_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Write the default config file
    Init {
        /// Config file path
        #[arg(long, env = "TETHER_CONFIG")]
        config: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Synchronization,
    Forwarding,
}

impl From<KindArg> for Kind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Synchronization => Kind::Synchronization,
            KindArg::Forwarding => Kind::Forwarding,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tether_log::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { url, kind } => {
            let url = Url::parse(&url, kind.into())?;
            println!("{}", serde_json::to_string_pretty(&url)?);
        }
        Commands::Connect {
            url,
            session,
            prompter,
            alpha,
            full,
            scan_mode,
            ignores,
            config,
        } => {
            let path = config.unwrap_or_else(Config::default_path);
            let config = Config::load_or_default(&path)?;

            let mut configuration = config.synchronization.clone();
            if let Some(mode) = scan_mode {
                configuration.scan_mode = mode;
            }
            configuration.ignores.extend(ignores);

            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let parameters = SessionParameters::new(session)
                .with_configuration(configuration)
                .with_alpha(alpha);

            let url = Url::parse(&url, Kind::Synchronization)?;
            let registry = ProtocolRegistry::with_defaults(config.dial_options());

            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupted, cancelling connect");
                    interrupt.cancel();
                }
            });

            let endpoint = registry
                .connect(&cancel, &url, &prompter, &parameters)
                .await
                .with_context(|| format!("failed to connect to {url}"))?;

            let scanned = endpoint.scan(full).await;
            endpoint.shutdown().await?;

            let entries = scanned.context("scan failed")?;
            for entry in &entries {
                println!("{}", format_entry(entry));
            }
            tracing::info!(count = entries.len(), "Scan complete");
        }
        Commands::Init { config, force } => {
            let path = config.unwrap_or_else(Config::default_path);
            if path.exists() && !force {
                anyhow::bail!(
                    "config already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save(&path)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}
