//! codesocket agent entry point.

mod app;
mod config;
mod host;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "codesocket-agent", version, about = "Execute code received over a socket")]
struct Cli {
    /// Configuration file (defaults to the platform config path).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Listen for requests (default).
    Serve {
        /// Override the configured port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Send the self-test request and print the response.
    Test(Target),
    /// Send a file and print the response.
    Send {
        file: PathBuf,

        #[command(flatten)]
        target: Target,
    },
}

#[derive(Debug, Args)]
struct Target {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Override the configured port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = config::Config::load(cli.config.as_deref())?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        kind = %config.transport,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            rt.block_on(app::serve(config))?;
            tracing::info!("agent shut down cleanly");
        }
        Command::Test(target) => {
            let client = config.client_config(&target.host, target.port);
            let response = rt.block_on(app::send(client, None))?;
            println!("{response}");
        }
        Command::Send { file, target } => {
            let client = config.client_config(&target.host, target.port);
            let response = rt.block_on(app::send(client, Some(file)))?;
            println!("{response}");
        }
    }

    Ok(())
}
