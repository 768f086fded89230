use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use devbench_core::config::AppConfig;

#[derive(Parser)]
#[command(name = "devbench-core", version, about = "DevBench project server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP + WebSocket server (default)
    Serve {
        /// Port to listen on (overrides config and DEVBENCH_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Path to config.toml
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    devbench_core::util::init_logging();

    let cli = Cli::parse();
    let (port, config_path) = match cli.command {
        Some(Command::Serve { port, config }) => (port, config),
        None => (None, None),
    };

    let mut config = AppConfig::load(config_path.as_deref())?;
    if let Some(port) = port {
        config.server.port = port;
    }

    info!(
        "Starting DevBench core on {} (data dir {})",
        config.bind_addr(),
        config.storage.data_dir().display()
    );

    devbench_core::server::run_server(config).await
}
