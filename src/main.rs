use clap::{Parser, Subcommand};
use port42d::ai::{AIClient, AnthropicClient};
use port42d::core::DaemonConfig;
use port42d::server::Daemon;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "port42d")]
#[command(about = "port42d - local reality-compiler daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (default)
    Daemon {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on (fallback 4242 applies on permission errors)
        #[arg(long)]
        port: Option<u16>,

        /// Base directory (defaults to ~/.port42)
        #[arg(long)]
        home: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let (host, port, home) = match cli.command {
        Some(Commands::Daemon { host, port, home }) => (host, port, home),
        None => ("127.0.0.1".to_string(), None, None),
    };

    let mut config = match home {
        Some(base) => DaemonConfig::with_base_dir(base),
        None => DaemonConfig::from_env()?,
    };
    config = config.host(&host);
    if let Some(port) = port {
        config = config.port(port);
    }

    let ai: Arc<dyn AIClient> = Arc::new(AnthropicClient::from_env()?);
    let daemon = Daemon::new(config, ai)?;
    daemon.run().await?;

    Ok(())
}
