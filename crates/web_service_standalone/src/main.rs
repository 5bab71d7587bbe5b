use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chat_core::OrchestratorConfig;

#[derive(Parser, Debug)]
#[command(name = "chat-orchestrator")]
#[command(about = "Streaming chat orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the orchestrator (default)
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Upstream inference service base URL
        #[arg(short, long)]
        upstream: Option<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true)
                .with_file(false),
        )
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing();

    let mut config = OrchestratorConfig::from_env();
    if let Some(Commands::Serve { port, upstream }) = cli.command {
        if let Some(port) = port {
            config.port = port;
        }
        if let Some(upstream) = upstream {
            config.upstream_base_url = upstream;
        }
    }

    tracing::info!(
        "Starting chat orchestrator on port {} (upstream {})",
        config.port,
        config.upstream_base_url
    );

    if let Err(e) = web_service::server::run(config).await {
        tracing::error!("Failed to run orchestrator: {}", e);
        std::process::exit(1);
    }
}
