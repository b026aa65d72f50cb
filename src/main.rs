use std::sync::Arc;

use herald::{
    context::{AppContext, AppContextBuilder, LogBuffer},
    persistence::SqliteStateRepository,
    relay::{RelaySource, WsRelayClient},
    supervisor::Supervisor,
};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory containing `app.yaml`.
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the tick loop and the HTTP server until interrupted.
    Run,
    /// Runs a single pipeline tick and exits, for external schedulers.
    Tick,
    /// Rebuilds the group and keyword indices from the subscriber records.
    Reindex,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logs = LogBuffer::default();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .with(logs.layer(Level::INFO))
        .try_init()?;

    let cli = Cli::parse();
    let context = AppContextBuilder::new(cli.config_dir).log_buffer(logs).build().await?;

    match cli.command {
        Commands::Run => {
            let supervisor = build_supervisor(context)?;
            tracing::info!("Supervisor initialized, starting relay monitoring...");
            supervisor.run().await?;
        }
        Commands::Tick => {
            let supervisor = build_supervisor(context)?;
            match supervisor.run_once().await? {
                Some(report) => tracing::info!(
                    events = report.events_fetched,
                    enqueued = report.dispatch.enqueued,
                    delivered = report.drain.delivered,
                    "Single tick finished."
                ),
                None => tracing::warn!("Tick skipped."),
            }
        }
        Commands::Reindex => {
            let entries = context.registry.rebuild_indices().await?;
            let counts = context.registry.counts().await?;
            tracing::info!(
                entries,
                subscribers = counts.subscribers,
                groups = counts.groups,
                keywords = counts.keywords,
                "Indices rebuilt."
            );
            context.repo.flush().await?;
            context.repo.close().await;
        }
    }

    Ok(())
}

fn build_supervisor(
    context: AppContext<SqliteStateRepository>,
) -> Result<Supervisor, Box<dyn std::error::Error>> {
    let relay_source: Arc<dyn RelaySource> =
        Arc::new(WsRelayClient::new(context.config.relay_timeout));
    tracing::debug!(relays = ?context.config.relays, "Relay client initialized.");

    Ok(Supervisor::builder().context(context).relay_source(relay_source).build()?)
}
