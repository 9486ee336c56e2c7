use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crowdtask_backend::api::{self, AppState};
use crowdtask_backend::config::Config;
use crowdtask_backend::services::contributions_guard::ContributionsGuard;
use crowdtask_backend::services::stamp_store::{MemoryStampStore, RedisStampStore, StampStore};
use crowdtask_backend::storage;
use crowdtask_backend::store::memory::MemoryDatastore;
use crowdtask_backend::store::postgres::PgDatastore;
use crowdtask_backend::store::Datastore;

#[derive(Debug, Parser)]
#[command(name = "crowdtask", version, about = "Crowdsourcing task backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve {
        /// Overrides BIND_ADDRESS
        #[arg(long, env = "BIND_ADDRESS")]
        bind: Option<String>,
    },
    /// Build every export archive of a project and exit
    Pregenerate {
        /// Project short name
        #[arg(long)]
        project: String,
    },
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let store: Arc<dyn Datastore> = match &config.database_url {
        Some(url) => Arc::new(
            PgDatastore::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?,
        ),
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory datastore");
            Arc::new(MemoryDatastore::new())
        }
    };

    let stamps: Arc<dyn StampStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisStampStore::connect(url)
                .await
                .context("Failed to connect to Redis")?,
        ),
        None => {
            tracing::warn!("REDIS_URL not set, task stamps are kept in memory");
            Arc::new(MemoryStampStore::new())
        }
    };
    let guard = ContributionsGuard::new(stamps, config.stamp_ttl);

    let storage = storage::from_config(&config).context("Failed to initialize storage")?;
    Ok(AppState::new(config, store, guard, storage))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Invalid configuration")?;
    init_tracing(config.log_json);

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => {
            let bind_address = bind.unwrap_or_else(|| config.bind_address.clone());
            let addr: SocketAddr = bind_address
                .parse()
                .with_context(|| format!("Invalid bind address '{}'", bind_address))?;

            let state = Arc::new(build_state(config).await?);
            state.start_background_tasks();
            tracing::info!(
                %addr,
                storage = state.storage.backend_name(),
                stamps = state.guard.backend_name(),
                "Starting crowdtask {}",
                env!("CARGO_PKG_VERSION")
            );

            let app = api::router(state);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        }
        Command::Pregenerate { project } => {
            let state = build_state(config).await?;
            let project = state
                .store
                .get_project_by_short_name(&project)
                .await?
                .with_context(|| format!("Project '{}' not found", project))?;
            let result = state.exporter.pregenerate_zip_files(&project).await?;
            for archive in &result.archives {
                tracing::info!(location = %result.location, "Generated {}", archive);
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
