use std::sync::Arc;

use clap::Parser;
use inkwell_core::config::StoreBackend;
use inkwell_core::{CompletionClient, InkwellConfig, MemoryStore, OpenAiClient, PgStore, TranscriptStore};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use inkwell_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "inkwell.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match InkwellConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG overrides the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    // Open the transcript store
    let store: Arc<dyn TranscriptStore> = match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory transcript store; sessions are lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres => match PgStore::connect(&config.store).await {
            Ok(s) => Arc::new(s),
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        },
    };

    if args.health {
        match store.health().await {
            Ok(v) => println!("✅ Store ({}) reachable: {}", store.name(), v),
            Err(e) => {
                println!("❌ Store ({}) check failed: {}", store.name(), e);
                std::process::exit(1);
            }
        }
        println!("✅ Inkwell health check passed");
        return Ok(());
    }

    // Completion client
    let client: Arc<dyn CompletionClient> = match OpenAiClient::new(config.completion.clone()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Failed to create completion client: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        model = %config.completion.model,
        store = store.name(),
        "Completion client ready"
    );

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let state = Arc::new(HttpState::new(store, client, config.story.clone()));
    http::start_http_server(state, &config.http, tx.subscribe()).await?;

    Ok(())
}
