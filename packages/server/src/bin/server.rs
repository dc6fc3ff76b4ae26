//! Presence server.
//!
//! Tracks connection lifecycles over WebSocket and serves presence state,
//! statistics and quality scores over HTTP.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin kehai-server
//! cargo run --bin kehai-server -- --host 0.0.0.0 --port 3000 --config presence.toml
//! ```

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use kehai_server::{
    config::PresenceConfig,
    domain::Alerter,
    infrastructure::{
        alerter::{LogAlerter, WebhookAlerter},
        repository::{InMemoryConnectionRecordRepository, InMemoryUserDirectory},
        scheduler::TokioScheduler,
    },
    ui::Server,
    usecase::PresenceCoordinator,
};
use kehai_shared::{
    logger::setup_logger,
    time::{Clock, SystemClock},
};

#[derive(Parser, Debug)]
#[command(name = "kehai-server")]
#[command(about = "Presence server with grace-period reconnection and quality analytics", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Path to a TOML file with presence settings (grace periods, thresholds)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Webhook URL that receives alerts for failures in critical contexts
    #[arg(long)]
    alert_webhook: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    // Initialize dependencies in order:
    // 1. Config
    // 2. Repository / UserDirectory
    // 3. Scheduler / Alerter
    // 4. Coordinator
    // 5. Server

    // 1. Load presence config
    let config = match &args.config {
        Some(path) => match PresenceConfig::load(path) {
            Ok(config) => {
                tracing::info!("Loaded presence config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::error!("Config error: {}", e);
                std::process::exit(1);
            }
        },
        None => PresenceConfig::default(),
    };

    // 2. Create Repository (in-memory database) and the identity store
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let repository = Arc::new(InMemoryConnectionRecordRepository::new());
    // every user id is accepted until an identity store is wired in
    let users = Arc::new(InMemoryUserDirectory::permissive());

    // 3. Create Scheduler and Alerter
    let scheduler = Arc::new(TokioScheduler::new(clock.clone()));
    let alerter: Arc<dyn Alerter> = match args.alert_webhook {
        Some(url) => {
            tracing::info!("Alerts for critical contexts go to {}", url);
            Arc::new(WebhookAlerter::new(url))
        }
        None => Arc::new(LogAlerter),
    };

    // 4. Create the coordinator
    let coordinator = Arc::new(PresenceCoordinator::with_collaborators(
        repository, users, scheduler, alerter, config, clock,
    ));

    // 5. Create and run the server
    let server = Server::new(coordinator);
    if let Err(e) = server.run(args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
