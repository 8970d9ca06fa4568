//! admind daemon entry point

use std::sync::Arc;

use admind_server::authorize::PeerCredGate;
use admind_server::broadcast::{BroadcastLayer, LogBroadcaster};
use admind_server::config::AppConfig;
use admind_server::Daemon;
use admind_utils::{init_logging_with_tap, LogConfig};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("admind: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> admind_utils::Result<()> {
    let config = AppConfig::load()?;

    // The broadcaster taps the global subscriber so streaming clients see
    // the same log stream the daemon writes to disk
    let broadcaster = Arc::new(LogBroadcaster::new(config.subscriber_queue_capacity));

    let mut log_config = LogConfig::server();
    if std::env::var("ADMIND_LOG").is_err() {
        log_config.filter = config.log_filter.clone();
    }
    init_logging_with_tap(
        log_config,
        Box::new(BroadcastLayer::new(Arc::clone(&broadcaster))),
    )?;

    tracing::info!("admind {} starting", env!("CARGO_PKG_VERSION"));

    let daemon = Daemon::bind(&config, Arc::new(PeerCredGate::new()), broadcaster)?;
    daemon.run().await
}
