//! wire-monitor
//!
//! Reads captured segments as JSON lines on stdin (one `ReplayRecord` per
//! line), decodes and aggregates them, and publishes reports until stdin
//! ends or a termination signal arrives.
//!
//! Usage: `wire-monitor [config.toml]`

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{error, info, warn};
use wire_monitor::capture::ReplaySource;
use wire_monitor::observability::init_tracing;
use wire_monitor::{FeedEnd, Monitor, MonitorConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => MonitorConfig::from_file(&path)?,
        None => MonitorConfig::default(),
    }
    .apply_env();
    config.validate()?;

    init_tracing(&config.logging)?;
    info!(
        service_id = %config.service_id,
        ports = ?config.ports.iter().map(|p| p.port).collect::<Vec<_>>(),
        report_addr = %config.report.addr,
        statsd_addr = %config.statsd.addr,
        "wire-monitor starting"
    );

    let monitor = Monitor::from_config(config)?;
    monitor.start()?;

    let mut source = ReplaySource::new(BufReader::new(tokio::io::stdin()));
    let stop = async {
        tokio::select! {
            _ = signal::ctrl_c() => info!("Shutdown signal received"),
            _ = terminate() => info!("Terminate signal received"),
        }
    };
    match monitor.feed(&mut source, stop).await {
        FeedEnd::InputEnded => info!("capture input ended"),
        FeedEnd::InputFailed => error!("capture input failed, shutting down"),
        FeedEnd::Stopped => {}
    }

    monitor.shutdown().await;
    info!("wire-monitor stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
