//! Debug listener for report datagrams
//!
//! Binds a UDP socket and logs every report the monitor publishes.
//!
//! Usage: `report-listener [bind_addr]` (default `127.0.0.1:6666`)

use tokio::net::UdpSocket;
use tokio::signal;
use tracing::{info, warn};
use wire_monitor::config::LoggingConfig;
use wire_monitor::metrics::ReportRow;
use wire_monitor::observability::init_tracing;

const DEFAULT_ADDR: &str = "127.0.0.1:6666";
const MAX_DATAGRAM: usize = 65_536;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing(&LoggingConfig::default())?;

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let socket = UdpSocket::bind(&addr).await?;
    info!("Report listener bound to {}", socket.local_addr()?);

    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (n, from) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "receive failed");
                        continue;
                    }
                };
                match serde_json::from_slice::<Vec<ReportRow>>(&buf[..n]) {
                    Ok(rows) => {
                        info!(%from, rows = rows.len(), "report received");
                        for row in rows {
                            info!(
                                service = %row.service_id,
                                port = %row.port,
                                kind = %row.message_type,
                                key = %row.key,
                                count = row.count,
                                abnormal = row.abnormal_count,
                                avg_ms = row.average_time,
                                max_ms = row.max_time,
                                cumulative_ms = row.cumulative_time,
                                "row"
                            );
                        }
                    }
                    Err(e) => warn!(%from, bytes = n, error = %e, "not a report"),
                }
            }
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}
