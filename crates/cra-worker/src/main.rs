//! Worker binary.
//!
//! `cra-worker <INSTANCE_NAME> <PORT> [IP_ADDRESS]` - serves the
//! control protocol on the given port and registers the instance in
//! the metadata store configured by `cra.toml` or
//! `CRA_STORAGE_CONN_STRING`. When the IP address is absent or the
//! literal string `null`, the host's first non-loopback IPv4 address
//! is used.

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cra_store::{StorageConfig, StorageProvider};
use cra_vertex::global_registry;
use cra_worker::WorkerServer;

/// CRA dataflow worker.
#[derive(Parser, Debug)]
#[command(name = "cra-worker")]
#[command(about = "Host dataflow vertices and serve the control protocol")]
#[command(version)]
struct Cli {
    /// Instance name to register under.
    instance_name: String,

    /// Control port to listen on.
    port: u16,

    /// Routable IPv4 address of this host; auto-detected when absent
    /// or "null".
    ip_address: Option<String>,

    /// Path to configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let address = match cli.ip_address.as_deref() {
        None | Some("null") => detect_ipv4()
            .ok_or_else(|| anyhow::anyhow!("no non-loopback IPv4 address found on this host"))?,
        Some(ip) => ip.to_owned(),
    };

    info!(
        instance = %cli.instance_name,
        address = %address,
        port = cli.port,
        "worker starting"
    );

    let config = StorageConfig::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to load storage configuration: {e}"))?;
    let (tables, artifacts) = StorageProvider::connect(&config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to metadata store: {e}"))?;

    let server = WorkerServer::new(
        &cli.instance_name,
        &address,
        cli.port,
        tables,
        artifacts,
        global_registry().clone(),
    );

    let shutdown = server.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.shutdown();
    });

    if let Err(e) = server.run().await {
        error!(error = %e, "worker failed");
        return Err(e.into());
    }

    info!("worker shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
    }
}

/// First non-loopback IPv4 address of this host.
fn detect_ipv4() -> Option<String> {
    let addrs = nix::ifaddrs::getifaddrs().ok()?;

    for ifaddr in addrs {
        if let Some(storage) = ifaddr.address {
            if let Some(sin) = storage.as_sockaddr_in() {
                let ip = std::net::Ipv4Addr::from(sin.ip());
                if !ip.is_loopback() {
                    return Some(ip.to_string());
                }
            }
        }
    }

    None
}
