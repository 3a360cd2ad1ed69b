use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use rackd::observability;
use rackd::property::PropertyManager;
use rackd::wire;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Server settings, all from `RACKD_*` environment variables.
struct Settings {
    bind: String,
    port: u16,
    data_dir: PathBuf,
    password: String,
    max_connections: usize,
    compact_threshold: u64,
    metrics_port: Option<u16>,
    tls_cert: Option<String>,
    tls_key: Option<String>,
}

impl Settings {
    fn from_env() -> Self {
        Self {
            bind: env_or("RACKD_BIND", "0.0.0.0".to_string()),
            port: env_or("RACKD_PORT", 5433),
            data_dir: env_or("RACKD_DATA_DIR", PathBuf::from("./data")),
            password: env_or("RACKD_PASSWORD", "rackd".to_string()),
            max_connections: env_or("RACKD_MAX_CONNECTIONS", 256),
            compact_threshold: env_or("RACKD_COMPACT_THRESHOLD", 1000),
            metrics_port: std::env::var("RACKD_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            tls_cert: std::env::var("RACKD_TLS_CERT").ok(),
            tls_key: std::env::var("RACKD_TLS_KEY").ok(),
        }
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                r = tokio::signal::ctrl_c() => r,
                _ = sigterm.recv() => Ok(()),
            },
            Err(e) => {
                warn!("cannot listen for SIGTERM, ctrl-c only: {e}");
                tokio::signal::ctrl_c().await
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Wait until every connection permit is back, or the timeout passes.
async fn drain_connections(semaphore: &Semaphore, max_connections: usize) {
    let deadline = tokio::time::sleep(DRAIN_TIMEOUT);
    tokio::pin!(deadline);
    while semaphore.available_permits() < max_connections {
        tokio::select! {
            _ = &mut deadline => {
                let open = max_connections - semaphore.available_permits();
                warn!("drain timeout, {open} connections still open");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
    info!("all connections drained");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env();
    observability::init(settings.metrics_port)?;
    let tls_acceptor =
        rackd::tls::load_tls_acceptor(settings.tls_cert.as_deref(), settings.tls_key.as_deref())?;

    std::fs::create_dir_all(&settings.data_dir)?;
    let properties = Arc::new(PropertyManager::new(
        settings.data_dir.clone(),
        settings.compact_threshold,
    ));
    let semaphore = Arc::new(Semaphore::new(settings.max_connections));

    let addr = format!("{}:{}", settings.bind, settings.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("rackd listening on {addr}");
    info!("  data_dir: {}", settings.data_dir.display());
    info!("  max_connections: {}", settings.max_connections);
    info!("  compact_threshold: {}", settings.compact_threshold);
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });

    // Stop accepting on shutdown, then let in-flight connections finish.
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    warn!("connection limit reached, rejecting {peer}");
                    metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                    continue;
                };

                info!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let properties = properties.clone();
                let password = settings.password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = wire::process_connection(socket, properties, password, tls).await {
                        error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    error!("signal handler failed: {e}");
                }
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    drain_connections(&semaphore, settings.max_connections).await;
    info!("rackd stopped ({} properties open)", properties.property_count());
    Ok(())
}
