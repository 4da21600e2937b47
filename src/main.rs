use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::info;

use swimslot::compactor;
use swimslot::config::Config;
use swimslot::engine::Engine;
use swimslot::{observability, wire};

/// Hand an accepted socket its own task, or drop it when every permit is taken.
fn admit(socket: TcpStream, peer: SocketAddr, semaphore: &Arc<Semaphore>, engine: &Arc<Engine>) {
    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
        tracing::warn!("connection limit reached, rejecting {peer}");
        metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
        return;
    };

    info!("connection from {peer}");
    metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
    metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
    let engine = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = wire::process_connection(socket, engine).await {
            tracing::error!("connection error from {peer}: {e}");
        }
        metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
        drop(permit);
    });
}

/// Wait until every connection permit is back or `deadline` passes.
/// Returns the number of connections still open.
async fn drain_connections(semaphore: &Semaphore, max_connections: usize, deadline: Duration) -> usize {
    info!("draining connections...");
    let open = || max_connections - semaphore.available_permits();
    let waited = tokio::time::timeout(deadline, async {
        let mut tick = tokio::time::interval(Duration::from_millis(100));
        while open() > 0 {
            tick.tick().await;
        }
    })
    .await;
    if waited.is_ok() {
        info!("all connections drained");
    }
    open()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::new(config.wal_path(), config.engine.clone())?);
    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, threshold, Duration::from_secs(30)).await;
    });

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("swimslot listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  slots loaded: {}", engine.slot_count());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((socket, peer)) => admit(socket, peer, &semaphore, &engine),
                Err(e) => tracing::error!("accept error: {e}"),
            },
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    let open = drain_connections(&semaphore, max_connections, Duration::from_secs(10)).await;
    if open > 0 {
        tracing::warn!("drain timeout, {open} connections still open");
    }
    info!(
        slots = engine.slot_count(),
        wal_appends = engine.wal_appends_since_compact().await,
        "engine state at shutdown"
    );
    info!("swimslot stopped");
    Ok(())
}
