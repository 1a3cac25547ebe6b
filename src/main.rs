use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use courtside::auth::SharedSecretAuth;
use courtside::engine::Engine;
use courtside::jobs;
use courtside::mailer::LogMailer;
use courtside::notify::NotifyHub;
use courtside::tasks::Scheduler;
use courtside::wire;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("COURTSIDE_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    courtside::observability::init(metrics_port);

    let port = std::env::var("COURTSIDE_PORT").unwrap_or_else(|_| "7878".into());
    let bind = std::env::var("COURTSIDE_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("COURTSIDE_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let secret = std::env::var("COURTSIDE_AUTH_SECRET").unwrap_or_else(|_| "courtside".into());
    let admin_email = std::env::var("COURTSIDE_ADMIN_EMAIL").ok();
    let max_connections: usize = std::env::var("COURTSIDE_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(256);
    let compact_threshold: u64 = std::env::var("COURTSIDE_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    let sweep_secs: u64 = std::env::var("COURTSIDE_REMINDER_SWEEP_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(300);

    let tls_cert = std::env::var("COURTSIDE_TLS_CERT").ok();
    let tls_key = std::env::var("COURTSIDE_TLS_KEY").ok();
    let tls_acceptor =
        courtside::tls::load_tls_acceptor(tls_cert.as_deref(), tls_key.as_deref())?;

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let scheduler = Arc::new(Scheduler::new(Arc::new(LogMailer)));
    let wal_path = PathBuf::from(&data_dir).join("courtside.wal");
    let engine = Arc::new(Engine::new(wal_path, notify, scheduler)?);
    let auth = Arc::new(SharedSecretAuth::new(secret));

    if let Some(email) = admin_email {
        let admin = engine.ensure_admin(&email).await?;
        info!("admin account: {} ({})", admin.email, admin.id);
    }

    tokio::spawn(jobs::run_reminder_sweep(
        engine.clone(),
        Duration::from_secs(sweep_secs),
    ));
    tokio::spawn(jobs::run_compactor(engine.clone(), compact_threshold));

    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("courtside listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  max_connections: {max_connections}");
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
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
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(courtside::observability::CONNECTIONS_REJECTED_TOTAL)
                            .increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(courtside::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(courtside::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let auth = auth.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine, auth, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(courtside::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("courtside stopped");
    Ok(())
}
