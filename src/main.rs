use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use call_log_ingest::dedup::DedupGate;
use call_log_ingest::{config, db, http, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!("invalid configuration: {err}");
            return ExitCode::from(1);
        }
    };

    if let Err(unreachable) = startup_healthcheck(&cfg).await {
        tracing::error!("required external endpoint unreachable at startup: {unreachable}");
        return ExitCode::from(3);
    }

    info!("connecting to database...");
    let pool = match db::create_pool(&cfg.database_url).await {
        Ok(pool) => pool,
        Err(err) => {
            tracing::error!("failed to connect to database: {err}");
            return ExitCode::from(1);
        }
    };

    if let Err(err) = db::run_migrations(&pool).await {
        tracing::error!("failed to run database migrations: {err}");
        return ExitCode::from(1);
    }
    info!("migrations applied");

    let bind_addr = cfg.bind_addr.clone();
    let store_write_qps = cfg.store_write_qps;
    let store = Arc::new(call_log_ingest::store::postgres::PgStore::new(pool, store_write_qps));
    let state = AppState::new(cfg, store);
    spawn_dedup_sweeper(state.dedup.clone());
    let router = http::build_router(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("failed to bind {bind_addr}: {err}");
            return ExitCode::from(2);
        }
    };

    info!(addr = %bind_addr, "server listening");
    if let Err(err) = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await {
        tracing::error!("server error: {err}");
        return ExitCode::from(1);
    }
    info!("server shut down gracefully");
    ExitCode::SUCCESS
}

/// Best-effort reachability probe for the outbound endpoints this service
/// depends on. A transport-level failure (DNS,
/// connection refused) fails startup; any HTTP response, even an error
/// status, counts as reachable.
async fn startup_healthcheck(cfg: &config::AppConfig) -> Result<(), String> {
    let client = reqwest::Client::new();

    if cfg.llm_enabled {
        probe(&client, &cfg.llm_endpoint).await?;
    }
    probe(&client, &cfg.mail_endpoint).await
}

async fn probe(client: &reqwest::Client, endpoint: &str) -> Result<(), String> {
    tokio::time::timeout(Duration::from_secs(5), client.head(endpoint).send())
        .await
        .map_err(|_| format!("{endpoint} timed out"))?
        .map(|_| ())
        .map_err(|err| format!("{endpoint} unreachable: {err}"))
}

const DEDUP_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Lazily evicts expired Dedup Gate entries on a fixed interval so the
/// claimed-id map doesn't grow without bound. Runs for the life of the
/// process; not joined on shutdown.
fn spawn_dedup_sweeper(dedup: DedupGate) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DEDUP_SWEEP_INTERVAL);
        interval.tick().await;

        loop {
            interval.tick().await;
            dedup.sweep().await;
        }
    });
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
