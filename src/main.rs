//! Car wash marketplace server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;

use mwg_server::config::{Config, StorageBackend};
use mwg_server::db;
use mwg_server::middleware::RateLimiter;
use mwg_server::notify::{ExpoPushSender, PushSender, EXPO_PUSH_URL};
use mwg_server::state::AppState;
use mwg_server::store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        port = config.port,
        "Starting server"
    );

    let (store, db_pool): (Arc<dyn Store>, _) = match config.storage_backend {
        StorageBackend::Postgres => {
            let pool = db::create_pool(&config).await?;
            db::run_migrations(&pool).await?;
            tracing::info!("Database connected successfully");
            (Arc::new(PgStore::new(pool.clone())), Some(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            (Arc::new(MemoryStore::new()), None)
        }
    };

    let push_url = config
        .push_api_url
        .clone()
        .unwrap_or_else(|| EXPO_PUSH_URL.to_string());
    let push: Arc<dyn PushSender> = Arc::new(ExpoPushSender::new(push_url));

    let rate_limiter = RateLimiter::new(config.rate_limit_rps);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(config, store, db_pool, push);

    let limiters = [
        rate_limiter.clone(),
        state.booking_service.otp_limiter().clone(),
    ];
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            for limiter in &limiters {
                limiter.cleanup(Duration::from_secs(600)).await;
            }
        }
    });

    let app = mwg_server::create_router(state, rate_limiter);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Partner channel at ws://{}/ws/partner", addr);
    tracing::info!("Customer channel at ws://{}/ws/customer", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
