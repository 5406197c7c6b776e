//! Giftpool Backend Service
//!
//! Main entry point for the giftpool backend.
//! This service provides:
//! - Group-gift funding and suggestion services over a row store
//! - WebSocket server for real-time updates

use giftpool_backend::auth::{AnonymousOnly, DevIdentityProvider, IdentityProvider};
use giftpool_backend::config::{AppConfig, StoreBackend};
use giftpool_backend::database::{create_pool, run_migrations};
use giftpool_backend::repositories::{MemoryStore, Repositories};
use giftpool_backend::services::AuditTrailService;
use giftpool_backend::websocket::WebSocketServer;
use giftpool_backend::{AppError, AppResult, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("giftpool_backend={},sqlx=warn", config.log_level).into()
    });

    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_store(config: &AppConfig) -> AppResult<Repositories> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on shutdown");
            Ok(Repositories::in_memory(Arc::new(MemoryStore::new())))
        }
        StoreBackend::Postgres => {
            let db_config = config
                .database
                .as_ref()
                .ok_or_else(|| AppError::Config("DATABASE_URL is required for postgres".into()))?;

            info!("Connecting to database...");
            let pool = create_pool(db_config).await.map_err(|e| {
                error!("Failed to create database pool: {}", e);
                AppError::Database(e)
            })?;
            info!("Max connections: {}", db_config.max_connections);

            info!("Running database migrations...");
            run_migrations(&pool, None).await.map_err(|e| {
                error!("Database migration failed: {}", e);
                AppError::Database(e)
            })?;
            info!("Database migrations completed successfully");

            Ok(Repositories::postgres(pool))
        }
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load environment variables first
    dotenv::dotenv().ok();

    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        AppError::Config(e)
    })?;

    init_tracing(&config);

    info!("Giftpool backend starting");
    info!("Environment: {}", config.environment);
    info!("Log level: {}", config.log_level);
    info!("Store backend: {}", config.store_backend.as_str());
    info!(
        "Group gift suggestion threshold: {}",
        config.policy.conversion_threshold
    );

    // =========================================================================
    // STORE & SERVICES
    // =========================================================================
    let repos = open_store(&config).await?;

    let audit = match &config.audit_log_dir {
        Some(dir) => match AuditTrailService::new(dir.clone()) {
            Ok(audit) => Some(Arc::new(audit)),
            Err(e) => {
                warn!("Audit trail disabled: {}", e);
                None
            }
        },
        None => None,
    };

    let state = AppState::new(repos, &config.policy, audit);
    info!("✓ Services initialized");

    let identity: Arc<dyn IdentityProvider> = if config.is_development() {
        warn!("Development identity provider: tokens are user ids");
        Arc::new(DevIdentityProvider::new(state.repos.users.clone()))
    } else {
        Arc::new(AnonymousOnly)
    };

    // =========================================================================
    // WEBSOCKET SERVER
    // =========================================================================
    let ws_handle = if let Some(http_port) = config.http_port {
        let ws_addr: SocketAddr = format!("0.0.0.0:{}", http_port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid WebSocket address: {}", e)))?;

        let listener = TcpListener::bind(ws_addr).await.map_err(|e| {
            AppError::Message(format!("Failed to bind WebSocket server: {}", e))
        })?;

        let server = Arc::new(WebSocketServer::new(
            state.feed.clone(),
            state.projector.clone(),
            identity,
        ));
        info!("✓ WebSocket server started on {}", ws_addr);
        Some(tokio::spawn(server.run(listener)))
    } else {
        warn!("HTTP_PORT not configured - WebSocket server not started");
        None
    };

    info!("Press Ctrl+C to shutdown gracefully");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, shutting down gracefully...");
        }
        _ = async {
            if let Some(handle) = ws_handle {
                handle.await.ok();
            } else {
                // Never completes if WebSocket is not running
                futures::future::pending::<()>().await;
            }
        } => {
            error!("WebSocket server exited unexpectedly");
        }
    }

    info!("Giftpool backend shutdown complete");
    Ok(())
}
