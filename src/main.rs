use axum::http::HeaderValue;
use gift_fulfillment as app;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::watch};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing::{error, info, warn};

use app::{
    config,
    db,
    events::{self, EventSender, LoggingEventHandler},
    handlers::AppServices,
    message_queue::{InMemoryMessageQueue, MessageQueue},
    rate_limiter::{RateLimitBackend, RateLimitConfig, RateLimiter},
    services::wishlist,
    vendor::{client::HttpVendorClient, FulfillmentVendor},
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration and initialize tracing
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);
    info!(environment = %cfg.environment, "Starting gift fulfillment service");

    let db_pool = db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        info!("Running database migrations");
        db::run_migrations(&db_pool).await?;
    }
    let db_arc = Arc::new(db_pool);

    // Event bus
    let (event_sender, event_rx) = EventSender::channel(cfg.event_channel_capacity);
    tokio::spawn(events::process_events(
        event_rx,
        vec![Arc::new(LoggingEventHandler)],
    ));

    let message_queue: Arc<dyn MessageQueue> =
        Arc::new(InMemoryMessageQueue::with_max_size(cfg.message_queue_capacity));

    let rate_limit_config = RateLimitConfig {
        requests_per_window: cfg.rate_limit_submissions_per_window,
        window_duration: Duration::from_secs(cfg.rate_limit_window_seconds),
    };
    let backend = if cfg.rate_limit_use_redis {
        let client = redis::Client::open(cfg.redis_url.as_str())?;
        RateLimitBackend::Redis {
            client: Arc::new(client),
            namespace: cfg.rate_limit_namespace.clone(),
        }
    } else {
        RateLimitBackend::InMemory
    };
    let rate_limiter = Arc::new(RateLimiter::new(rate_limit_config, backend)?);

    let vendor: Arc<dyn FulfillmentVendor> = Arc::new(HttpVendorClient::from_config(&cfg)?);

    let services = AppServices::new(
        db_arc.clone(),
        &cfg,
        vendor,
        event_sender.clone(),
        message_queue.clone(),
        rate_limiter,
    );

    // Background wishlist worker, stopped on shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(wishlist::run_purchase_check_worker(
        message_queue,
        services.wishlist.clone(),
        Duration::from_millis(cfg.message_queue_poll_interval_ms),
        shutdown_rx,
    ));

    let configured_origins = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        CorsLayer::permissive()
    } else {
        error!("Missing CORS configuration detected; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
        return Err("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true".into());
    };

    let state = AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services,
    };

    let app = app::app_router(state)
        .layer(CompressionLayer::new())
        .layer(cors_layer);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("gift-fulfillment listening on {}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        warn!(error = %e, "Wishlist worker ended abnormally");
    }
    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
