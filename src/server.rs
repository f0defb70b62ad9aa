use crate::config::Config;
use crate::error::Result;
use crate::handlers::{
    get_availability, health_check, redeem_token, scan, set_availability, AppState, SharedState,
};
use crate::middleware::logging_middleware;
use crate::scheduler::AvailabilityScheduler;
use crate::store::{MemoryStore, Store};
use axum::routing::{get, post, put};
use axum::{middleware, Router};
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the router over an already wired application state.
pub fn create_app(state: SharedState) -> Router {
    Router::new()
        // Redemption and scanning
        .route("/tokens/:id/redeem", post(redeem_token))
        .route("/scan", post(scan))
        // Availability window
        .route("/availability", get(get_availability))
        .route("/availability", put(set_availability))
        // Health endpoint
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    state: SharedState,
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let state = Arc::new(AppState::new(config.clone(), store)?);
        Ok(Self { state, config })
    }

    pub async fn run(self) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let scheduler = AvailabilityScheduler::new(
            self.state.store.clone(),
            self.config.venue_timezone,
            self.config.open_time,
            self.config.close_time,
            self.config.scheduler_tick_secs,
        );
        tokio::spawn(scheduler.run());

        let app = create_app(self.state);
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!("prizegate server starting on {}", self.config.bind_addr);
        tracing::info!(
            "Availability window {} - {} ({})",
            self.config.open_time,
            self.config.close_time,
            self.config.venue_timezone
        );

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
