use crate::config::Config;
use crate::error::{Result, ThrottlerError};
use crate::handlers::{
    acquire_tokens, delete_limiter, get_limiter, health_check, list_limiters, metrics_report,
    put_limiter, readiness_check, refund_tokens, AppState, SharedState,
};
use crate::middleware::logging_middleware;
use crate::registry::LimiterRegistry;
use crate::store::{KeyValueStore, MemoryStore, RedisStore};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Build the limiter service router around shared state.
pub fn create_app(state: SharedState) -> Router {
    Router::new()
        .route("/limiters", get(list_limiters))
        .route(
            "/limiters/:namespace",
            get(get_limiter).put(put_limiter).delete(delete_limiter),
        )
        .route("/limiters/:namespace/acquire", post(acquire_tokens))
        .route("/limiters/:namespace/refund", post(refund_tokens))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_report))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    /// Connects the store and registers the start-up limiter.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn KeyValueStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisStore::new(url, config.store_timeout())?),
            None => {
                warn!("REDIS_URL not set, limits are only shared within this process");
                Arc::new(MemoryStore::new())
            }
        };

        if let Err(err) = store.ping().await {
            warn!(error = %err, "Store not reachable at start-up, limiters will run degraded until it is");
        }

        let registry = LimiterRegistry::new(store, config.retry_policy());
        registry.register(config.limiter_config()).await?;

        let state: SharedState = Arc::new(AppState::new(registry));
        Ok(Self {
            app: create_app(state),
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| ThrottlerError::Config(format!("cannot bind {}: {}", self.bind_addr, e)))?;

        info!(bind_addr = %self.bind_addr, "Limiter service listening");

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ThrottlerError::Internal(format!("server error: {}", e)))?;

        info!("Limiter service stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
