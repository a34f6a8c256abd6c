use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::ThrottlerError;
use crate::health::HealthChecker;
use crate::metrics::MetricsCollector;
use crate::registry::LimiterRegistry;
use crate::response::{
    AcquireResponse, ConfigResponse, LimiterListResponse, ReadinessResponse, RefundResponse,
};
use crate::validation::{LimiterSettings, RequestValidator, TokensRequest};

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub registry: LimiterRegistry,
    pub metrics: MetricsCollector,
    pub health: HealthChecker,
}

impl AppState {
    pub fn new(registry: LimiterRegistry) -> Self {
        let health = HealthChecker::new(registry.store().clone());
        Self {
            registry,
            metrics: MetricsCollector::new(),
            health,
        }
    }
}

/// List registered limiters
pub async fn list_limiters(State(state): State<SharedState>) -> impl IntoResponse {
    Json(LimiterListResponse::new(state.registry.namespaces().await))
}

/// Register or replace the limiter for a namespace
pub async fn put_limiter(
    State(state): State<SharedState>,
    Path(namespace): Path<String>,
    Json(settings): Json<LimiterSettings>,
) -> Result<impl IntoResponse, ThrottlerError> {
    let config = RequestValidator::validate_settings(&namespace, settings)?;
    let limiter = state.registry.register(config).await?;
    Ok(Json(ConfigResponse::registered(limiter.config().clone())))
}

/// Snapshot of a limiter's bucket
pub async fn get_limiter(
    State(state): State<SharedState>,
    Path(namespace): Path<String>,
) -> Result<impl IntoResponse, ThrottlerError> {
    let limiter = state.registry.get(&namespace).await?;
    Ok(Json(limiter.snapshot().await))
}

pub async fn delete_limiter(
    State(state): State<SharedState>,
    Path(namespace): Path<String>,
) -> Result<impl IntoResponse, ThrottlerError> {
    let limiter = state.registry.remove(&namespace).await?;
    state.metrics.reset(&namespace).await;
    Ok(Json(ConfigResponse::removed(limiter.config().clone())))
}

/// Reserve tokens, holding the request open until they are available
pub async fn acquire_tokens(
    State(state): State<SharedState>,
    Path(namespace): Path<String>,
    Json(body): Json<TokensRequest>,
) -> Result<impl IntoResponse, ThrottlerError> {
    RequestValidator::validate_tokens_request(&namespace, &body)?;
    let limiter = state.registry.get(&namespace).await?;

    let started = Instant::now();
    let result = limiter.acquire(body.tokens).await;
    state
        .metrics
        .record_acquire(&namespace, body.tokens, result.as_ref().map(|_| ()))
        .await;

    match result {
        Ok(reservation) => {
            let waited = started.elapsed();
            info!(
                namespace = %namespace,
                tokens = body.tokens,
                waited_ms = waited.as_millis() as u64,
                degraded = reservation.degraded,
                "Tokens granted"
            );
            Ok(Json(AcquireResponse::granted(body.tokens, reservation, waited)))
        }
        Err(err) => {
            warn!(namespace = %namespace, tokens = body.tokens, error = %err, "Acquire failed");
            Err(err)
        }
    }
}

/// Return unused tokens to a limiter
pub async fn refund_tokens(
    State(state): State<SharedState>,
    Path(namespace): Path<String>,
    Json(body): Json<TokensRequest>,
) -> Result<impl IntoResponse, ThrottlerError> {
    RequestValidator::validate_tokens_request(&namespace, &body)?;
    let limiter = state.registry.get(&namespace).await?;

    let level = limiter.refund(body.tokens).await?;
    state.metrics.record_refund(&namespace, body.tokens).await;

    Ok(Json(RefundResponse {
        namespace,
        refunded: body.tokens,
        level,
    }))
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.health.check_health().await)
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    let store = state.registry.store().backend_name();
    let limiters = state.registry.namespaces().await.len();
    (StatusCode::OK, Json(ReadinessResponse::ready(store, limiters)))
}

pub async fn metrics_report(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.metrics.report().await)
}
