//! Axum route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::catalog::Catalog;
use crate::config::SelectorConfig;
use crate::error::{ConfigError, SelectorError, StoreError};
use crate::monitor::TimeRange;
use crate::profile::{TraitSource, UserTrait};
use crate::selector::LayoutSelector;
use crate::store::InMemoryStore;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub selector: Arc<LayoutSelector>,
    /// Local store behind the selector; trait writes go here.
    pub store: Arc<InMemoryStore>,
}

impl AppState {
    pub fn new(selector: Arc<LayoutSelector>, store: Arc<InMemoryStore>) -> Self {
        Self { selector, store }
    }

    /// In-memory store seeded from `catalog`, with a selector wired to it.
    pub fn in_memory(config: SelectorConfig, catalog: &Catalog) -> Result<Self, ConfigError> {
        let store = Arc::new(InMemoryStore::new());
        catalog.load_into(&store);
        let selector = LayoutSelector::with_in_memory_store(config, store.clone())?;
        Ok(Self::new(Arc::new(selector), store))
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/layouts/:user_id/:area", get(layout_handler))
        .route("/hooks/traits/:user_id", post(trait_hook_handler))
        .route("/hooks/features/:user_id", post(feature_hook_handler))
        .route("/hooks/rules", post(rules_hook_handler))
        .route(
            "/users/:user_id/traits/:key",
            put(put_trait_handler).delete(delete_trait_handler),
        )
        .route("/performance", get(performance_handler))
        .route("/cache/stats", get(cache_stats_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(err: &SelectorError) -> (StatusCode, Json<Value>) {
    let (status, body) = match err {
        SelectorError::UnknownArea { .. } => (
            StatusCode::NOT_FOUND,
            json!({"error": err.to_string(), "kind": "configuration", "retryable": false}),
        ),
        SelectorError::DanglingLayout { .. } | SelectorError::Config(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": err.to_string(), "kind": "configuration", "retryable": false}),
        ),
        SelectorError::Store(StoreError::Corrupt { .. }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": err.to_string(), "kind": "store", "retryable": false}),
        ),
        SelectorError::Store(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"error": err.to_string(), "kind": "store", "retryable": true}),
        ),
    };
    (status, Json(body))
}

/// GET /health: liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "adaptive-layout",
    }))
}

#[derive(Debug, Deserialize)]
struct LayoutQuery {
    #[serde(default)]
    force_refresh: bool,
}

/// GET /layouts/:user_id/:area: select a layout.
async fn layout_handler(
    State(state): State<AppState>,
    Path((user_id, area)): Path<(String, String)>,
    Query(query): Query<LayoutQuery>,
) -> ApiResult {
    let payload = state
        .selector
        .select(&user_id, &area, query.force_refresh)
        .await
        .map_err(|e| error_response(&e))?;

    serde_json::to_value(&*payload).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("Failed to serialize payload: {}", e)})),
        )
    })
}

/// POST /hooks/traits/:user_id
async fn trait_hook_handler(State(state): State<AppState>, Path(user_id): Path<String>) -> Json<Value> {
    let invalidated = state.selector.on_trait_changed(&user_id);
    Json(json!({"invalidated": invalidated}))
}

/// POST /hooks/features/:user_id
async fn feature_hook_handler(State(state): State<AppState>, Path(user_id): Path<String>) -> Json<Value> {
    let invalidated = state.selector.on_feature_changed(&user_id);
    Json(json!({"invalidated": invalidated}))
}

/// POST /hooks/rules
async fn rules_hook_handler(State(state): State<AppState>) -> Json<Value> {
    let invalidated = state.selector.on_rule_set_changed();
    Json(json!({"invalidated": invalidated}))
}

#[derive(Debug, Deserialize)]
struct TraitBody {
    value: Value,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    source: TraitSource,
}

/// PUT /users/:user_id/traits/:key: upsert a trait. Invalidates the user's cache.
async fn put_trait_handler(
    State(state): State<AppState>,
    Path((user_id, key)): Path<(String, String)>,
    Json(body): Json<TraitBody>,
) -> ApiResult {
    let mut user_trait = UserTrait::new(user_id, key, body.value).with_source(body.source);
    if let Some(confidence) = body.confidence {
        if !confidence.is_finite() {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "'confidence' must be a finite number"})),
            ));
        }
        user_trait = user_trait.with_confidence(confidence);
    }
    let stored = serde_json::to_value(&user_trait).unwrap_or(Value::Null);
    let previous = state.store.upsert_trait(user_trait);
    Ok(Json(json!({"created": previous.is_none(), "trait": stored})))
}

/// DELETE /users/:user_id/traits/:key
async fn delete_trait_handler(
    State(state): State<AppState>,
    Path((user_id, key)): Path<(String, String)>,
) -> ApiResult {
    match state.store.remove_trait(&user_id, &key) {
        Some(_) => Ok(Json(json!({"removed": true}))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("No trait '{}' for user '{}'", key, user_id)})),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

/// GET /performance: aggregates over the requested window.
async fn performance_handler(State(state): State<AppState>, Query(query): Query<ReportQuery>) -> ApiResult {
    let report = state.selector.performance_report(TimeRange {
        from: query.from,
        to: query.to,
    });
    serde_json::to_value(report).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
    })
}

/// GET /cache/stats
async fn cache_stats_handler(State(state): State<AppState>) -> Json<Value> {
    let stats = state.selector.cache_stats();
    Json(json!({
        "entries": stats.entries,
        "hits": stats.hits,
        "misses": stats.misses,
        "evictions": stats.evictions,
        "invalidations": stats.invalidations,
        "stale_writes": stats.stale_writes,
        "hit_rate": stats.hit_rate(),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
