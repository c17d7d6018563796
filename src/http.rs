//! HTTP surface (spec §6): a human-facing mirror of the MCP tool surface.
//! New module — the teacher has no HTTP server, but `axum`/`tower-http`
//! are already in its dependency table (pulled in for its own unrelated
//! tooling); this wires them into routes the way the pack's axum-based
//! examples shape a small JSON API: `AppState` behind `Arc`, one handler
//! per route, `tower_http::trace::TraceLayer` for request logging.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::embedding::ProviderRegistry;
use crate::storage::Storage;

pub struct AppState {
    pub storage: Storage,
    pub providers: ProviderRegistry,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/search/regex", get(search_regex_query).post(search_regex_body))
        .route("/search/semantic", get(search_semantic_query).post(search_semantic_body))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error, message: message.into() })).into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let connected = state.storage.stats().await.is_ok();
    let status = if connected { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = serde_json::json!({
        "status": if connected { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "database_connected": connected,
        "embedding_providers": state.providers.names(),
    });
    (status, Json(body)).into_response()
}

async fn stats(State(state): State<Arc<AppState>>) -> Response {
    match state.storage.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage", e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct RegexParams {
    pattern: String,
    limit: Option<usize>,
    path_filter: Option<String>,
}

async fn search_regex_query(State(state): State<Arc<AppState>>, Query(params): Query<RegexParams>) -> Response {
    run_regex_search(&state, params).await
}

async fn search_regex_body(State(state): State<Arc<AppState>>, Json(params): Json<RegexParams>) -> Response {
    run_regex_search(&state, params).await
}

async fn run_regex_search(state: &AppState, params: RegexParams) -> Response {
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    match state.storage.regex_search(&params.pattern, limit, params.path_filter.as_deref()).await {
        Ok(hits) => (StatusCode::OK, ndjson_response(&hits)).into_response(),
        Err(e) => match e.kind_tag() {
            "validation" => error_response(StatusCode::UNPROCESSABLE_ENTITY, "validation", e.to_string()),
            _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage", e.to_string()),
        },
    }
}

#[derive(Debug, Deserialize)]
struct SemanticParams {
    query: String,
    limit: Option<usize>,
    provider: Option<String>,
    model: Option<String>,
    threshold: Option<f32>,
}

async fn search_semantic_query(State(state): State<Arc<AppState>>, Query(params): Query<SemanticParams>) -> Response {
    run_semantic_search(&state, params).await
}

async fn search_semantic_body(State(state): State<Arc<AppState>>, Json(params): Json<SemanticParams>) -> Response {
    run_semantic_search(&state, params).await
}

async fn run_semantic_search(state: &AppState, params: SemanticParams) -> Response {
    let limit = params.limit.unwrap_or(10).clamp(1, 100);

    let provider = match state.providers.get(params.provider.as_deref()) {
        Ok(p) => p,
        Err(e) => return error_response(StatusCode::SERVICE_UNAVAILABLE, "configuration", e.to_string()),
    };
    let model = params.model.unwrap_or_else(|| provider.capabilities().model.clone());

    let query_vector = match provider.embed_batch(&[params.query.clone()]).await {
        Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
        Ok(_) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, "embedding", "provider returned no vector"),
        Err(e) => return error_response(StatusCode::SERVICE_UNAVAILABLE, "embedding", e.to_string()),
    };

    match state
        .storage
        .semantic_search(&query_vector, &provider.capabilities().name, &model, limit, params.threshold)
        .await
    {
        Ok(hits) => (StatusCode::OK, ndjson_response(&hits)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage", e.to_string()),
    }
}

/// Content-type `application/x-ndjson`, one compact hit per line, per the
/// MCP surface's same wire format.
fn ndjson_response(hits: &[crate::storage::SearchHit]) -> impl IntoResponse {
    let body = hits.iter().filter_map(|h| serde_json::to_string(h).ok()).collect::<Vec<_>>().join("\n");
    ([(axum::http::header::CONTENT_TYPE, "application/x-ndjson")], body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_params_limit_defaults_and_clamps() {
        let unset: Option<usize> = None;
        assert_eq!(unset.unwrap_or(10).clamp(1, 100), 10);
        let too_big = Some(500usize);
        assert_eq!(too_big.unwrap_or(10).clamp(1, 100), 100);
    }
}
