use axum::{
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use service::storage::ChunkStore;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use common::types::Health;

pub mod files;
pub mod range;

pub use files::ServerState;

pub async fn health() -> Json<Health> {
    Json(Health::ok())
}

/// Prometheus text exposition of the default registry.
pub async fn metrics() -> (StatusCode, String) {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics encode error: {e}"));
    }
    (StatusCode::OK, String::from_utf8(buffer).unwrap_or_default())
}

/// Build the full application router over any chunk store.
pub fn build_router<S: ChunkStore>(state: ServerState<S>, cors: CorsLayer) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics));

    let file_routes = Router::new()
        .route("/files", post(files::upload::<S>))
        .route("/files/:id", get(files::download::<S>).delete(files::delete::<S>))
        .route("/files/:id/info", get(files::info::<S>))
        .route("/files/:id/metadata", put(files::set_metadata::<S>))
        .with_state(state);

    public
        .merge(file_routes)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO).include_headers(false))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}
