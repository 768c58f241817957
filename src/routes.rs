use crate::{AppState, handlers};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/memes", get(handlers::list_memes).post(handlers::create_meme))
        .route("/memes/user/{uid}", get(handlers::list_user_memes))
        .route("/memes/{id}", get(handlers::get_meme).delete(handlers::delete_meme))
        .route("/memes/{id}/vote", post(handlers::vote_meme))
        .route("/memes/{id}/comments", post(handlers::comment_meme))
        .route("/admin/stats", get(handlers::admin_stats))
        .route("/admin/memes/{id}", delete(handlers::admin_delete_meme))
}

/// Creates the Axum router with every route under `/api`.
pub fn create_router(state: Arc<AppState>) -> Router {
    let settings = &state.settings;
    let cors = cors_layer(&settings.cors_origins);
    let body_limit = settings.body_limit_bytes;

    Router::new()
        .nest("/api", api_routes())
        // Middleware Layers
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
