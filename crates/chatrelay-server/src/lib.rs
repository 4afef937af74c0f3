//! ChatRelay Server - HTTP front of the stream relay
//!
//! Routes:
//! - `POST /api/chat/{provider}` streams a completion as SSE `StreamEvent` frames
//! - `POST /api/send-message` runs one assistant turn without streaming
//! - `GET /api/keys`, `GET /api/models` describe what the server can serve
//! - `POST /api/embeddings` embeds text
//! - `GET /widget-embed.js`, `GET /widget` serve the embeddable widget

pub mod api;
pub mod config;
pub mod middleware;
pub mod relay;
pub mod static_assets;
pub mod upstream;
pub mod widget;

use axum::{
    Router,
    http::{Method, header},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use api::{
    AppState, chat::relay_chat, embeddings::create_embeddings, keys::list_keys,
    models::list_models, send_message::send_message,
};
use middleware::{RateLimiter, rate_limit_middleware};

#[derive(serde::Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> axum::Json<Health> {
    axum::Json(Health {
        status: "chatrelay is working!",
    })
}

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let mut api = Router::new()
        .route("/api/chat/{provider}", post(relay_chat))
        .route("/api/send-message", post(send_message))
        .route("/api/keys", get(list_keys))
        .route("/api/models", get(list_models))
        .route("/api/embeddings", post(create_embeddings));

    if let Some(limiter) = RateLimiter::new(state.config.rate_limit_per_minute) {
        api = api.route_layer(axum::middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));
    }

    Router::new()
        .route("/health", get(health))
        .route("/widget-embed.js", get(static_assets::widget_embed_script))
        .route("/widget", get(widget::widget_page))
        .merge(api)
        .fallback(static_assets::static_handler)
        .layer(cors)
        .with_state(state)
}
