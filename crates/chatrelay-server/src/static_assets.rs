use axum::{
    body::Body,
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use rust_embed::RustEmbed;

use crate::api::ApiError;

#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/assets/"]
#[include = "*.js"]
#[include = "*.html"]
pub struct Assets;

/// Embedded asset as UTF-8 text.
pub fn asset_text(path: &str) -> Option<String> {
    let file = Assets::get(path)?;
    String::from_utf8(file.data.into_owned()).ok()
}

fn asset_response(path: &str) -> Option<Response> {
    let content = Assets::get(path)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(header::CACHE_CONTROL, "public, max-age=300")
        .body(Body::from(content.data.into_owned()))
        .ok()
}

/// GET /widget-embed.js
pub async fn widget_embed_script() -> Response {
    asset_response("widget-embed.js").unwrap_or_else(|| not_found("widget-embed.js"))
}

pub async fn static_handler(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    not_found(path)
}

fn not_found(path: &str) -> Response {
    ApiError::NotFound(format!("Not found: /{}", path)).into_response()
}
