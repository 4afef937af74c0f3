//! Embeddable chat widget: sanitized page parameters and the postMessage protocol.

use axum::{
    extract::Query,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::static_assets::asset_text;

pub const DEFAULT_PRIMARY_COLOR: &str = "#2563eb";
pub const DEFAULT_TITLE: &str = "Chat with us!";
pub const DEFAULT_SUBTITLE: &str = "We typically reply in a few minutes.";
const MAX_TEXT_CHARS: usize = 80;
const CONFIG_PLACEHOLDER: &str = "__WIDGET_CONFIG__";

/// Raw `/widget` query string
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetQuery {
    pub assistant_id: Option<String>,
    pub primary_color: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub brand: Option<String>,
}

/// Sanitized widget configuration handed to the page script
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    pub primary_color: String,
    pub title: String,
    pub subtitle: String,
    pub brand: String,
}

fn is_hex_color(value: &str) -> bool {
    let Some(hex) = value.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

fn clean_text(value: Option<String>, max_chars: usize) -> Option<String> {
    let value = value?;
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_control())
        .take(max_chars)
        .collect();
    let cleaned = cleaned.trim().to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

impl WidgetParams {
    pub fn sanitize(query: WidgetQuery) -> Self {
        let primary_color = query
            .primary_color
            .map(|c| c.trim().to_string())
            .filter(|c| is_hex_color(c))
            .unwrap_or_else(|| DEFAULT_PRIMARY_COLOR.to_string());

        let assistant_id = clean_text(query.assistant_id, MAX_TEXT_CHARS).filter(|id| {
            id.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });

        Self {
            assistant_id,
            primary_color,
            title: clean_text(query.title, MAX_TEXT_CHARS)
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            subtitle: clean_text(query.subtitle, MAX_TEXT_CHARS)
                .unwrap_or_else(|| DEFAULT_SUBTITLE.to_string()),
            brand: clean_text(query.brand, MAX_TEXT_CHARS).unwrap_or_default(),
        }
    }

    /// JSON that cannot terminate or escape a `<script>` element.
    pub fn to_script_json(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        json.replace('<', "\\u003c")
            .replace('>', "\\u003e")
            .replace('&', "\\u0026")
            .replace('\u{2028}', "\\u2028")
            .replace('\u{2029}', "\\u2029")
    }
}

/// Messages exchanged between the host page and the widget frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WidgetMessage {
    WidgetResize { width: u32, height: u32 },
    WidgetOpen,
    WidgetClose,
}

pub fn render_widget_page(params: &WidgetParams) -> Option<String> {
    let template = asset_text("widget.html")?;
    Some(template.replace(CONFIG_PLACEHOLDER, &params.to_script_json()))
}

/// GET /widget - the mini chat page loaded inside the embed iframe
pub async fn widget_page(Query(query): Query<WidgetQuery>) -> Response {
    let params = WidgetParams::sanitize(query);
    match render_widget_page(&params) {
        Some(html) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            html,
        )
            .into_response(),
        None => {
            tracing::error!("Widget template missing from embedded assets");
            (StatusCode::INTERNAL_SERVER_ERROR, "Widget unavailable").into_response()
        }
    }
}
