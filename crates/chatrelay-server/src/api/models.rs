use axum::{Json, extract::State};
use chatrelay_ai::Provider;
use serde::Serialize;

use crate::api::state::AppState;

/// One entry of the hosted model catalog
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model_id: &'static str,
    pub model_name: &'static str,
    pub provider: Provider,
    pub max_context: u32,
}

const fn model(
    model_id: &'static str,
    model_name: &'static str,
    provider: Provider,
    max_context: u32,
) -> ModelInfo {
    ModelInfo {
        model_id,
        model_name,
        provider,
        max_context,
    }
}

pub const CATALOG: &[ModelInfo] = &[
    model("gpt-4o-mini", "GPT-4o Mini", Provider::OpenAI, 128_000),
    model("gpt-4o", "GPT-4o", Provider::OpenAI, 128_000),
    model("gpt-4-turbo-preview", "GPT-4 Turbo", Provider::OpenAI, 128_000),
    model("gpt-3.5-turbo", "GPT-3.5 Turbo", Provider::OpenAI, 16_385),
    model("llama-3.3-70b-versatile", "Llama 3.3 70B", Provider::Groq, 128_000),
    model("llama-3.1-8b-instant", "Llama 3.1 8B", Provider::Groq, 128_000),
    model("mistral-large-latest", "Mistral Large", Provider::Mistral, 128_000),
    model("mistral-small-latest", "Mistral Small", Provider::Mistral, 32_000),
    model("openai/gpt-4o-mini", "GPT-4o Mini (OpenRouter)", Provider::OpenRouter, 128_000),
    model("meta-llama/llama-3.1-70b-instruct", "Llama 3.1 70B (OpenRouter)", Provider::OpenRouter, 131_072),
];

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

/// GET /api/models - hosted models usable with the server's keys
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let config = &state.config;
    let models = CATALOG
        .iter()
        .filter(|m| config.api_key(m.provider).is_some())
        .filter(|m| config.models.allows(m.provider, m.model_id))
        .cloned()
        .collect();

    Json(ModelsResponse { models })
}
