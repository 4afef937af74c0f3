use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};

use crate::api::{response::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingRequest {
    pub input: EmbeddingInput,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EmbeddingResponse {
    Single { embedding: Vec<f32> },
    Batch { embeddings: Vec<Vec<f32>> },
}

/// POST /api/embeddings - embed one text or a batch
pub async fn create_embeddings(
    State(state): State<AppState>,
    payload: Result<Json<EmbeddingRequest>, JsonRejection>,
) -> Result<Json<EmbeddingResponse>, ApiError> {
    let Json(request) = payload?;
    let api_key = state
        .config
        .openai
        .api_key
        .as_deref()
        .ok_or_else(|| ApiError::NotConfigured("OpenAI API key not configured".to_string()))?;

    let provider = state.upstream.embeddings(api_key);
    let upstream_error = |err: chatrelay_ai::AiError| ApiError::BadGateway(err.to_string());

    let response = match request.input {
        EmbeddingInput::Single(text) => {
            let embedding = provider.embed(&text).await.map_err(upstream_error)?;
            EmbeddingResponse::Single { embedding }
        }
        EmbeddingInput::Batch(texts) => {
            let embeddings = provider.embed_batch(&texts).await.map_err(upstream_error)?;
            EmbeddingResponse::Batch { embeddings }
        }
    };

    Ok(Json(response))
}
