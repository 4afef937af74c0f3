use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::cache::EmbeddingCache;
use super::provider::{EmbeddingConfig, EmbeddingProvider};
use crate::error::{AiError, Result};
use crate::http_client::build_http_client;
use crate::llm::{Provider, response_to_error};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

pub struct OpenAIEmbedding {
    client: Client,
    api_key: String,
    base_url: String,
    config: EmbeddingConfig,
    cache: Option<Arc<EmbeddingCache>>,
}

impl OpenAIEmbedding {
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());
        let dimension = match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };

        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            base_url: Provider::OpenAI.base_url().to_string(),
            config: EmbeddingConfig {
                model,
                dimension,
                timeout_secs: 30,
            },
            cache: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    async fn request_embeddings(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = input.len();
        let request = EmbeddingRequest {
            model: &self.config.model,
            input,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_to_error(response, "OpenAI").await);
        }

        let data: EmbeddingResponse = response.json().await?;
        let mut sorted = data.data;
        sorted.sort_by_key(|d| d.index);
        if sorted.len() != expected {
            return Err(AiError::InvalidFormat(format!(
                "expected {} embeddings, got {}",
                expected,
                sorted.len()
            )));
        }
        Ok(sorted.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AiError::InvalidFormat("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.config.model.as_str();

        let mut results: Vec<Option<Vec<f32>>> = match &self.cache {
            Some(cache) => texts.iter().map(|t| cache.get(t, model)).collect(),
            None => vec![None; texts.len()],
        };

        let missing: Vec<usize> = (0..results.len()).filter(|&i| results[i].is_none()).collect();
        if !missing.is_empty() {
            tracing::debug!(model, count = missing.len(), "Requesting embeddings");
            let input = missing.iter().map(|&i| texts[i].clone()).collect();
            let fetched = self.request_embeddings(input).await?;

            for (i, embedding) in missing.into_iter().zip(fetched) {
                if let Some(cache) = &self.cache {
                    cache.put(&texts[i], model, embedding.clone());
                }
                results[i] = Some(embedding);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let provider = OpenAIEmbedding::new("key", None);
        assert_eq!(provider.model_name(), DEFAULT_EMBEDDING_MODEL);
        assert_eq!(provider.dimension(), 1536);
        assert_eq!(
            OpenAIEmbedding::new("key", Some("text-embedding-3-large".to_string())).dimension(),
            3072
        );
    }
}
