//! Vector store lookups used to augment prompts.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::http_client::build_http_client;
use crate::llm::{Provider, response_to_error};

/// A retrieved excerpt
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub file_name: String,
    pub text: String,
    pub score: f32,
}

/// Source of knowledge the relay can consult before generating
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Names of the documents behind the knowledge base
    async fn source_names(&self) -> Result<Vec<String>>;

    /// Excerpts relevant to `query`, best first
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

#[derive(Deserialize)]
struct FileList {
    data: Vec<VectorStoreFile>,
}

#[derive(Deserialize)]
struct VectorStoreFile {
    id: String,
}

#[derive(Deserialize)]
struct FileObject {
    filename: String,
}

#[derive(Deserialize)]
struct SearchResults {
    data: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    content: Vec<SearchContent>,
}

#[derive(Deserialize)]
struct SearchContent {
    r#type: String,
    #[serde(default)]
    text: String,
}

/// OpenAI vector store client over a fixed set of stores
#[derive(Clone)]
pub struct VectorStoreClient {
    client: Client,
    api_key: String,
    base_url: String,
    vector_store_ids: Vec<String>,
}

impl VectorStoreClient {
    pub fn new(api_key: impl Into<String>, vector_store_ids: Vec<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            base_url: Provider::OpenAI.base_url().to_string(),
            vector_store_ids,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn vector_store_ids(&self) -> &[String] {
        &self.vector_store_ids
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send(builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(response_to_error(response, "OpenAI").await);
        }
        Ok(response)
    }

    /// File names attached to one vector store.
    pub async fn list_file_names(&self, vector_store_id: &str) -> Result<Vec<String>> {
        let path = format!("/vector_stores/{}/files", vector_store_id);
        let files: FileList = Self::send(self.request(Method::GET, &path))
            .await?
            .json()
            .await?;

        let mut names = Vec::with_capacity(files.data.len());
        for file in files.data {
            let path = format!("/files/{}", file.id);
            let object: FileObject = Self::send(self.request(Method::GET, &path))
                .await?
                .json()
                .await?;
            names.push(object.filename);
        }
        Ok(names)
    }

    /// Semantic search within one vector store.
    pub async fn search_store(
        &self,
        vector_store_id: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>> {
        let path = format!("/vector_stores/{}/search", vector_store_id);
        let results: SearchResults = Self::send(
            self.request(Method::POST, &path)
                .json(&json!({ "query": query, "max_num_results": max_results })),
        )
        .await?
        .json()
        .await?;

        Ok(results
            .data
            .into_iter()
            .map(|result| SearchHit {
                text: result
                    .content
                    .into_iter()
                    .filter(|c| c.r#type == "text")
                    .map(|c| c.text)
                    .collect::<Vec<_>>()
                    .join("\n"),
                file_name: result.filename,
                score: result.score,
            })
            .filter(|hit| !hit.text.trim().is_empty())
            .collect())
    }
}

#[async_trait]
impl KnowledgeSource for VectorStoreClient {
    async fn source_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for id in &self.vector_store_ids {
            names.extend(self.list_file_names(id).await?);
        }
        Ok(names)
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for id in &self.vector_store_ids {
            hits.extend(self.search_store(id, query, max_results).await?);
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(max_results);
        Ok(hits)
    }
}
