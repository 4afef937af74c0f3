//! Construction of upstream clients per request.

use std::sync::Arc;

use chatrelay_ai::{
    AssistantBackend, AssistantsClient, EmbeddingCache, EmbeddingProvider, KnowledgeSource,
    LlmClient, OpenAIClient, OpenAIEmbedding, Provider, VectorStoreClient,
};

const EMBEDDING_CACHE_ENTRIES: usize = 2048;

/// Builds the upstream clients a request needs.
///
/// Clients are cheap to build; none of these calls touch the network.
pub trait UpstreamFactory: Send + Sync {
    fn chat_client(&self, provider: Provider, api_key: &str) -> Arc<dyn LlmClient>;

    fn assistant_client(
        &self,
        api_key: &str,
        assistant_id: &str,
        instructions: Option<String>,
    ) -> Arc<dyn LlmClient>;

    /// `None` when there is nothing to search.
    fn knowledge(
        &self,
        api_key: &str,
        vector_store_ids: &[String],
    ) -> Option<Arc<dyn KnowledgeSource>>;

    fn assistants_api(&self, api_key: &str) -> AssistantsClient;

    fn embeddings(&self, api_key: &str) -> Arc<dyn EmbeddingProvider>;
}

/// Real OpenAI-backed clients
pub struct OpenAIUpstream {
    openai_base_url: Option<String>,
    embedding_cache: Arc<EmbeddingCache>,
}

impl OpenAIUpstream {
    pub fn new(openai_base_url: Option<String>) -> Self {
        Self {
            openai_base_url,
            embedding_cache: Arc::new(EmbeddingCache::new(EMBEDDING_CACHE_ENTRIES)),
        }
    }
}

impl UpstreamFactory for OpenAIUpstream {
    fn chat_client(&self, provider: Provider, api_key: &str) -> Arc<dyn LlmClient> {
        let client = OpenAIClient::for_provider(provider, api_key);
        match (&self.openai_base_url, provider) {
            (Some(url), Provider::OpenAI) => Arc::new(client.with_base_url(url.as_str())),
            _ => Arc::new(client),
        }
    }

    fn assistant_client(
        &self,
        api_key: &str,
        assistant_id: &str,
        instructions: Option<String>,
    ) -> Arc<dyn LlmClient> {
        Arc::new(
            AssistantBackend::new(self.assistants_api(api_key), assistant_id)
                .with_instructions(instructions),
        )
    }

    fn knowledge(
        &self,
        api_key: &str,
        vector_store_ids: &[String],
    ) -> Option<Arc<dyn KnowledgeSource>> {
        if vector_store_ids.is_empty() {
            return None;
        }
        let mut client = VectorStoreClient::new(api_key, vector_store_ids.to_vec());
        if let Some(url) = &self.openai_base_url {
            client = client.with_base_url(url.as_str());
        }
        Some(Arc::new(client))
    }

    fn assistants_api(&self, api_key: &str) -> AssistantsClient {
        let client = AssistantsClient::new(api_key);
        match &self.openai_base_url {
            Some(url) => client.with_base_url(url.as_str()),
            None => client,
        }
    }

    fn embeddings(&self, api_key: &str) -> Arc<dyn EmbeddingProvider> {
        let mut provider =
            OpenAIEmbedding::new(api_key, None).with_cache(self.embedding_cache.clone());
        if let Some(url) = &self.openai_base_url {
            provider = provider.with_base_url(url.as_str());
        }
        Arc::new(provider)
    }
}
