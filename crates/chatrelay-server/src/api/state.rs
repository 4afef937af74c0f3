use std::sync::Arc;

use crate::config::ServerConfig;
use crate::upstream::{OpenAIUpstream, UpstreamFactory};

/// Application state shared across all API handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub upstream: Arc<dyn UpstreamFactory>,
}

impl AppState {
    pub fn new(config: ServerConfig, upstream: Arc<dyn UpstreamFactory>) -> Self {
        Self {
            config: Arc::new(config),
            upstream,
        }
    }

    /// State backed by the real OpenAI endpoints
    pub fn from_config(config: ServerConfig) -> Self {
        let upstream = Arc::new(OpenAIUpstream::new(config.openai.base_url.clone()));
        Self::new(config, upstream)
    }
}
