use axum::{Json, extract::State};
use chatrelay_ai::Provider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::api::state::AppState;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeysResponse {
    /// Provider slug to whether the server holds a key for it.
    pub is_using_env_key_map: BTreeMap<String, bool>,
}

/// GET /api/keys - which providers have server-side credentials
pub async fn list_keys(State(state): State<AppState>) -> Json<KeysResponse> {
    let is_using_env_key_map = Provider::ALL
        .into_iter()
        .map(|provider| {
            (
                provider.slug().to_string(),
                state.config.api_key(provider).is_some(),
            )
        })
        .collect();

    Json(KeysResponse {
        is_using_env_key_map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::upstream::OpenAIUpstream;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_list_keys() {
        let mut config = ServerConfig::default();
        config.openai.api_key = Some("sk".to_string());
        config.providers.openrouter = Some("or".to_string());
        let state = AppState::new(config, Arc::new(OpenAIUpstream::new(None)));

        let Json(body) = list_keys(State(state)).await;
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "isUsingEnvKeyMap": {"openai": true, "groq": false, "mistral": false, "openrouter": true}
            })
        );
    }
}
