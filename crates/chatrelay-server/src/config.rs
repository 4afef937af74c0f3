use chatrelay_ai::Provider;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

const CONFIG_PATH_ENV: &str = "CHATRELAY_CONFIG";
const LOCAL_CONFIG_FILE: &str = "chatrelay.toml";
const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub assistant_id: Option<String>,
    pub base_url: Option<String>,
    pub vector_store_ids: Vec<String>,
    pub poll_interval: Duration,
    pub run_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderKeys {
    pub groq: Option<String>,
    pub mistral: Option<String>,
    pub openrouter: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    /// Keep document names out of model-facing instructions.
    pub privacy_mode: bool,
    pub max_results: usize,
    /// Upper bound on each knowledge lookup before augmentation is skipped.
    pub lookup_timeout: Duration,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            privacy_mode: true,
            max_results: default_max_results(),
            lookup_timeout: Duration::from_millis(DEFAULT_LOOKUP_TIMEOUT_MS),
        }
    }
}

/// Which catalog models are offered to clients
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelPolicy {
    #[serde(default = "default_restrict")]
    pub restrict: bool,
    #[serde(default = "default_allowed_providers")]
    pub allowed_providers: Vec<String>,
    #[serde(default = "default_allowed_models")]
    pub allowed_models: Vec<String>,
}

impl Default for ModelPolicy {
    fn default() -> Self {
        Self {
            restrict: default_restrict(),
            allowed_providers: default_allowed_providers(),
            allowed_models: default_allowed_models(),
        }
    }
}

impl ModelPolicy {
    pub fn allows(&self, provider: Provider, model_id: &str) -> bool {
        if !self.restrict {
            return true;
        }
        self.allowed_providers.iter().any(|p| p == provider.slug())
            || self.allowed_models.iter().any(|m| m == model_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub openai: OpenAiSettings,
    pub providers: ProviderKeys,
    pub retrieval: RetrievalSettings,
    pub models: ModelPolicy,
    pub rate_limit_per_minute: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::resolve(FileConfig::default(), |_| None)
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    openai: OpenAiSection,
    #[serde(default)]
    providers: ProvidersSection,
    #[serde(default)]
    retrieval: RetrievalSection,
    #[serde(default)]
    models: ModelPolicy,
    #[serde(default)]
    rate_limit: RateLimitSection,
}

#[derive(Debug, Deserialize, Default)]
struct ServerSection {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiSection {
    api_key: Option<String>,
    assistant_id: Option<String>,
    base_url: Option<String>,
    #[serde(default)]
    vector_store_ids: Vec<String>,
    poll_interval_ms: Option<u64>,
    run_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ProvidersSection {
    groq_api_key: Option<String>,
    mistral_api_key: Option<String>,
    openrouter_api_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RetrievalSection {
    privacy_mode: Option<bool>,
    max_results: Option<usize>,
    lookup_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RateLimitSection {
    requests_per_minute: Option<u64>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_results() -> usize {
    5
}

fn default_restrict() -> bool {
    true
}

fn default_allowed_providers() -> Vec<String> {
    vec!["openai".to_string()]
}

fn default_allowed_models() -> Vec<String> {
    ["gpt-4o-mini", "gpt-4o", "gpt-4-turbo-preview", "gpt-3.5-turbo"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Empty strings count as absent.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_ids(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}

impl ServerConfig {
    /// Load from `CHATRELAY_CONFIG` or `./chatrelay.toml`, with environment
    /// variables filling whatever the file leaves empty.
    pub fn load() -> anyhow::Result<Self> {
        let file_config = load_from_file()?.unwrap_or_default();
        Ok(Self::resolve(file_config, |key| env::var(key).ok()))
    }

    pub fn from_env() -> Self {
        Self::resolve(FileConfig::default(), |key| env::var(key).ok())
    }

    fn resolve(file: FileConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| non_empty(lookup(key));

        let host = non_empty(file.server.host)
            .or_else(|| var("CHATRELAY_HOST"))
            .unwrap_or_else(default_host);
        let port = file
            .server
            .port
            .or_else(|| var("CHATRELAY_PORT").and_then(|v| v.parse().ok()))
            .unwrap_or_else(default_port);

        let vector_store_ids = if file.openai.vector_store_ids.is_empty() {
            var("OPENAI_VECTOR_STORE_IDS")
                .map(|v| split_ids(&v))
                .unwrap_or_default()
        } else {
            file.openai
                .vector_store_ids
                .into_iter()
                .filter(|id| !id.trim().is_empty())
                .collect()
        };

        let openai = OpenAiSettings {
            api_key: non_empty(file.openai.api_key).or_else(|| var("OPENAI_API_KEY")),
            assistant_id: non_empty(file.openai.assistant_id).or_else(|| var("ASSISTANT_ID")),
            base_url: non_empty(file.openai.base_url).or_else(|| var("OPENAI_BASE_URL")),
            vector_store_ids,
            poll_interval: Duration::from_millis(file.openai.poll_interval_ms.unwrap_or(1000)),
            run_timeout: Duration::from_secs(file.openai.run_timeout_secs.unwrap_or(120)),
        };

        let providers = ProviderKeys {
            groq: non_empty(file.providers.groq_api_key).or_else(|| var("GROQ_API_KEY")),
            mistral: non_empty(file.providers.mistral_api_key).or_else(|| var("MISTRAL_API_KEY")),
            openrouter: non_empty(file.providers.openrouter_api_key)
                .or_else(|| var("OPENROUTER_API_KEY")),
        };

        let retrieval = RetrievalSettings {
            privacy_mode: file
                .retrieval
                .privacy_mode
                .or_else(|| var("CHATRELAY_PRIVACY_MODE").and_then(|v| parse_bool(&v)))
                .unwrap_or(true),
            max_results: file
                .retrieval
                .max_results
                .filter(|n| *n > 0)
                .unwrap_or_else(default_max_results),
            lookup_timeout: Duration::from_millis(
                file.retrieval
                    .lookup_timeout_ms
                    .filter(|ms| *ms > 0)
                    .unwrap_or(DEFAULT_LOOKUP_TIMEOUT_MS),
            ),
        };

        let rate_limit_per_minute = file
            .rate_limit
            .requests_per_minute
            .or_else(|| var("CHATRELAY_RATE_LIMIT_RPM").and_then(|v| v.parse().ok()));

        Self {
            host,
            port,
            openai,
            providers,
            retrieval,
            models: file.models,
            rate_limit_per_minute,
        }
    }

    /// Server-side credential for a provider, if configured.
    pub fn api_key(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAI => self.openai.api_key.as_deref(),
            Provider::Groq => self.providers.groq.as_deref(),
            Provider::Mistral => self.providers.mistral.as_deref(),
            Provider::OpenRouter => self.providers.openrouter.as_deref(),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn load_from_file() -> anyhow::Result<Option<FileConfig>> {
    let config_path = non_empty(env::var(CONFIG_PATH_ENV).ok());
    let path = if let Some(path) = config_path {
        Some(path)
    } else if Path::new(LOCAL_CONFIG_FILE).exists() {
        Some(LOCAL_CONFIG_FILE.to_string())
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&path)
        .map_err(|err| anyhow::anyhow!("Failed to read config {}: {}", path, err))?;
    let parsed = parse_file_config(&contents)
        .map_err(|err| anyhow::anyhow!("Failed to parse config {}: {}", path, err))?;
    Ok(Some(parsed))
}

fn parse_file_config(contents: &str) -> Result<FileConfig, toml::de::Error> {
    toml::from_str(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let config = ServerConfig::resolve(FileConfig::default(), env_of(&[]));

        assert_eq!(config.bind_address(), "0.0.0.0:3000");
        assert!(config.openai.api_key.is_none());
        assert!(config.retrieval.privacy_mode);
        assert_eq!(config.retrieval.max_results, 5);
        assert_eq!(config.openai.poll_interval, Duration::from_secs(1));
        assert_eq!(config.retrieval.lookup_timeout, Duration::from_secs(5));
        assert!(config.models.restrict);
        assert_eq!(config.models.allowed_providers, vec!["openai"]);
        assert!(config.rate_limit_per_minute.is_none());
    }

    #[test]
    fn test_env_only() {
        let config = ServerConfig::resolve(
            FileConfig::default(),
            env_of(&[
                ("OPENAI_API_KEY", "sk-env"),
                ("ASSISTANT_ID", "   "),
                ("OPENAI_VECTOR_STORE_IDS", "vs_1, ,vs_2"),
                ("GROQ_API_KEY", "gsk"),
                ("CHATRELAY_PRIVACY_MODE", "off"),
                ("CHATRELAY_PORT", "8088"),
                ("CHATRELAY_RATE_LIMIT_RPM", "30"),
            ]),
        );

        assert_eq!(config.api_key(Provider::OpenAI), Some("sk-env"));
        assert_eq!(config.api_key(Provider::Groq), Some("gsk"));
        assert_eq!(config.api_key(Provider::Mistral), None);
        assert!(config.openai.assistant_id.is_none());
        assert_eq!(config.openai.vector_store_ids, vec!["vs_1", "vs_2"]);
        assert!(!config.retrieval.privacy_mode);
        assert_eq!(config.port, 8088);
        assert_eq!(config.rate_limit_per_minute, Some(30));
    }

    #[test]
    fn test_file_values_win_and_env_fills_gaps() {
        let file = parse_file_config(
            r#"
            [server]
            port = 9000

            [openai]
            api_key = ""
            assistant_id = "asst_file"

            [retrieval]
            privacy_mode = false
            max_results = 3
            lookup_timeout_ms = 250

            [models]
            restrict = false
            "#,
        )
        .unwrap();

        let config = ServerConfig::resolve(
            file,
            env_of(&[
                ("OPENAI_API_KEY", "sk-env"),
                ("ASSISTANT_ID", "asst_env"),
                ("CHATRELAY_PORT", "1234"),
                ("CHATRELAY_PRIVACY_MODE", "true"),
            ]),
        );

        assert_eq!(config.port, 9000);
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.openai.assistant_id.as_deref(), Some("asst_file"));
        assert!(!config.retrieval.privacy_mode);
        assert_eq!(config.retrieval.max_results, 3);
        assert_eq!(config.retrieval.lookup_timeout, Duration::from_millis(250));
        assert!(!config.models.restrict);
        assert_eq!(config.models.allowed_models.len(), 4);
    }

    #[test]
    fn test_model_policy() {
        let policy = ModelPolicy::default();
        assert!(policy.allows(Provider::OpenAI, "gpt-4.1"));
        assert!(!policy.allows(Provider::Groq, "llama-3.1-8b-instant"));

        let policy = ModelPolicy {
            allowed_providers: vec![],
            ..ModelPolicy::default()
        };
        assert!(policy.allows(Provider::OpenRouter, "gpt-4o-mini"));
        assert!(!policy.allows(Provider::OpenAI, "gpt-4.1"));

        let open = ModelPolicy {
            restrict: false,
            ..ModelPolicy::default()
        };
        assert!(open.allows(Provider::Mistral, "mistral-large-latest"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        assert!(parse_file_config("[server]\nport = \"not a number\"").is_err());
    }
}
