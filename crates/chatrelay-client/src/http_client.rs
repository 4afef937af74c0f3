use reqwest::Client;

const DISABLE_SYSTEM_PROXY_ENV: &str = "CHATRELAY_DISABLE_SYSTEM_PROXY";

pub(crate) fn build_http_client() -> Client {
    if std::env::var_os(DISABLE_SYSTEM_PROXY_ENV).is_none() && !cfg!(test) {
        return Client::new();
    }

    Client::builder().no_proxy().build().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "Failed to build proxy-less HTTP client, using defaults");
        Client::new()
    })
}
