use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_contracts::{ChatRequest, ErrorBody};
use futures::{Stream, StreamExt};
use reqwest::Client;

use crate::error::ClientError;
use crate::http_client::build_http_client;

/// Raw relay response body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// Opens relay streams. Rejections before streaming come back as `Err`.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn open_stream(
        &self,
        provider: &str,
        request: &ChatRequest,
    ) -> Result<ByteStream, ClientError>;
}

/// `RelayTransport` over HTTP against a ChatRelay server
#[derive(Clone)]
pub struct HttpRelayClient {
    http: Client,
    base_url: String,
}

impl HttpRelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: build_http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

async fn rejection(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.error,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string(),
    };
    ClientError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl RelayTransport for HttpRelayClient {
    async fn open_stream(
        &self,
        provider: &str,
        request: &ChatRequest,
    ) -> Result<ByteStream, ClientError> {
        let url = format!("{}/api/chat/{}", self.base_url, provider);
        tracing::debug!(url = %url, turns = request.messages.len(), "Opening relay stream");

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = rejection(response).await;
            tracing::info!(error = %err, "Relay rejected request");
            return Err(err);
        }

        Ok(Box::pin(
            response.bytes_stream().map(|item| item.map_err(ClientError::from)),
        ))
    }
}
