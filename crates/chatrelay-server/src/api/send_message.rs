use std::time::Duration;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use chatrelay_ai::{AssistantsClient, Run, RunStatus};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};

use crate::api::{response::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message: String,
    pub timestamp: String,
    pub thread_id: String,
}

fn upstream_failure(err: chatrelay_ai::AiError) -> ApiError {
    ApiError::Internal(err.to_string())
}

async fn wait_for_run(
    client: &AssistantsClient,
    thread_id: &str,
    run: Run,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<Run, ApiError> {
    let deadline = Instant::now() + timeout;
    let mut run = client
        .retrieve_run(thread_id, &run.id)
        .await
        .map_err(upstream_failure)?;

    while run.status.is_pending() {
        if Instant::now() >= deadline {
            return Err(ApiError::Internal(format!(
                "Assistant run timed out with status: {}",
                run.status
            )));
        }
        tracing::debug!(thread_id, run_id = %run.id, status = %run.status, "Waiting for assistant run");
        sleep(poll_interval).await;
        run = client
            .retrieve_run(thread_id, &run.id)
            .await
            .map_err(upstream_failure)?;
    }
    Ok(run)
}

/// POST /api/send-message - one assistant turn without streaming
pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let Json(request) = payload?;
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message is required".to_string()));
    }

    let settings = &state.config.openai;
    let api_key = settings
        .api_key
        .as_deref()
        .ok_or_else(|| ApiError::NotConfigured("OpenAI API key not configured".to_string()))?;
    let assistant_id = settings
        .assistant_id
        .as_deref()
        .ok_or_else(|| ApiError::NotConfigured("Assistant ID not configured".to_string()))?;

    let client = state.upstream.assistants_api(api_key);

    let thread_id = match request.thread_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => client.create_thread().await.map_err(upstream_failure)?,
    };

    client
        .add_user_message(&thread_id, &request.message)
        .await
        .map_err(upstream_failure)?;
    let run = client
        .create_run(&thread_id, assistant_id)
        .await
        .map_err(upstream_failure)?;

    let run = wait_for_run(
        &client,
        &thread_id,
        run,
        settings.poll_interval,
        settings.run_timeout,
    )
    .await?;

    if run.status != RunStatus::Completed {
        return Err(ApiError::Internal(format!(
            "Assistant run failed with status: {}",
            run.status
        )));
    }

    let reply = client
        .latest_assistant_reply(&thread_id, &run.id)
        .await
        .map_err(upstream_failure)?
        .ok_or_else(|| ApiError::Internal("No response from assistant".to_string()))?;

    Ok(Json(SendMessageResponse {
        message: reply,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        thread_id,
    }))
}
