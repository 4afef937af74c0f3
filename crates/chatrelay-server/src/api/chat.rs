use std::convert::Infallible;

use axum::{
    Json,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::Response,
};
use chatrelay_ai::{CompletionRequest, Provider};
use chatrelay_contracts::{ChatRequest, encode_data_frame};
use futures::StreamExt;

use crate::api::{response::ApiError, state::AppState};
use crate::relay::{RelayBackend, RelayError, RelayPlan, RelaySession, relay_events};

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";

impl From<RelayError> for ApiError {
    fn from(error: RelayError) -> Self {
        match error {
            RelayError::MissingCredential(_) => ApiError::NotConfigured(error.to_string()),
            RelayError::MissingUserMessage => ApiError::BadRequest(error.to_string()),
        }
    }
}

/// Validate a request and pick its backend. Never touches the network.
pub fn plan_relay(
    state: &AppState,
    provider: Provider,
    request: ChatRequest,
) -> Result<RelayPlan, RelayError> {
    let config = &state.config;
    let api_key = config
        .api_key(provider)
        .ok_or(RelayError::MissingCredential(provider))?
        .to_string();

    let assistant_id = match provider {
        Provider::OpenAI => request
            .assistant_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| config.openai.assistant_id.clone()),
        _ => None,
    };

    let knowledge = match provider {
        Provider::OpenAI => state
            .upstream
            .knowledge(&api_key, &config.openai.vector_store_ids),
        _ => None,
    };

    let backend = match assistant_id {
        Some(assistant_id) => {
            let has_user_turn = request
                .latest_user_content()
                .is_some_and(|content| !content.trim().is_empty());
            if !has_user_turn {
                return Err(RelayError::MissingUserMessage);
            }
            RelayBackend::Assistant { assistant_id }
        }
        None => RelayBackend::Completions { provider },
    };

    let mut completion = CompletionRequest::new(request.messages);
    if let Some(model) = request.model.filter(|m| !m.trim().is_empty()) {
        completion = completion.with_model(model);
    }
    if let Some(temperature) = request.temperature {
        completion = completion.with_temperature(temperature);
    }

    Ok(RelayPlan {
        backend,
        api_key,
        request: completion,
        knowledge,
        retrieval: config.retrieval.clone(),
    })
}

/// POST /api/chat/{provider} - stream a completion as SSE
pub async fn relay_chat(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let provider = Provider::from_slug(&provider)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown provider: {}", provider)))?;
    let Json(request) = payload?;

    let mut session = RelaySession::new(provider.slug());
    session.begin_validation();

    let plan = match plan_relay(&state, provider, request) {
        Ok(plan) => plan,
        Err(err) => {
            session.reject(&err);
            return Err(err.into());
        }
    };

    session.start_streaming();
    let frames = relay_events(session, plan, state.upstream.clone())
        .map(|event| Ok::<_, Infallible>(encode_data_frame(&event)));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, EVENT_STREAM_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache, no-transform")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(frames))
        .map_err(|err| ApiError::Internal(format!("Failed to build stream response: {}", err)))
}
