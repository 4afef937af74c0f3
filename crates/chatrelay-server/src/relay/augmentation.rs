//! Best-effort knowledge augmentation.
//!
//! Failures here never fail a relay session: they are logged and generation
//! continues without the extra context. Each lookup is bounded by
//! `RetrievalSettings::lookup_timeout`.

use std::time::Duration;

use chatrelay_ai::{AiError, CompletionRequest, KnowledgeSource, SearchHit};
use thiserror::Error;

use crate::config::RetrievalSettings;

const PRIVATE_KNOWLEDGE_NOTE: &str = "You have access to a private knowledge base of uploaded documents. \
Use it when it is relevant to the question. Do not reveal document names, file names or where an answer came from.";

/// Why a lookup was skipped
#[derive(Debug, Error)]
pub enum AugmentationError {
    #[error("knowledge lookup timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Lookup(#[from] AiError),
}

async fn bounded<T>(
    limit: Duration,
    lookup: impl Future<Output = chatrelay_ai::Result<T>>,
) -> Result<T, AugmentationError> {
    match tokio::time::timeout(limit, lookup).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(AugmentationError::TimedOut(limit)),
    }
}

/// Extra run instructions describing the assistant's knowledge base.
pub async fn assistant_instructions(
    knowledge: &dyn KnowledgeSource,
    retrieval: &RetrievalSettings,
) -> Option<String> {
    let names = match bounded(retrieval.lookup_timeout, knowledge.source_names()).await {
        Ok(names) => names,
        Err(err) => {
            tracing::warn!(error = %err, "Knowledge lookup failed, continuing without it");
            return None;
        }
    };

    if names.is_empty() {
        return None;
    }

    if retrieval.privacy_mode {
        return Some(PRIVATE_KNOWLEDGE_NOTE.to_string());
    }

    Some(format!(
        "You have access to the following documents: {}. Use them when they are relevant to the question.",
        names.join(", ")
    ))
}

/// Render retrieved excerpts as a system turn body.
pub fn excerpts_prompt(hits: &[SearchHit], privacy_mode: bool) -> Option<String> {
    if hits.is_empty() {
        return None;
    }

    let mut prompt = String::from(
        "Answer using the following excerpts from the knowledge base when they are relevant.",
    );
    if privacy_mode {
        prompt.push_str(" Do not reveal where the excerpts came from.");
    }

    for hit in hits {
        prompt.push_str("\n\n---\n");
        if !privacy_mode {
            prompt.push_str(&format!("[{}]\n", hit.file_name));
        }
        prompt.push_str(hit.text.trim());
    }
    Some(prompt)
}

/// Prepend a system turn with excerpts relevant to the latest user turn.
pub async fn augment_completion(
    knowledge: &dyn KnowledgeSource,
    request: CompletionRequest,
    retrieval: &RetrievalSettings,
) -> CompletionRequest {
    let Some(query) = request
        .latest_user_content()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
    else {
        return request;
    };

    let search = knowledge.search(&query, retrieval.max_results);
    let hits = match bounded(retrieval.lookup_timeout, search).await {
        Ok(hits) => hits,
        Err(err) => {
            tracing::warn!(error = %err, "Knowledge search failed, continuing without it");
            return request;
        }
    };

    match excerpts_prompt(&hits, retrieval.privacy_mode) {
        Some(prompt) => {
            tracing::debug!(excerpts = hits.len(), "Augmented completion request");
            request.with_leading_system(prompt)
        }
        None => request,
    }
}
