use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chatrelay_contracts::ErrorBody;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding-window limiter shared by every `/api/*` route
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<RateLimitState>>,
}

struct RateLimitState {
    limit: u64,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: Option<u64>) -> Option<Self> {
        limit_per_minute.map(|limit| Self::with_window(limit, Duration::from_secs(60)))
    }

    pub fn with_window(limit: u64, window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(RateLimitState {
                limit,
                window,
                hits: VecDeque::new(),
            })),
        }
    }

    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        while let Some(front) = state.hits.front() {
            if now.duration_since(*front) >= state.window {
                state.hits.pop_front();
            } else {
                break;
            }
        }

        if state.hits.len() as u64 >= state.limit {
            return false;
        }

        state.hits.push_back(now);
        true
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    if !limiter.allow() {
        tracing::debug!(path = %req.uri().path(), "Rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorBody::new("Rate limit exceeded")),
        )
            .into_response();
    }

    next.run(req).await
}
