//! Admission middleware wrapping any route with a rate limiter.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{Result, SluiceError};
use crate::ratelimit::{Admission, RateLimitHeaders, RateLimiterBackend};

pub const HEADER_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const HEADER_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const HEADER_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Body of a rejected request.
pub const RATE_LIMIT_REACHED: &str = "Rate Limit reached";
const LIMITER_UNAVAILABLE: &str = "Rate limiter unavailable";

/// JSON body shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A limiter together with the deadline its checks must finish within.
#[derive(Clone)]
pub struct Gate {
    limiter: Arc<dyn RateLimiterBackend>,
    deadline: Duration,
}

impl Gate {
    pub fn new(limiter: Arc<dyn RateLimiterBackend>, deadline: Duration) -> Self {
        Self { limiter, deadline }
    }

    /// Run one admission check, failing if the store does not answer in time.
    ///
    /// Dropping the returned future (for instance when the client goes
    /// away) abandons the in-flight store call.
    pub async fn check(&self) -> Result<Admission> {
        match tokio::time::timeout(self.deadline, self.limiter.admit()).await {
            Ok(result) => result,
            Err(_) => Err(SluiceError::StoreTimeout(self.deadline)),
        }
    }
}

/// Gate `route` behind `gate`.
///
/// Denied requests never reach the wrapped handler. Admitted requests reach
/// it unchanged and get the informational headers added to their response.
pub fn gated<S>(route: MethodRouter<S>, gate: Gate) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    route.route_layer(middleware::from_fn_with_state(gate, admission))
}

async fn admission(State(gate): State<Gate>, request: Request, next: Next) -> Response {
    match gate.check().await {
        Ok(admission) if admission.is_allowed() => {
            let mut response = next.run(request).await;
            apply_headers(response.headers_mut(), &admission.headers);
            response
        }
        Ok(admission) => {
            debug!(
                limiter = gate.limiter.name(),
                path = %request.uri().path(),
                "Rejecting request over the rate limit"
            );
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ApiMessage::new(RATE_LIMIT_REACHED)),
            )
                .into_response();
            apply_headers(response.headers_mut(), &admission.headers);
            response
        }
        Err(e) => {
            error!(
                limiter = gate.limiter.name(),
                error = %e,
                "Admission check failed"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiMessage::new(LIMITER_UNAVAILABLE)),
            )
                .into_response()
        }
    }
}

fn apply_headers(headers: &mut HeaderMap, values: &RateLimitHeaders) {
    headers.insert(HEADER_LIMIT, HeaderValue::from(values.limit));
    if let Some(remaining) = values.remaining {
        headers.insert(HEADER_REMAINING, HeaderValue::from(remaining));
    }
    if let Some(reset) = values.reset_secs {
        headers.insert(HEADER_RESET, HeaderValue::from(reset));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Decision;
    use async_trait::async_trait;

    struct Stalled;

    #[async_trait]
    impl RateLimiterBackend for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn admit(&self) -> Result<Admission> {
            std::future::pending().await
        }
    }

    struct AlwaysDeny;

    #[async_trait]
    impl RateLimiterBackend for AlwaysDeny {
        fn name(&self) -> &'static str {
            "deny"
        }

        async fn admit(&self) -> Result<Admission> {
            Ok(Admission {
                decision: Decision::Denied,
                headers: RateLimitHeaders {
                    limit: 1,
                    remaining: None,
                    reset_secs: None,
                },
            })
        }
    }

    #[tokio::test]
    async fn test_check_times_out() {
        let gate = Gate::new(Arc::new(Stalled), Duration::from_millis(20));
        assert!(matches!(
            gate.check().await,
            Err(SluiceError::StoreTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_check_passes_decision_through() {
        let gate = Gate::new(Arc::new(AlwaysDeny), Duration::from_secs(1));
        assert!(!gate.check().await.unwrap().is_allowed());
    }

    #[test]
    fn test_optional_headers_are_omitted() {
        let mut headers = HeaderMap::new();
        apply_headers(
            &mut headers,
            &RateLimitHeaders {
                limit: 10,
                remaining: None,
                reset_secs: Some(42),
            },
        );
        assert_eq!(headers.get(HEADER_LIMIT).unwrap(), "10");
        assert!(headers.get(HEADER_REMAINING).is_none());
        assert_eq!(headers.get(HEADER_RESET).unwrap(), "42");
    }
}
