//! HTTP surface (feature `server`).
//!
//! | Method | Path              | Body / answer                                    |
//! |--------|-------------------|--------------------------------------------------|
//! | POST   | `/api/convert`    | [`PipelineRequest`] → [`ConvertResponse`] or [`ErrorResponse`] |
//! | GET    | `/api/stats`      | `{"count": n}`                                   |
//! | GET    | `/api/llm-health` | [`LlmHealth`], 200 or 502                         |
//! | GET    | `/api/templates`  | the template catalog                             |
//! | GET    | `/health`         | `{"status": "ok", "version": ...}`               |
//!
//! [`ConvertResponse`]: crate::output::ConvertResponse

use crate::convert::Pipeline;
use crate::error::PipelineError;
use crate::output::{ErrorResponse, PipelineRequest};
use crate::pipeline::llm::{probe, ChatCompletion, LlmHealth};
use crate::pipeline::rate_limit::client_id;
use crate::pipeline::telemetry::UsageCounter;
use crate::pipeline::templates::TemplateDefinition;
use crate::step::ProcessingStep;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Gateway used by the health probe; normally the pipeline's own.
    pub llm: Arc<dyn ChatCompletion>,
    pub counter: Arc<dyn UsageCounter>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<Pipeline>,
        llm: Arc<dyn ChatCompletion>,
        counter: Arc<dyn UsageCounter>,
    ) -> Self {
        Self {
            pipeline,
            llm,
            counter,
        }
    }
}

/// Build the router with all endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/convert", post(convert))
        .route("/api/stats", get(stats))
        .route("/api/llm-health", get(llm_health))
        .route("/api/templates", get(templates))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until the process exits.
pub async fn start_server(addr: &str, state: AppState) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("md2word listening on {}", listener.local_addr()?);
    axum::serve(listener, build_router(state)).await
}

// ── Handlers ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn client_of(headers: &HeaderMap) -> String {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    client_id(header_str("x-forwarded-for"), header_str("x-real-ip"))
}

async fn convert(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PipelineRequest>, JsonRejection>,
) -> Response {
    let client = client_of(&headers);

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let err = PipelineError::unknown(ProcessingStep::Input, rejection.body_text());
            state.pipeline.reject(&err, &client, 0).await;
            return error_response(&err);
        }
    };

    match state.pipeline.run(&request, &client).await {
        Ok(result) => Json(result.to_response()).into_response(),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &PipelineError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(ErrorResponse::from(err))).into_response();
    if let Some(secs) = err.retry_after_secs {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

#[derive(Serialize)]
struct StatsResponse {
    count: u64,
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        count: state.counter.count().await,
    })
}

async fn llm_health(State(state): State<AppState>) -> (StatusCode, Json<LlmHealth>) {
    let health = probe(state.llm.as_ref()).await;
    let status = if health.ok {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(health))
}

async fn templates(State(state): State<AppState>) -> Json<Vec<TemplateDefinition>> {
    Json(state.pipeline.catalog().templates().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_prefers_forwarded_for() {
        let mut h = HeaderMap::new();
        assert_eq!(client_of(&h), "127.0.0.1");
        h.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_of(&h), "10.0.0.2");
        h.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(client_of(&h), "203.0.113.9");
    }

    #[test]
    fn rate_limited_error_sets_retry_after() {
        use crate::error::{ErrorKind, RateStage};
        let err = PipelineError::new(
            ErrorKind::RateLimited(RateStage::Clean),
            ProcessingStep::CleanText,
            "slow down",
        )
        .with_retry_after(42);
        let resp = error_response(&err);
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let err = PipelineError::new(
            crate::error::ErrorKind::UpstreamTimeout,
            ProcessingStep::CleanText,
            "timed out",
        );
        assert_eq!(error_response(&err).status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
