use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{ApplicationId, PipelineStage};
use super::events::EventPublisher;
use super::gateway::AgentGateway;
use super::repository::{PipelineStore, RepositoryError};
use super::service::{ApplicationIntake, HiringPipelineService, PipelineError};

#[derive(Debug, Deserialize)]
pub(crate) struct AdvanceRequest {
    #[serde(default)]
    stage: Option<PipelineStage>,
}

/// Router builder exposing HTTP endpoints for intake, advancement, status,
/// run inspection, and the bias batch trigger.
pub fn pipeline_router<S, G, P>(service: Arc<HiringPipelineService<S, G, P>>) -> Router
where
    S: PipelineStore + 'static,
    G: AgentGateway + 'static,
    P: EventPublisher + 'static,
{
    Router::new()
        .route(
            "/api/v1/pipeline/applications",
            post(register_handler::<S, G, P>),
        )
        .route(
            "/api/v1/pipeline/applications/:application_id",
            get(status_handler::<S, G, P>),
        )
        .route(
            "/api/v1/pipeline/applications/:application_id/advance",
            post(advance_handler::<S, G, P>),
        )
        .route(
            "/api/v1/pipeline/applications/:application_id/runs",
            get(runs_handler::<S, G, P>),
        )
        .route(
            "/api/v1/pipeline/bias-batch",
            post(bias_batch_handler::<S, G, P>),
        )
        .with_state(service)
}

pub(crate) async fn register_handler<S, G, P>(
    State(service): State<Arc<HiringPipelineService<S, G, P>>>,
    axum::Json(intake): axum::Json<ApplicationIntake>,
) -> Response
where
    S: PipelineStore + 'static,
    G: AgentGateway + 'static,
    P: EventPublisher + 'static,
{
    match service.register(intake) {
        Ok(record) => (StatusCode::ACCEPTED, axum::Json(record)).into_response(),
        Err(PipelineError::Repository(RepositoryError::Conflict)) => {
            let payload = json!({
                "error": "application already exists",
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        Err(other) => {
            let payload = json!({
                "error": other.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn advance_handler<S, G, P>(
    State(service): State<Arc<HiringPipelineService<S, G, P>>>,
    Path(application_id): Path<String>,
    body: Option<axum::Json<AdvanceRequest>>,
) -> Response
where
    S: PipelineStore + 'static,
    G: AgentGateway + 'static,
    P: EventPublisher + 'static,
{
    let id = ApplicationId(application_id);
    let requested = body.and_then(|axum::Json(request)| request.stage);

    let outcome = match requested {
        Some(stage) => service.advance_stage(&id, stage).await,
        None => service.advance(&id).await,
    };

    match outcome {
        Ok(outcome) => {
            let payload = json!({
                "outcome": outcome.label(),
                "credential": outcome.credential(),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => pipeline_error_response(&id, error),
    }
}

pub(crate) async fn status_handler<S, G, P>(
    State(service): State<Arc<HiringPipelineService<S, G, P>>>,
    Path(application_id): Path<String>,
) -> Response
where
    S: PipelineStore + 'static,
    G: AgentGateway + 'static,
    P: EventPublisher + 'static,
{
    let id = ApplicationId(application_id);
    match service.status(&id) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => pipeline_error_response(&id, error),
    }
}

pub(crate) async fn runs_handler<S, G, P>(
    State(service): State<Arc<HiringPipelineService<S, G, P>>>,
    Path(application_id): Path<String>,
) -> Response
where
    S: PipelineStore + 'static,
    G: AgentGateway + 'static,
    P: EventPublisher + 'static,
{
    let id = ApplicationId(application_id);
    match service.list_runs(&id) {
        Ok(runs) => (StatusCode::OK, axum::Json(runs)).into_response(),
        Err(error) => pipeline_error_response(&id, error),
    }
}

pub(crate) async fn bias_batch_handler<S, G, P>(
    State(service): State<Arc<HiringPipelineService<S, G, P>>>,
) -> Response
where
    S: PipelineStore + 'static,
    G: AgentGateway + 'static,
    P: EventPublisher + 'static,
{
    match service.run_bias_batch().await {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(error) => {
            let payload = json!({
                "error": error.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

fn pipeline_error_response(id: &ApplicationId, error: PipelineError) -> Response {
    match error {
        PipelineError::Repository(RepositoryError::NotFound) => {
            let payload = json!({
                "application_id": id.0,
                "error": "application not found",
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        PipelineError::Stage(failure) => {
            let payload = json!({
                "application_id": id.0,
                "error": failure.to_string(),
            });
            (StatusCode::BAD_GATEWAY, axum::Json(payload)).into_response()
        }
        PipelineError::Signature(error) => {
            let payload = json!({
                "application_id": id.0,
                "error": error.to_string(),
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        other => {
            let payload = json!({
                "error": other.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}
