//! Axum Handlers for the REST API
//!
//! JSON endpoints for driving calls and reading transcripts. Each handler
//! carries `utoipa` annotations for the generated OpenAPI document.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use callagent_core::{CallEvent, StoreError};
use std::sync::Arc;
use tracing::error;

use crate::{
    models::{CallEventPayload, CallRecordView, CallSessionView, ErrorResponse, PromptResponse},
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Deliver a call event and get back what the caller should hear.
#[utoipa::path(
    post,
    path = "/calls/{call_id}/events",
    request_body = CallEventPayload,
    responses(
        (status = 200, description = "The next prompt for the caller", body = PromptResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("call_id" = String, Path, description = "Telephony call id")
    )
)]
pub async fn post_call_event(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
    Json(payload): Json<CallEventPayload>,
) -> Result<Json<PromptResponse>, ApiError> {
    let event = CallEvent::try_from(payload).map_err(ApiError::BadRequest)?;

    let prompt = state.router.handle(&call_id, event).await;
    let audio_url = state.voice_prompt(&call_id, &prompt).await;

    Ok(Json(PromptResponse::new(prompt, audio_url)))
}

/// List the calls that currently have a live session.
#[utoipa::path(
    get,
    path = "/calls",
    responses(
        (status = 200, description = "Live call sessions, oldest first", body = [CallSessionView])
    )
)]
pub async fn list_calls(State(state): State<Arc<AppState>>) -> Json<Vec<CallSessionView>> {
    let sessions = state.registry().list().await;
    Json(sessions.into_iter().map(CallSessionView::from).collect())
}

/// Get the persisted transcript of a call.
#[utoipa::path(
    get,
    path = "/calls/{call_id}",
    responses(
        (status = 200, description = "Call record", body = CallRecordView),
        (status = 404, description = "Call not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("call_id" = String, Path, description = "Telephony call id")
    )
)]
pub async fn get_call(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Result<Json<CallRecordView>, ApiError> {
    match state.registry().store().get_record(&call_id).await {
        Ok(record) => Ok(Json(CallRecordView::from(record))),
        Err(StoreError::NotFound(_)) => Err(ApiError::NotFound(format!(
            "Call with id '{}' not found",
            call_id
        ))),
        Err(e) => Err(e.into()),
    }
}
