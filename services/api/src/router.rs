//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the telephony webhooks, the JSON API, generated audio and the
//! OpenAPI documentation.

use crate::{
    audio::AUDIO_ROUTE,
    handlers,
    models::{
        CallEventPayload, CallRecordView, CallSessionView, ErrorResponse, PromptResponse,
        TurnView,
    },
    state::AppState,
    voice,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::post_call_event,
        handlers::list_calls,
        handlers::get_call,
    ),
    components(
        schemas(CallEventPayload, PromptResponse, CallSessionView, CallRecordView, TurnView, ErrorResponse)
    ),
    tags(
        (name = "Call Agent API", description = "Per-call conversation sessions for the AI phone agent")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let audio_dir = app_state.config.audio_dir.clone();

    let api_router = Router::new()
        .route("/voice/connected", post(voice::voice_connected))
        .route("/voice/gather", post(voice::voice_gather))
        .route("/voice/silence", post(voice::voice_silence))
        .route("/voice/status", post(voice::voice_status))
        .route("/calls", get(handlers::list_calls))
        .route("/calls/{call_id}", get(handlers::get_call))
        .route("/calls/{call_id}/events", post(handlers::post_call_event))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest_service(AUDIO_ROUTE, ServeDir::new(audio_dir))
        .merge(api_router)
}
