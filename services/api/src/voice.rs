//! Telephony Webhooks
//!
//! Twilio-style voice callbacks. Each request carries the call's `CallSid`
//! as form data and is answered with TwiML.

use axum::{
    Form,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use callagent_core::Prompt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::{
    models::{VoiceWebhookForm, end_reason_for_call_status},
    state::AppState,
    twiml::render_prompt,
};

/// A new inbound or outbound call has been answered.
#[instrument(skip_all, fields(call_id = %form.call_sid))]
pub async fn voice_connected(
    State(state): State<Arc<AppState>>,
    Form(form): Form<VoiceWebhookForm>,
) -> Response {
    info!(
        from = ?form.from,
        to = ?form.to,
        direction = ?form.direction,
        "Call connected"
    );
    let prompt = state
        .router
        .on_call_connected(&form.call_sid, form.from.clone())
        .await;
    respond(&state, &form.call_sid, prompt).await
}

/// Result of a `<Gather>`: recognized speech, pressed keys, or nothing.
#[instrument(skip_all, fields(call_id = %form.call_sid))]
pub async fn voice_gather(
    State(state): State<Arc<AppState>>,
    Form(form): Form<VoiceWebhookForm>,
) -> Response {
    let call_id = form.call_sid.as_str();
    let speech = form.speech_result.as_deref();
    let digits = form.digits.as_deref().map(str::trim).filter(|d| !d.is_empty());
    let prompt = match (speech, digits) {
        (Some(speech), _) if !speech.trim().is_empty() => {
            state.router.on_speech_recognized(call_id, speech).await
        }
        (_, Some(digits)) => state.router.on_digits(call_id, digits).await,
        // Blank transcript and no keys: ask the caller to repeat.
        (Some(speech), None) => state.router.on_speech_recognized(call_id, speech).await,
        (None, None) => state.router.on_silence_timeout(call_id).await,
    };
    respond(&state, call_id, prompt).await
}

/// Redirect target when a gather timed out without input.
#[instrument(skip_all, fields(call_id = %form.call_sid))]
pub async fn voice_silence(
    State(state): State<Arc<AppState>>,
    Form(form): Form<VoiceWebhookForm>,
) -> Response {
    let prompt = state.router.on_silence_timeout(&form.call_sid).await;
    respond(&state, &form.call_sid, prompt).await
}

/// Call progress callback. Terminal statuses end the session.
#[instrument(skip_all, fields(call_id = %form.call_sid))]
pub async fn voice_status(
    State(state): State<Arc<AppState>>,
    Form(form): Form<VoiceWebhookForm>,
) -> StatusCode {
    let status = form.call_status.as_deref().unwrap_or_default();
    match end_reason_for_call_status(status) {
        Some(reason) => {
            info!(status, %reason, "Call reached a terminal status");
            state.router.on_call_ended(&form.call_sid, reason).await;
        }
        None => debug!(status, "Ignoring non-terminal call status"),
    }
    StatusCode::NO_CONTENT
}

async fn respond(state: &AppState, call_id: &str, prompt: Prompt) -> Response {
    let audio_url = state.voice_prompt(call_id, &prompt).await;
    let body = render_prompt(
        &prompt,
        audio_url.as_deref(),
        &state.config.public_base_url,
        state.config.gather_timeout_secs,
    );
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}
