//! API Models
//!
//! Request and response shapes for the HTTP surface, documented with `utoipa`.
//! Core types are wrapped in view structs here so the core crate stays free
//! of web dependencies.

use callagent_core::{
    CallEvent, CallRecord, CallStatus, EndReason, Prompt, SessionSnapshot, SessionState, Speaker,
    Turn,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct TurnView {
    #[schema(value_type = String, example = "User")]
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl From<Turn> for TurnView {
    fn from(turn: Turn) -> Self {
        Self {
            speaker: turn.speaker,
            text: turn.text,
            timestamp: turn.timestamp,
        }
    }
}

/// A live session as held by the registry.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct CallSessionView {
    #[schema(example = "CA5f1c0e6a9d2b")]
    pub call_id: String,
    pub phone_number: Option<String>,
    #[schema(value_type = String, example = "AwaitingInput")]
    pub state: SessionState,
    pub turn_counter: u64,
    pub history: Vec<TurnView>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl From<SessionSnapshot> for CallSessionView {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            call_id: snapshot.call_id,
            phone_number: snapshot.phone_number,
            state: snapshot.state,
            turn_counter: snapshot.turn_counter,
            history: snapshot.history.into_iter().map(TurnView::from).collect(),
            created_at: snapshot.created_at,
            last_activity_at: snapshot.last_activity_at,
        }
    }
}

/// A persisted call transcript.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct CallRecordView {
    pub call_id: String,
    pub phone_number: Option<String>,
    #[schema(value_type = String, example = "Ended")]
    pub status: CallStatus,
    #[schema(value_type = Option<String>, example = "no_input")]
    pub end_reason: Option<EndReason>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub history: Vec<TurnView>,
    pub last_updated: DateTime<Utc>,
}

impl From<CallRecord> for CallRecordView {
    fn from(record: CallRecord) -> Self {
        Self {
            call_id: record.call_id,
            phone_number: record.phone_number,
            status: record.status,
            end_reason: record.end_reason,
            start_time: record.start_time,
            end_time: record.end_time,
            history: record.history.into_iter().map(TurnView::from).collect(),
            last_updated: record.last_updated,
        }
    }
}

/// An inbound call event, tagged by `type`.
#[derive(Deserialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEventPayload {
    Connected {
        #[serde(default)]
        phone_number: Option<String>,
    },
    Speech {
        text: String,
    },
    Digits {
        digits: String,
    },
    Silence,
    Ended {
        /// One of `hangup`, `user_ended`, `no_input`, `timeout`, `unanswered`, `failed`.
        #[schema(example = "hangup")]
        reason: String,
    },
}

impl TryFrom<CallEventPayload> for CallEvent {
    type Error = String;

    fn try_from(payload: CallEventPayload) -> Result<Self, Self::Error> {
        Ok(match payload {
            CallEventPayload::Connected { phone_number } => CallEvent::Connected { phone_number },
            CallEventPayload::Speech { text } => CallEvent::Speech { text },
            CallEventPayload::Digits { digits } => CallEvent::Digits { digits },
            CallEventPayload::Silence => CallEvent::Silence,
            CallEventPayload::Ended { reason } => CallEvent::Ended {
                reason: reason.parse()?,
            },
        })
    }
}

/// What the caller should hear next.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct PromptResponse {
    pub spoken_text: String,
    pub expect_input: bool,
    pub hangup: bool,
    pub turn_index: Option<u64>,
    /// Path of the synthesized reply under `/audio`, when available.
    pub audio_url: Option<String>,
}

impl PromptResponse {
    pub fn new(prompt: Prompt, audio_url: Option<String>) -> Self {
        Self {
            spoken_text: prompt.spoken_text,
            expect_input: prompt.expect_input,
            hangup: prompt.hangup,
            turn_index: prompt.turn_index,
            audio_url,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

/// The form fields Twilio posts to voice webhooks. Only `CallSid` is always present.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct VoiceWebhookForm {
    pub call_sid: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub direction: Option<String>,
    pub speech_result: Option<String>,
    pub digits: Option<String>,
    pub call_status: Option<String>,
}

/// Maps a Twilio `CallStatus` to an end reason; `None` while the call is still live.
pub fn end_reason_for_call_status(status: &str) -> Option<EndReason> {
    match status {
        "completed" => Some(EndReason::Hangup),
        "busy" | "no-answer" => Some(EndReason::Unanswered),
        "canceled" => Some(EndReason::UserEnded),
        "failed" => Some(EndReason::Failed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_payload_deserialization() {
        let connected: CallEventPayload =
            serde_json::from_str(r#"{"type": "connected", "phone_number": "+15550100"}"#).unwrap();
        assert_eq!(
            connected,
            CallEventPayload::Connected {
                phone_number: Some("+15550100".to_string())
            }
        );

        let bare: CallEventPayload = serde_json::from_str(r#"{"type": "connected"}"#).unwrap();
        assert_eq!(bare, CallEventPayload::Connected { phone_number: None });

        let silence: CallEventPayload = serde_json::from_str(r#"{"type": "silence"}"#).unwrap();
        assert_eq!(silence, CallEventPayload::Silence);
    }

    #[test]
    fn test_event_payload_missing_field() {
        let result: Result<CallEventPayload, _> = serde_json::from_str(r#"{"type": "speech"}"#);
        assert!(result.is_err());

        let result: Result<CallEventPayload, _> = serde_json::from_str(r#"{"type": "dance"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_event_payload_into_call_event() {
        let event = CallEvent::try_from(CallEventPayload::Ended {
            reason: "no_input".to_string(),
        })
        .unwrap();
        assert_eq!(
            event,
            CallEvent::Ended {
                reason: EndReason::NoInput
            }
        );

        let err = CallEvent::try_from(CallEventPayload::Ended {
            reason: "exploded".to_string(),
        })
        .unwrap_err();
        assert!(err.contains("exploded"));
    }

    #[test]
    fn test_prompt_response_serialization() {
        let response = PromptResponse::new(
            Prompt::listen("Hello!"),
            Some("/audio/response_CA1_1.mp3".to_string()),
        );

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["spoken_text"], "Hello!");
        assert_eq!(json["expect_input"], true);
        assert_eq!(json["hangup"], false);
        assert!(json["turn_index"].is_null());
        assert_eq!(json["audio_url"], "/audio/response_CA1_1.mp3");
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "Call not found".to_string(),
        };

        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, r#"{"message":"Call not found"}"#);
    }

    #[test]
    fn test_record_view_from_record() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let record = CallRecord {
            call_id: "CA1".to_string(),
            phone_number: Some("+15550100".to_string()),
            status: CallStatus::Ended,
            end_reason: Some(EndReason::Hangup),
            start_time: start,
            end_time: Some(start),
            history: vec![Turn::user("hello"), Turn::agent("hi")],
            last_updated: start,
        };

        let view = CallRecordView::from(record);
        assert_eq!(view.history.len(), 2);
        assert_eq!(view.history[0].speaker, Speaker::User);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "Ended");
        assert_eq!(json["end_reason"], "hangup");
        assert_eq!(json["history"][1]["text"], "hi");
    }

    #[test]
    fn test_voice_form_uses_twilio_field_names() {
        let form: VoiceWebhookForm = serde_json::from_str(
            r#"{"CallSid": "CA1", "From": "+15550100", "SpeechResult": "hello", "CallStatus": "in-progress"}"#,
        )
        .unwrap();

        assert_eq!(form.call_sid, "CA1");
        assert_eq!(form.from.as_deref(), Some("+15550100"));
        assert_eq!(form.speech_result.as_deref(), Some("hello"));
        assert_eq!(form.digits, None);
        assert_eq!(form.call_status.as_deref(), Some("in-progress"));
    }

    #[test]
    fn test_end_reason_for_call_status() {
        assert_eq!(end_reason_for_call_status("completed"), Some(EndReason::Hangup));
        assert_eq!(end_reason_for_call_status("busy"), Some(EndReason::Unanswered));
        assert_eq!(end_reason_for_call_status("no-answer"), Some(EndReason::Unanswered));
        assert_eq!(end_reason_for_call_status("canceled"), Some(EndReason::UserEnded));
        assert_eq!(end_reason_for_call_status("failed"), Some(EndReason::Failed));
        assert_eq!(end_reason_for_call_status("ringing"), None);
        assert_eq!(end_reason_for_call_status("in-progress"), None);
    }
}
