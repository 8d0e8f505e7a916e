//! Call Event Router
//!
//! Translates telephony events into registry operations and decides what
//! the caller hears next. Holds no per-call state of its own: everything it
//! needs (including the silence counter) lives on the session.

use crate::error::SessionError;
use crate::registry::SessionRegistry;
use crate::session::EndReason;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What to say next and how the call should continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub spoken_text: String,
    /// Listen for the caller after speaking.
    pub expect_input: bool,
    /// Hang up after speaking.
    pub hangup: bool,
    /// Present when `spoken_text` is an agent reply; the index to synthesize it under.
    pub turn_index: Option<u64>,
}

impl Prompt {
    pub fn listen(text: impl Into<String>) -> Self {
        Self {
            spoken_text: text.into(),
            expect_input: true,
            hangup: false,
            turn_index: None,
        }
    }

    pub fn goodbye(text: impl Into<String>) -> Self {
        Self {
            spoken_text: text.into(),
            expect_input: false,
            hangup: true,
            turn_index: None,
        }
    }

    pub fn hangup() -> Self {
        Self::goodbye(String::new())
    }
}

/// An inbound event from the telephony layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEvent {
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
        reason: EndReason,
    },
}

/// Decides what to say when the caller presses keys.
pub trait DigitPolicy: Send + Sync {
    fn respond(&self, digits: &str) -> String;
}

/// Acknowledges the keys and steers the caller back to speech.
pub struct AcknowledgeDigits;

impl DigitPolicy for AcknowledgeDigits {
    fn respond(&self, digits: &str) -> String {
        format!("You pressed {}. Let's continue the conversation.", digits)
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub greeting: String,
    pub reprompt: String,
    pub hold: String,
    pub no_input_reprompt: String,
    pub goodbye: String,
    /// Spoken when an event arrives for a call with no live session.
    pub ended: String,
    /// Consecutive silence timeouts that end the call.
    pub max_silence_prompts: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            greeting: "Hello! I am your AI agent. How can I help you today?".to_string(),
            reprompt: "I didn't quite catch that. Could you please repeat?".to_string(),
            hold: "I'm still working on your last request. Please hold on.".to_string(),
            no_input_reprompt: "I didn't hear anything. Are you still there?".to_string(),
            goodbye: "I apologize, I didn't receive any input. Thank you for calling. Goodbye."
                .to_string(),
            ended: "Sorry, this call is no longer active. Goodbye.".to_string(),
            max_silence_prompts: 2,
        }
    }
}

pub struct CallEventRouter {
    registry: Arc<SessionRegistry>,
    config: RouterConfig,
    digits: Arc<dyn DigitPolicy>,
}

impl CallEventRouter {
    pub fn new(registry: Arc<SessionRegistry>, config: RouterConfig) -> Self {
        Self::with_digit_policy(registry, config, Arc::new(AcknowledgeDigits))
    }

    pub fn with_digit_policy(
        registry: Arc<SessionRegistry>,
        config: RouterConfig,
        digits: Arc<dyn DigitPolicy>,
    ) -> Self {
        Self {
            registry,
            config,
            digits,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Dispatches a tagged event to its handler.
    pub async fn handle(&self, call_id: &str, event: CallEvent) -> Prompt {
        match event {
            CallEvent::Connected { phone_number } => {
                self.on_call_connected(call_id, phone_number).await
            }
            CallEvent::Speech { text } => self.on_speech_recognized(call_id, &text).await,
            CallEvent::Digits { digits } => self.on_digits(call_id, &digits).await,
            CallEvent::Silence => self.on_silence_timeout(call_id).await,
            CallEvent::Ended { reason } => self.on_call_ended(call_id, reason).await,
        }
    }

    #[instrument(skip(self))]
    pub async fn on_call_connected(&self, call_id: &str, phone_number: Option<String>) -> Prompt {
        match self.registry.create(call_id, phone_number).await {
            Ok(_) => Prompt::listen(self.config.greeting.clone()),
            Err(e) => self.no_session(e),
        }
    }

    #[instrument(skip(self, text))]
    pub async fn on_speech_recognized(&self, call_id: &str, text: &str) -> Prompt {
        let text = text.trim();
        if text.is_empty() {
            debug!("Empty transcript; re-prompting");
            return match self.registry.get(call_id).await {
                Some(_) => Prompt::listen(self.config.reprompt.clone()),
                None => self.no_session(SessionError::NotFound(call_id.to_string())),
            };
        }

        match self.registry.process_turn(call_id, text).await {
            Ok(reply) => Prompt {
                spoken_text: reply.text,
                expect_input: true,
                hangup: false,
                turn_index: reply.turn_index,
            },
            Err(SessionError::ConcurrentTurnRejected(_)) => {
                info!("Turn already in progress; asking caller to hold");
                Prompt::listen(self.config.hold.clone())
            }
            Err(e) => self.no_session(e),
        }
    }

    #[instrument(skip(self))]
    pub async fn on_silence_timeout(&self, call_id: &str) -> Prompt {
        let silences = match self.registry.record_silence(call_id).await {
            Ok(count) => count,
            Err(e) => return self.no_session(e),
        };

        if silences >= self.config.max_silence_prompts.max(1) {
            info!(silences, "No input after repeated prompts; ending call");
            self.registry.end(call_id, EndReason::NoInput).await;
            Prompt::goodbye(self.config.goodbye.clone())
        } else {
            Prompt::listen(self.config.no_input_reprompt.clone())
        }
    }

    #[instrument(skip(self))]
    pub async fn on_digits(&self, call_id: &str, digits: &str) -> Prompt {
        match self.registry.touch(call_id).await {
            Ok(()) => Prompt::listen(self.digits.respond(digits)),
            Err(e) => self.no_session(e),
        }
    }

    #[instrument(skip(self))]
    pub async fn on_call_ended(&self, call_id: &str, reason: EndReason) -> Prompt {
        self.registry.end(call_id, reason).await;
        Prompt::hangup()
    }

    fn no_session(&self, err: SessionError) -> Prompt {
        warn!(error = %err, "Event for a call without a live session");
        Prompt::goodbye(self.config.ended.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::llm_client::{MockModelClient, ModelClient};
    use crate::registry::RegistryConfig;
    use crate::session::{CallStatus, SessionState, Speaker, Turn};
    use crate::transcript::{InMemoryTranscriptStore, TranscriptStore};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn router(model: Arc<dyn ModelClient>) -> (CallEventRouter, Arc<InMemoryTranscriptStore>) {
        let store = Arc::new(InMemoryTranscriptStore::new());
        let registry = Arc::new(SessionRegistry::new(
            store.clone(),
            model,
            RegistryConfig::default(),
        ));
        (CallEventRouter::new(registry, RouterConfig::default()), store)
    }

    fn replying(text: &'static str) -> Arc<dyn ModelClient> {
        let mut model = MockModelClient::new();
        model.expect_reply().returning(move |_, _| Ok(text.to_string()));
        Arc::new(model)
    }

    #[tokio::test]
    async fn test_connect_greets_without_model_call() {
        let mut model = MockModelClient::new();
        model.expect_reply().never();
        let (router, _store) = router(Arc::new(model));

        let prompt = router.on_call_connected("A", None).await;
        assert_eq!(prompt, Prompt::listen(RouterConfig::default().greeting));
        assert_eq!(
            router.registry().get("A").await.unwrap().state,
            SessionState::AwaitingInput
        );
    }

    #[tokio::test]
    async fn test_speech_returns_reply_and_listens() {
        let (router, _store) = router(replying("hi there"));
        router.on_call_connected("A", None).await;

        let prompt = router.on_speech_recognized("A", "  hello ").await;
        assert_eq!(prompt.spoken_text, "hi there");
        assert!(prompt.expect_input);
        assert!(!prompt.hangup);
        assert_eq!(prompt.turn_index, Some(1));

        let history = router.registry().get("A").await.unwrap().history;
        assert_eq!(history[0].text, "hello");
    }

    #[tokio::test]
    async fn test_blank_speech_reprompts_without_turn() {
        let mut model = MockModelClient::new();
        model.expect_reply().never();
        let (router, _store) = router(Arc::new(model));
        router.on_call_connected("A", None).await;

        let prompt = router.on_speech_recognized("A", "   ").await;
        assert_eq!(prompt, Prompt::listen(RouterConfig::default().reprompt));
        assert!(router.registry().get("A").await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn test_model_failure_is_spoken_as_fallback() {
        let mut model = MockModelClient::new();
        model
            .expect_reply()
            .returning(|_, _| Err(ModelError::Timeout));
        let (router, _store) = router(Arc::new(model));
        router.on_call_connected("A", None).await;

        let prompt = router.on_speech_recognized("A", "hello").await;
        assert_eq!(prompt.spoken_text, crate::registry::DEFAULT_FALLBACK_MESSAGE);
        assert!(prompt.expect_input);
        assert_eq!(prompt.turn_index, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_speech_during_turn_asks_to_hold() {
        struct Gate(Notify, Notify);

        #[async_trait]
        impl ModelClient for Gate {
            async fn reply(&self, _: &[Turn], _: &str) -> Result<String, ModelError> {
                self.0.notify_one();
                self.1.notified().await;
                Ok("done".to_string())
            }
        }

        let gate = Arc::new(Gate(Notify::new(), Notify::new()));
        let (router, _store) = router(gate.clone());
        let router = Arc::new(router);
        router.on_call_connected("A", None).await;

        let first = {
            let router = router.clone();
            tokio::spawn(async move { router.on_speech_recognized("A", "first").await })
        };
        gate.0.notified().await;

        let second = router.on_speech_recognized("A", "second").await;
        assert_eq!(second, Prompt::listen(RouterConfig::default().hold));

        gate.1.notify_one();
        assert_eq!(first.await.unwrap().spoken_text, "done");
    }

    #[tokio::test]
    async fn test_repeated_silence_ends_call() {
        let (router, store) = router(replying("unused"));
        router.on_call_connected("B", None).await;

        let first = router.on_silence_timeout("B").await;
        assert_eq!(first, Prompt::listen(RouterConfig::default().no_input_reprompt));

        let second = router.on_silence_timeout("B").await;
        assert_eq!(second, Prompt::goodbye(RouterConfig::default().goodbye));

        assert_eq!(
            router.registry().process_turn("B", "hello?").await,
            Err(SessionError::NotFound("B".into()))
        );
        let record = store.get_record("B").await.unwrap();
        assert_eq!(record.status, CallStatus::Ended);
        assert_eq!(record.end_reason, Some(EndReason::NoInput));
    }

    #[tokio::test]
    async fn test_speech_between_silences_resets_count() {
        let (router, _store) = router(replying("ok"));
        router.on_call_connected("B", None).await;

        router.on_silence_timeout("B").await;
        router.on_speech_recognized("B", "I'm here").await;
        let prompt = router.on_silence_timeout("B").await;
        assert!(!prompt.hangup);
        assert!(router.registry().get("B").await.is_some());
    }

    #[tokio::test]
    async fn test_digits_acknowledged_without_model() {
        let mut model = MockModelClient::new();
        model.expect_reply().never();
        let (router, _store) = router(Arc::new(model));
        router.on_call_connected("A", None).await;

        let prompt = router.on_digits("A", "42").await;
        assert_eq!(
            prompt,
            Prompt::listen("You pressed 42. Let's continue the conversation.")
        );
    }

    #[tokio::test]
    async fn test_custom_digit_policy() {
        struct Menu;
        impl DigitPolicy for Menu {
            fn respond(&self, digits: &str) -> String {
                match digits {
                    "0" => "Connecting you to the menu.".to_string(),
                    _ => "Unknown option.".to_string(),
                }
            }
        }

        let store = Arc::new(InMemoryTranscriptStore::new());
        let registry = Arc::new(SessionRegistry::new(
            store,
            replying("unused"),
            RegistryConfig::default(),
        ));
        let router =
            CallEventRouter::with_digit_policy(registry, RouterConfig::default(), Arc::new(Menu));
        router.on_call_connected("A", None).await;
        assert_eq!(
            router.on_digits("A", "0").await.spoken_text,
            "Connecting you to the menu."
        );
    }

    #[tokio::test]
    async fn test_events_for_unknown_call_hang_up() {
        let (router, _store) = router(replying("unused"));
        let ended = Prompt::goodbye(RouterConfig::default().ended);

        assert_eq!(router.on_speech_recognized("ghost", "hello").await, ended);
        assert_eq!(router.on_speech_recognized("ghost", "").await, ended);
        assert_eq!(router.on_silence_timeout("ghost").await, ended);
        assert_eq!(router.on_digits("ghost", "1").await, ended);
        assert_eq!(
            router.on_call_ended("ghost", EndReason::Hangup).await,
            Prompt::hangup()
        );
    }

    #[tokio::test]
    async fn test_call_ended_persists_reason_and_blocks_reconnect() {
        let (router, store) = router(replying("hi"));
        router.on_call_connected("A", Some("+15550100".into())).await;
        router.on_speech_recognized("A", "hello").await;
        router.on_call_ended("A", EndReason::Hangup).await;
        // Double-fired hangup is harmless.
        router.on_call_ended("A", EndReason::Hangup).await;

        let speakers: Vec<Speaker> = store
            .get_history("A")
            .await
            .unwrap()
            .iter()
            .map(|t| t.speaker)
            .collect();
        assert_eq!(speakers, vec![Speaker::User, Speaker::Agent, Speaker::System]);

        let prompt = router.on_call_connected("A", None).await;
        assert!(prompt.hangup);
    }

    #[tokio::test]
    async fn test_handle_dispatches_tagged_events() {
        let (router, _store) = router(replying("sure"));
        let event: CallEvent =
            serde_json::from_str(r#"{"type":"connected","phone_number":"+15550100"}"#).unwrap();
        assert!(router.handle("A", event).await.expect_input);

        let event: CallEvent = serde_json::from_str(r#"{"type":"speech","text":"hi"}"#).unwrap();
        assert_eq!(router.handle("A", event).await.spoken_text, "sure");

        let event: CallEvent =
            serde_json::from_str(r#"{"type":"ended","reason":"user_ended"}"#).unwrap();
        assert!(router.handle("A", event).await.hangup);
        assert!(router.registry().get("A").await.is_none());
    }
}
