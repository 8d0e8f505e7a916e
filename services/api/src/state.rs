//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the event router and service clients.

use crate::config::Config;
use callagent_core::{CallEventRouter, Prompt, SessionRegistry, speech::SpeechSynthesizer};
use std::sync::Arc;
use tracing::{Instrument, warn};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<CallEventRouter>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.router.registry()
    }

    /// Synthesizes an agent reply if the prompt carries one, and releases the
    /// session from `Speaking` once the audio is ready.
    ///
    /// Runs on its own task so the session is released even if the request
    /// is dropped mid-synthesis.
    pub async fn voice_prompt(&self, call_id: &str, prompt: &Prompt) -> Option<String> {
        let turn_index = prompt.turn_index?;
        let synthesizer = self.synthesizer.clone();
        let registry = self.registry().clone();
        let call_id = call_id.to_string();
        let text = prompt.spoken_text.clone();

        let task = tokio::spawn(
            async move {
                let audio_url = synthesizer.synthesize(&text, &call_id, turn_index).await;
                if registry.config().pipeline_speech {
                    if let Err(e) = registry.finish_speaking(&call_id).await {
                        warn!(call_id = %call_id, error = %e, "Could not leave speaking state");
                    }
                }
                audio_url
            }
            .in_current_span(),
        );

        match task.await {
            Ok(audio_url) => audio_url,
            Err(e) => {
                warn!(error = %e, "Speech task failed; falling back to text");
                None
            }
        }
    }
}
