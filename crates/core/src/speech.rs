use async_trait::async_trait;

/// Renders agent text to playable audio.
///
/// `turn_index` is the session's turn counter for the reply being spoken,
/// which keeps artifact names unique and deterministic per call.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns a reference to the audio (e.g. a URL path), or `None` if
    /// synthesis failed and the text should be spoken by other means.
    async fn synthesize(&self, text: &str, call_id: &str, turn_index: u64) -> Option<String>;
}

/// A synthesizer that never produces audio; prompts fall back to plain text.
pub struct TextOnlySynthesizer;

#[async_trait]
impl SpeechSynthesizer for TextOnlySynthesizer {
    async fn synthesize(&self, _text: &str, _call_id: &str, _turn_index: u64) -> Option<String> {
        None
    }
}
