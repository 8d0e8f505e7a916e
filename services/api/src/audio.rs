//! Synthesized Speech Files
//!
//! Renders agent replies to mp3 with the OpenAI speech endpoint and keeps the
//! audio directory from growing without bound.

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateSpeechRequestArgs, SpeechModel, SpeechResponseFormat, Voice},
};
use async_trait::async_trait;
use callagent_core::speech::SpeechSynthesizer;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// URL prefix the audio directory is served under.
pub const AUDIO_ROUTE: &str = "/audio";

pub struct OpenAISpeechSynthesizer {
    client: Client<OpenAIConfig>,
    audio_dir: PathBuf,
    voice: Voice,
}

impl OpenAISpeechSynthesizer {
    pub fn new(config: OpenAIConfig, audio_dir: PathBuf) -> Self {
        Self {
            client: Client::with_config(config),
            audio_dir,
            voice: Voice::Alloy,
        }
    }

    async fn render(&self, text: &str, path: &Path) -> anyhow::Result<()> {
        let request = CreateSpeechRequestArgs::default()
            .input(text)
            .voice(self.voice.clone())
            .model(SpeechModel::Tts1)
            .response_format(SpeechResponseFormat::Mp3)
            .build()?;

        let response = self.client.audio().speech(request).await?;
        response.save(path).await?;
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAISpeechSynthesizer {
    #[instrument(skip(self, text))]
    async fn synthesize(&self, text: &str, call_id: &str, turn_index: u64) -> Option<String> {
        let file_name = audio_file_name(call_id, turn_index);
        let path = self.audio_dir.join(&file_name);

        match self.render(text, &path).await {
            Ok(()) => {
                debug!(file = %file_name, "Speech synthesized");
                Some(format!("{}/{}", AUDIO_ROUTE, file_name))
            }
            Err(e) => {
                error!(error = ?e, "Speech synthesis failed; falling back to text");
                None
            }
        }
    }
}

/// `response_<callId>_<turnIndex>.mp3`. Call ids made only of `[A-Za-z0-9-]`
/// are used as-is; any other id is hex-encoded behind a `_` marker, so
/// distinct ids never share a file and none can escape the audio directory.
pub fn audio_file_name(call_id: &str, turn_index: u64) -> String {
    let is_plain = !call_id.is_empty()
        && call_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if is_plain {
        format!("response_{}_{}.mp3", call_id, turn_index)
    } else {
        format!("response__{}_{}.mp3", hex::encode(call_id), turn_index)
    }
}

/// Deletes files in `dir` last modified more than `max_age` ago.
/// Returns how many were removed.
pub async fn cleanup_old_audio(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age > max_age {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = ?entry.path(), error = %e, "Failed to remove old audio file"),
            }
        }
    }
    Ok(removed)
}

pub fn spawn_audio_cleanup(dir: PathBuf, max_age: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match cleanup_old_audio(&dir, max_age).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Removed old audio files"),
                Err(e) => error!(error = %e, dir = ?dir, "Audio cleanup failed"),
            }
        }
    })
}
