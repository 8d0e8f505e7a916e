//! Main Entrypoint for the Call Agent API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Choosing the transcript store (Postgres with migrations, or in-memory).
//! 3. Initializing shared services (the model client, speech synthesis, the
//!    session registry and the call event router).
//! 4. Spawning the idle-session reaper and the audio cleanup task.
//! 5. Constructing the Axum router, applying middleware and serving until Ctrl+C.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use callagent_api::{
    audio::{OpenAISpeechSynthesizer, spawn_audio_cleanup},
    config::{Config, Provider},
    db::PgTranscriptStore,
    router::create_router,
    state::AppState,
};
use callagent_core::{
    CallEventRouter, InMemoryTranscriptStore, RegistryConfig, RouterConfig, SessionRegistry,
    TranscriptStore,
    llm_client::{ModelClient, OpenAICompatibleClient},
    speech::{SpeechSynthesizer, TextOnlySynthesizer},
};
use sqlx::PgPool;
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const AUDIO_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in std::fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

fn provider_config(config: &Config) -> anyhow::Result<OpenAIConfig> {
    let openai_config = match config.provider {
        Provider::OpenAI => OpenAIConfig::new()
            .with_api_key(
                config
                    .openai_api_key
                    .as_deref()
                    .context("OPENAI_API_KEY is required for the openai provider")?,
            )
            .with_api_base("https://api.openai.com/v1/"),
        Provider::Gemini => OpenAIConfig::new()
            .with_api_key(
                config
                    .gemini_api_key
                    .as_deref()
                    .context("GEMINI_API_KEY is required for the gemini provider")?,
            )
            .with_api_base("https://generativelanguage.googleapis.com/v1beta/openai"),
    };
    Ok(openai_config)
}

async fn transcript_store(config: &Config) -> anyhow::Result<Arc<dyn TranscriptStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url)
                .await
                .context("Failed to connect to database")?;
            let store = PgTranscriptStore::new(pool);
            store.run_migrations().await?;
            info!("Database connection established and migrations are up-to-date.");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; transcripts will be kept in memory only.");
            Ok(Arc::new(InMemoryTranscriptStore::new()))
        }
    }
}

async fn speech_synthesizer(config: &Config) -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
    if !config.tts_enabled {
        info!("Speech synthesis disabled; replies will use <Say>.");
        return Ok(Arc::new(TextOnlySynthesizer));
    }
    let Some(api_key) = config.openai_api_key.as_deref() else {
        warn!("TTS_ENABLED is set but OPENAI_API_KEY is missing; replies will use <Say>.");
        return Ok(Arc::new(TextOnlySynthesizer));
    };

    tokio::fs::create_dir_all(&config.audio_dir)
        .await
        .with_context(|| format!("Failed to create audio directory {:?}", config.audio_dir))?;
    let openai_config = OpenAIConfig::new().with_api_key(api_key);
    Ok(Arc::new(OpenAISpeechSynthesizer::new(
        openai_config,
        config.audio_dir.clone(),
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize the Transcript Store ---
    let store = transcript_store(&config).await?;

    // --- 4. Initialize Shared Services ---
    let prompts = load_prompts(&config.prompts_path)?;
    let system_prompt = prompts
        .get("system_prompt")
        .context("system_prompt.md not found in prompts directory")?
        .clone();

    info!(provider = ?config.provider, "Initializing model client.");
    let model: Arc<dyn ModelClient> = Arc::new(OpenAICompatibleClient::new(
        provider_config(&config)?,
        config.chat_model.clone(),
        system_prompt,
    ));
    let synthesizer = speech_synthesizer(&config).await?;

    let registry = Arc::new(SessionRegistry::new(
        store,
        model,
        RegistryConfig {
            model_timeout: config.model_timeout,
            pipeline_speech: config.tts_enabled,
            ..RegistryConfig::default()
        },
    ));
    let router = Arc::new(CallEventRouter::new(
        registry.clone(),
        RouterConfig {
            max_silence_prompts: config.max_silence_prompts,
            ..RouterConfig::default()
        },
    ));

    // --- 5. Background Tasks ---
    let reaper = registry
        .clone()
        .spawn_reaper(config.reap_interval, config.session_idle_timeout);
    let cleanup = spawn_audio_cleanup(
        config.audio_dir.clone(),
        config.audio_max_age,
        AUDIO_CLEANUP_INTERVAL,
    );

    let app_state = Arc::new(AppState {
        router,
        synthesizer,
        config: Arc::new(config.clone()),
    });

    // --- 6. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 7. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        tts_enabled = config.tts_enabled,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    reaper.abort();
    cleanup.abort();
    info!(live_sessions = registry.len().await, "Server has shut down.");
    Ok(())
}
