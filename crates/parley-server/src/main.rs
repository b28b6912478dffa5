//! Parley server binary.
//!
//! Starts an axum HTTP server with structured logging, wires the call session
//! manager to its providers, and ends every call on SIGTERM/SIGINT.

use parley_llm::OpenAiChat;
use parley_server::config::{self, Config, TtsProvider};
use parley_server::{app, AppState};
use parley_session::{SessionDeps, SessionManager};
use parley_voice::{
    DeepgramSpeech, DeepgramTranscriber, LiveKitService, LiveKitTransport, MediaBridge,
    PiperSynthesizer, SpeechSynthesizer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn build_state(config: &Config) -> AppState {
    let livekit = Arc::new(LiveKitService::new(config.livekit.clone()));
    if !livekit.is_enabled() {
        tracing::warn!("livekit is not configured; calls will fail to connect");
    }
    let bridge = MediaBridge::new();

    let synthesizer: Arc<dyn SpeechSynthesizer> = match config.tts.provider {
        TtsProvider::Deepgram => Arc::new(DeepgramSpeech::new(config.deepgram.clone())),
        TtsProvider::Piper => Arc::new(PiperSynthesizer::new(
            &config.tts.voices_dir,
            &config.tts.piper_binary,
        )),
    };

    let deps = SessionDeps {
        transport: Arc::new(LiveKitTransport::new(livekit, bridge.clone())),
        transcription: Arc::new(DeepgramTranscriber::new(config.deepgram.clone())),
        synthesizer,
        completion: Arc::new(OpenAiChat::new(config.llm.clone())),
    };

    AppState {
        sessions: SessionManager::new(deps, config.session.clone()),
        bridge,
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );
    tracing::debug!(livekit = ?config.livekit, deepgram = ?config.deepgram, llm = ?config.llm, "provider configuration");

    let state = build_state(&config);
    let sessions = state.sessions.clone();
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting parley server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    sessions.shutdown().await;
    tracing::info!("parley server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
