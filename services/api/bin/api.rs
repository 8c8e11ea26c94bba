//! Main Entrypoint for the Charla API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the persona prompts.
//! 3. Initializing the completion client with caller-side retries.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use charla_api::{config::Config, router::create_router, state::AppState};
use charla_core::{
    completion::{
        CompletionService, GenerationParams, OpenAICompatibleCompletion, RetryingCompletion,
    },
    retry::RetryPolicy,
    session::SessionConfig,
};
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const COMPLETION_RETRY_STEP: Duration = Duration::from_millis(500);

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    let entries = fs::read_dir(prompts_path)
        .with_context(|| format!("Could not read prompts from {}", prompts_path.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content.trim().to_string());
        }
    }
    Ok(prompts)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 2. Load Prompts ---
    let prompts = load_prompts(&config.prompts_path)?;
    let system_prompt = prompts
        .get("system_prompt")
        .context("system_prompt.md not found in prompts directory")?
        .replace("{persona}", &config.persona_name);

    let mut session_config = SessionConfig {
        persona_name: config.persona_name.clone(),
        max_speech_retries: config.speech_retries,
        ..SessionConfig::default()
    };
    if let Some(continuation) = prompts.get("continuation_prompt") {
        session_config.continuation_prompt = continuation.clone();
    }

    // --- 3. Initialize the Completion Service ---
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.api_key)
        .with_api_base(&config.base_url);
    let params = GenerationParams {
        model: config.chat_model.clone(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };
    let completion: Arc<dyn CompletionService> = Arc::new(RetryingCompletion::new(
        OpenAICompatibleCompletion::new(openai_config, system_prompt, params),
        RetryPolicy::linear(config.max_retries, COMPLETION_RETRY_STEP),
    ));

    match completion.check_connection().await {
        Ok(()) => info!("Completion service reachable."),
        Err(e) => warn!(error = %e, "Completion service not reachable yet."),
    }

    let app_state = Arc::new(AppState {
        completion,
        session_config: Arc::new(session_config),
        config: Arc::new(config.clone()),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.chat_model,
        persona = %config.persona_name,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
