use builder_engine_lib::apply::Engine;
use builder_engine_lib::config::secrets::SecretsConfig;
use builder_engine_lib::config::{EngineConfig, PartialEngineConfig};
use builder_engine_lib::projects::ProjectStore;
use builder_engine_lib::server::{self, ServerAppState};
use builder_engine_lib::shutdown::{register_signal_handlers, ShutdownHandler, ShutdownState};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Builder Engine - AI code generation backend for sandboxed React projects
#[derive(Parser, Debug)]
#[command(name = "builder-engine")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.builder-engine/config.toml when present)
    #[arg(long, env = "BUILDER_CONFIG")]
    config: Option<PathBuf>,

    /// Port to bind the server to
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind the server to
    #[arg(long)]
    bind: Option<String>,

    /// Directory holding one sandbox directory per project
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Default model as `provider/model`
    #[arg(long)]
    model: Option<String>,
}

impl Cli {
    fn overrides(&self) -> PartialEngineConfig {
        PartialEngineConfig {
            port: self.port,
            bind: self.bind.clone(),
            workspace_root: self.workspace_root.clone(),
            default_model: self.model.clone(),
            ..PartialEngineConfig::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = match EngineConfig::load(cli.config.as_deref(), Some(cli.overrides())) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match SecretsConfig::load() {
        Ok(secrets) => secrets.fill_missing(&mut config.ai.api_keys),
        Err(e) => log::warn!("Failed to load secrets: {}", e),
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let exit_code = rt.block_on(run_server_mode(config));
    std::process::exit(exit_code);
}

async fn run_server_mode(config: EngineConfig) -> i32 {
    // Initialize shutdown state
    let shutdown_state = ShutdownState::new();
    if let Err(e) = register_signal_handlers(shutdown_state.clone()) {
        log::warn!("Failed to register signal handlers: {}", e);
    }

    let store = match ProjectStore::init(config.conversation.clone()).await {
        Ok(store) => store,
        Err(e) => {
            log::error!("Failed to initialize project store: {}", e);
            return 1;
        }
    };

    let engine = match Engine::with_local_sandboxes(store, config.clone()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            log::error!("Failed to initialize engine: {}", e);
            return 1;
        }
    };
    let cleanup_task = Engine::start_cleanup_task(engine.clone());

    log::info!(
        "Sandboxes under {}, default model {}",
        config.sandbox.workspace_root.display(),
        config.ai.default_model
    );

    let state = ServerAppState::new(engine.clone(), shutdown_state.clone());
    let server_result = server::run_server(&config.server, state).await;

    if let Some(task) = cleanup_task {
        task.abort();
    }
    let result = ShutdownHandler::with_state(shutdown_state)
        .handle_shutdown(&engine)
        .await;

    match server_result {
        Err(e) => {
            log::error!("Server error: {}", e);
            1
        }
        Ok(()) if !result.is_clean() => 1,
        Ok(()) => 0,
    }
}
