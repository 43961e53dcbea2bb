// Graceful shutdown: signal trapping, sandbox teardown and store close

use crate::apply::Engine;
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often `requested()` re-checks the flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shutdown flags shared between signal handlers, the server and `main`
#[derive(Clone, Default)]
pub struct ShutdownState {
    requested: Arc<AtomicBool>,
    cleaned_up: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            log::info!("Shutdown requested");
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once a shutdown has been requested
    pub async fn requested(&self) {
        while !self.is_shutdown_requested() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn mark_cleanup_complete(&self) {
        self.cleaned_up.store(true, Ordering::SeqCst);
    }

    pub fn is_cleanup_complete(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }
}

/// What the cleanup did
#[derive(Debug, Clone, Default)]
pub struct ShutdownResult {
    pub sandboxes_terminated: usize,
    /// Projects held by the store when it closed
    pub projects_saved: usize,
    pub errors: Vec<String>,
}

impl ShutdownResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct ShutdownHandler {
    state: ShutdownState,
}

impl ShutdownHandler {
    pub fn with_state(state: ShutdownState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ShutdownState {
        &self.state
    }

    /// Terminate sandboxes and close the store.
    /// Running operations see a closed store on their next store access.
    pub async fn handle_shutdown(&self, engine: &Engine) -> ShutdownResult {
        self.state.request_shutdown();
        log::info!("Starting graceful shutdown...");

        let mut result = ShutdownResult {
            projects_saved: engine.store().len().await,
            ..ShutdownResult::default()
        };
        result.sandboxes_terminated = engine.sandboxes().terminate_all().await;
        if let Err(e) = engine.store().shutdown().await {
            result.errors.push(e.to_string());
        }

        log::info!(
            "Shutdown complete: {} sandbox(es) terminated, {} project(s) in store",
            result.sandboxes_terminated,
            result.projects_saved
        );
        for error in &result.errors {
            log::warn!("Cleanup error: {}", error);
        }

        self.state.mark_cleanup_complete();
        result
    }
}

/// Request a shutdown on SIGINT, SIGTERM or SIGHUP
#[cfg(unix)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])
        .map_err(|e| anyhow!("Failed to register signal handlers: {}", e))?;

    std::thread::spawn(move || {
        for signal in signals.forever() {
            let name = match signal {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                _ => "SIGHUP",
            };
            log::info!("Received {}", name);
            state.request_shutdown();
        }
    });

    log::debug!("Signal handlers registered");
    Ok(())
}

/// Request a shutdown on Ctrl+C
#[cfg(windows)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C");
        state.request_shutdown();
    })
    .map_err(|e| anyhow!("Failed to register Ctrl+C handler: {}", e))?;

    log::debug!("Signal handler registered");
    Ok(())
}
