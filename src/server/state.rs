//! Server application state shared across handlers

use crate::apply::Engine;
use crate::shutdown::ShutdownState;
use std::sync::Arc;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct ServerAppState {
    /// Core operations: parsing, apply, generate and conversation state
    pub engine: Arc<Engine>,

    /// Shutdown state
    pub shutdown_state: ShutdownState,
}

impl ServerAppState {
    pub fn new(engine: Arc<Engine>, shutdown_state: ShutdownState) -> Self {
        Self {
            engine,
            shutdown_state,
        }
    }
}
