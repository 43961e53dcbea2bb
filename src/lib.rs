// Clippy allows for reasonable defaults
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::derivable_impls)] // Explicit Default impls can be clearer
#![allow(clippy::field_reassign_with_default)] // Builder pattern is clearer
#![allow(clippy::redundant_closure)] // |x| f(x) can be clearer than f

// Module declarations
pub mod apply;
pub mod config;
pub mod events;
pub mod models;
pub mod parsers;
pub mod projects;
pub mod providers;
pub mod shutdown;
pub mod templates;
pub mod utils;

// Server module (HTTP API)
pub mod server;

pub use apply::{Engine, GenerateRequest, GenerationStream, ProgressStream};
pub use config::EngineConfig;
pub use events::{ErrorKind, GenerationEvent, InstallEvent, ProgressEvent};
pub use models::*;
pub use parsers::{parse, ParseError};
pub use projects::{ProjectStore, StoreError};
