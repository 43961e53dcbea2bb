// Apply and generate operations
//
// Both run as a spawned producer task that sends events through a bounded
// channel. The caller consumes an `EventStream`; dropping it cancels the
// operation before its next step.

pub mod generate;
mod pipeline;
mod sandbox_ops;
pub mod sandboxes;

use crate::config::EngineConfig;
use crate::events::{ErrorKind, GenerationEvent, ProgressEvent};
use crate::models::{ConversationState, FileOp, ParsedResponse, StatePatch, TrimReport};
use crate::parsers::{self, Detection, ParseError};
use crate::projects::{ProjectStore, StoreError};
use crate::providers::AiProvider;
use crate::templates::TemplateEngine;
use anyhow::Result;
use futures_util::Stream;
use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use generate::GenerateRequest;
pub use sandbox_ops::{InstallEventStream, SandboxOpError};
pub use sandboxes::{LocalSandboxFactory, SandboxFactory, SandboxRegistry};

/// How often the idle-eviction task wakes up
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Receiving half of an operation's event channel
pub struct EventStream<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> EventStream<T> {
    fn new(rx: mpsc::Receiver<T>) -> Self {
        Self { rx }
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

pub type ProgressStream = EventStream<ProgressEvent>;
pub type GenerationStream = EventStream<GenerationEvent>;

/// Failure kind reported when the store refuses an operation
pub(crate) fn store_error_kind(error: &StoreError) -> ErrorKind {
    match error {
        StoreError::Closed => ErrorKind::StoreClosed,
        StoreError::InvalidProjectId(_) => ErrorKind::InvalidProjectId,
    }
}

/// Entry point for every core operation.
///
/// Owns the project store, the sandboxes and the prompt templates.
pub struct Engine {
    store: Arc<ProjectStore>,
    config: EngineConfig,
    sandboxes: SandboxRegistry,
    prompts: TemplateEngine,
    /// Used for every model instead of the configured providers
    ai_override: Option<Arc<dyn AiProvider>>,
}

impl Engine {
    /// Engine without a sandbox factory; sandboxes must be attached explicitly
    pub fn new(store: Arc<ProjectStore>, config: EngineConfig) -> Result<Self> {
        Ok(Self {
            store,
            config,
            sandboxes: SandboxRegistry::new(None),
            prompts: TemplateEngine::new()?,
            ai_override: None,
        })
    }

    /// Engine that creates a directory-backed sandbox per project
    pub fn with_local_sandboxes(store: Arc<ProjectStore>, config: EngineConfig) -> Result<Self> {
        let factory = LocalSandboxFactory::new(config.sandbox.clone());
        Ok(Self::new(store, config)?.with_sandbox_factory(Arc::new(factory)))
    }

    pub fn with_sandbox_factory(mut self, factory: Arc<dyn SandboxFactory>) -> Self {
        self.sandboxes = SandboxRegistry::new(Some(factory));
        self
    }

    pub fn with_ai_provider(mut self, provider: Arc<dyn AiProvider>) -> Self {
        self.ai_override = Some(provider);
        self
    }

    pub fn store(&self) -> &Arc<ProjectStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sandboxes(&self) -> &SandboxRegistry {
        &self.sandboxes
    }

    // ------------------------------------------------------------------
    // Parsing and detection
    // ------------------------------------------------------------------

    pub fn parse(&self, raw: &str) -> Result<ParsedResponse, ParseError> {
        parsers::parse(raw)
    }

    /// Detect and classify the packages used by `files`
    pub fn detect_packages(
        &self,
        files: &[FileOp],
        explicit: &BTreeSet<String>,
        installed: &BTreeSet<String>,
    ) -> Detection {
        parsers::detect_packages(files, explicit, installed, &self.config.parsing.builtins)
    }

    /// Detect packages against a project's known installed set
    pub async fn detect_for_project(
        &self,
        project_id: &str,
        files: &[FileOp],
        explicit: &BTreeSet<String>,
    ) -> Result<Detection, StoreError> {
        let context = self.store.get_or_create(project_id).await?;
        let installed = context.installed_packages().await.unwrap_or_default();
        Ok(self.detect_packages(files, explicit, &installed))
    }

    // ------------------------------------------------------------------
    // Conversation state
    // ------------------------------------------------------------------

    pub async fn get_state(&self, project_id: &str) -> Result<ConversationState, StoreError> {
        self.store.get_state(project_id).await
    }

    pub async fn update_state(
        &self,
        project_id: &str,
        patch: StatePatch,
    ) -> Result<ConversationState, StoreError> {
        self.store.update(project_id, patch).await
    }

    pub async fn reset_state(&self, project_id: &str) -> Result<(), StoreError> {
        self.store.reset(project_id).await
    }

    /// Trim a conversation with the configured retention limits
    pub async fn clear_old(&self, project_id: &str) -> Result<TrimReport, StoreError> {
        let policy = self.config.conversation.trim_policy();
        self.store.trim(project_id, &policy).await
    }

    /// Remove a project and terminate its sandbox. Returns whether anything
    /// existed; unknown ids are a no-op.
    pub async fn delete_state(&self, project_id: &str) -> Result<bool, StoreError> {
        let removed = self.store.delete(project_id).await?;
        if let Some(context) = &removed {
            context.detach_sandbox();
        }
        let released = self.sandboxes.release(project_id).await;
        Ok(removed.is_some() || released)
    }

    // ------------------------------------------------------------------
    // Streamed operations
    // ------------------------------------------------------------------

    fn channel<T>(&self) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
        mpsc::channel(self.config.apply.channel_capacity.max(1))
    }

    /// Apply a parsed response to a project's sandbox.
    ///
    /// The returned stream ends with exactly one `Completed` or `Failed`
    /// event unless it is dropped first.
    pub fn apply(self: &Arc<Self>, parsed: ParsedResponse, project_id: &str) -> ProgressStream {
        let (tx, rx) = self.channel();
        let engine = Arc::clone(self);
        let project_id = project_id.to_string();
        tokio::spawn(async move {
            pipeline::run(engine, parsed, project_id, tx).await;
        });
        EventStream::new(rx)
    }

    /// Generate code for a prompt, streaming tokens as they arrive
    pub fn generate(self: &Arc<Self>, project_id: &str, request: GenerateRequest) -> GenerationStream {
        let (tx, rx) = self.channel();
        let engine = Arc::clone(self);
        let project_id = project_id.to_string();
        tokio::spawn(async move {
            generate::run(engine, project_id, request, tx).await;
        });
        EventStream::new(rx)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Evict idle projects and release their sandboxes
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let evicted = self.store.evict_idle(max_idle).await;
        for context in &evicted {
            context.detach_sandbox();
            self.sandboxes.release(context.project_id()).await;
        }
        evicted.len()
    }

    /// Start the background idle-eviction task; `None` when eviction is disabled
    pub fn start_cleanup_task(engine: Arc<Self>) -> Option<JoinHandle<()>> {
        let max_idle = engine.config.conversation.idle_timeout()?;

        Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(CLEANUP_INTERVAL).await;
                if engine.store.is_closed() {
                    break;
                }
                let evicted = engine.evict_idle(max_idle).await;
                if evicted > 0 {
                    log::info!("[Engine] Evicted {} idle project(s)", evicted);
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversationConfig;
    use crate::models::{Message, Role};

    fn engine() -> Arc<Engine> {
        let store = Arc::new(ProjectStore::new(ConversationConfig::default()));
        Arc::new(Engine::new(store, EngineConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_get_state_creates_lazily() {
        let engine = engine();
        let state = engine.get_state("p1").await.unwrap();
        assert_eq!(state.project_id, "p1");
        assert!(state.messages.is_empty());
        assert_eq!(engine.store().len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_project_is_noop() {
        let engine = engine();
        assert!(!engine.delete_state("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_old_uses_configured_limits() {
        let engine = engine();
        for n in 0..8 {
            engine
                .store()
                .append_message("p1", Message::new(Role::User, format!("m{}", n)))
                .await
                .unwrap();
        }
        let report = engine.clear_old("p1").await.unwrap();
        assert_eq!(report.messages_removed, 3);
        let state = engine.get_state("p1").await.unwrap();
        assert_eq!(state.messages.len(), 5);
        assert_eq!(state.messages[0].content, "m3");
    }

    #[tokio::test]
    async fn test_detect_for_project_uses_installed_cache() {
        let engine = engine();
        let context = engine.store().get_or_create("p1").await.unwrap();
        context.extend_installed(["react".to_string()]).await;

        let files = vec![FileOp {
            path: "src/App.jsx".to_string(),
            content: "import React from 'react';\nimport axios from 'axios';".to_string(),
        }];
        let detection = engine
            .detect_for_project("p1", &files, &BTreeSet::new())
            .await
            .unwrap();
        assert!(detection.classification.already_installed.contains("react"));
        assert!(detection.classification.to_install.contains("axios"));
    }

    #[tokio::test]
    async fn test_evict_idle_releases_projects() {
        let engine = engine();
        engine.get_state("p1").await.unwrap();
        assert_eq!(engine.evict_idle(Duration::ZERO).await, 1);
        assert!(engine.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_cleanup_task_respects_idle_timeout() {
        let mut config = EngineConfig::default();
        config.conversation.idle_timeout_mins = 0;
        let store = Arc::new(ProjectStore::new(config.conversation.clone()));
        let disabled = Arc::new(Engine::new(store, config.clone()).unwrap());
        assert!(Engine::start_cleanup_task(disabled).is_none());

        config.conversation.idle_timeout_mins = u64::MAX;
        let store = Arc::new(ProjectStore::new(config.conversation.clone()));
        let enabled = Arc::new(Engine::new(store, config).unwrap());
        let handle = Engine::start_cleanup_task(enabled).unwrap();
        handle.abort();
    }
}
