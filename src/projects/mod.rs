// Conversation/project state store
//
// Process-wide registry of project contexts, created by the entry point and
// passed to everything that needs it. Each context has its own locks; the
// registry lock is only held to look up, insert or remove entries.

pub mod context;
pub mod conversation;
pub mod persistence;

use crate::config::ConversationConfig;
use crate::models::{ConversationState, EditRecord, Message, StatePatch, TrimPolicy, TrimReport};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

pub use context::ProjectContext;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Project store has been shut down")]
    Closed,

    #[error("Invalid project id: {0}")]
    InvalidProjectId(String),
}

pub struct ProjectStore {
    contexts: RwLock<HashMap<String, Arc<ProjectContext>>>,
    config: ConversationConfig,
    closed: AtomicBool,
}

impl ProjectStore {
    /// Empty store with no snapshot loading
    pub fn new(config: ConversationConfig) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Create the store, restoring conversations from the snapshot when one
    /// is configured. Restored conversations are trimmed like live ones.
    pub async fn init(config: ConversationConfig) -> Result<Arc<Self>> {
        let store = Self::new(config);

        if let Some(path) = store.config.snapshot_path.clone() {
            let states = tokio::task::spawn_blocking(move || persistence::load_snapshot(&path))
                .await
                .map_err(|e| anyhow!("Snapshot loading task failed: {}", e))??;

            let policy = store.config.trim_policy();
            let mut contexts = store.contexts.write().await;
            for mut state in states {
                if let Err(e) = crate::utils::validate_project_id(&state.project_id) {
                    log::warn!("Skipping snapshot entry '{}': {}", state.project_id, e);
                    continue;
                }
                state.trim(&policy);
                let context = ProjectContext::from_state(state, store.config.event_log_capacity);
                contexts.insert(context.project_id().to_string(), Arc::new(context));
            }
            log::info!("Restored {} project(s) from snapshot", contexts.len());
            drop(contexts);
        }

        Ok(Arc::new(store))
    }

    /// Refuse further use and write the snapshot when one is configured.
    /// Contexts stay readable by operations already holding them.
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let contexts: Vec<Arc<ProjectContext>> =
            self.contexts.read().await.values().cloned().collect();
        log::info!("Shutting down project store ({} project(s))", contexts.len());

        if let Some(path) = self.config.snapshot_path.clone() {
            let mut states = Vec::with_capacity(contexts.len());
            for context in &contexts {
                states.push(context.state().await);
            }
            states.sort_by(|a, b| a.project_id.cmp(&b.project_id));

            tokio::task::spawn_blocking(move || persistence::save_snapshot(&path, states))
                .await
                .map_err(|e| anyhow!("Snapshot writing task failed: {}", e))??;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Get the context for a project, creating it on first use.
    ///
    /// Concurrent first calls for the same id all receive the same context.
    pub async fn get_or_create(&self, project_id: &str) -> Result<Arc<ProjectContext>, StoreError> {
        self.ensure_open()?;
        crate::utils::validate_project_id(project_id).map_err(StoreError::InvalidProjectId)?;

        if let Some(context) = self.contexts.read().await.get(project_id) {
            return Ok(context.clone());
        }

        let mut contexts = self.contexts.write().await;
        let context = contexts
            .entry(project_id.to_string())
            .or_insert_with(|| {
                log::debug!("Created context for project {}", project_id);
                Arc::new(ProjectContext::new(project_id, self.config.event_log_capacity))
            })
            .clone();
        Ok(context)
    }

    /// Existing context, without creating one
    pub async fn get(&self, project_id: &str) -> Option<Arc<ProjectContext>> {
        self.contexts.read().await.get(project_id).cloned()
    }

    /// Snapshot of a project's conversation (created lazily)
    pub async fn get_state(&self, project_id: &str) -> Result<ConversationState, StoreError> {
        Ok(self.get_or_create(project_id).await?.state().await)
    }

    pub async fn append_message(&self, project_id: &str, message: Message) -> Result<(), StoreError> {
        let context = self.get_or_create(project_id).await?;
        context.update(|state| state.push_message(message)).await;
        Ok(())
    }

    pub async fn append_edit(&self, project_id: &str, edit: EditRecord) -> Result<(), StoreError> {
        let context = self.get_or_create(project_id).await?;
        context.update(|state| state.push_edit(edit)).await;
        Ok(())
    }

    /// Trim a project's history; unknown projects are left alone
    pub async fn trim(&self, project_id: &str, policy: &TrimPolicy) -> Result<TrimReport, StoreError> {
        self.ensure_open()?;
        match self.get(project_id).await {
            Some(context) => {
                let report = context.update(|state| state.trim(policy)).await;
                log::debug!(
                    "Trimmed project {}: {} message(s), {} edit(s)",
                    project_id,
                    report.messages_removed,
                    report.edits_removed
                );
                Ok(report)
            }
            None => Ok(TrimReport::default()),
        }
    }

    /// Merge a partial update and return the resulting state
    pub async fn update(
        &self,
        project_id: &str,
        patch: StatePatch,
    ) -> Result<ConversationState, StoreError> {
        let context = self.get_or_create(project_id).await?;
        Ok(context
            .update(|state| {
                state.apply_patch(patch);
                state.clone()
            })
            .await)
    }

    /// Discard history but keep the context (and its installed-package cache)
    pub async fn reset(&self, project_id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        if let Some(context) = self.get(project_id).await {
            context.reset().await;
            log::info!("Reset conversation for project {}", project_id);
        }
        Ok(())
    }

    /// Remove a project entirely. Returns the removed context so the caller
    /// can tear down its sandbox; unknown ids are a no-op.
    pub async fn delete(&self, project_id: &str) -> Result<Option<Arc<ProjectContext>>, StoreError> {
        self.ensure_open()?;
        let removed = self.contexts.write().await.remove(project_id);
        if removed.is_some() {
            log::info!("Deleted project {}", project_id);
        }
        Ok(removed)
    }

    pub async fn project_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.contexts.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.read().await.is_empty()
    }

    /// Remove contexts idle for at least `max_idle` and return them.
    /// Contexts still referenced by a running operation are kept.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<Arc<ProjectContext>> {
        let mut contexts = self.contexts.write().await;
        let stale: Vec<String> = contexts
            .iter()
            .filter(|(_, context)| Arc::strong_count(context) == 1 && context.idle_for() >= max_idle)
            .map(|(id, _)| id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(context) = contexts.remove(&id) {
                log::info!("Evicted idle project {}", id);
                evicted.push(context);
            }
        }
        evicted
    }
}
