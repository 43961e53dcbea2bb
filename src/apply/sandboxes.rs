//! Sandbox registry
//!
//! Owns the sandbox of every project that has one. Project contexts only
//! hold a weak handle, so dropping a registry entry releases the sandbox.

use crate::config::SandboxConfig;
use crate::projects::ProjectContext;
use crate::providers::local_sandbox::LocalSandbox;
use crate::providers::{SandboxError, SandboxProvider};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Creates sandboxes on demand for projects that do not have one yet
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn create(&self, project_id: &str) -> Result<Arc<dyn SandboxProvider>, SandboxError>;
}

/// Factory for directory-backed sandboxes under the configured workspace root
pub struct LocalSandboxFactory {
    config: SandboxConfig,
}

impl LocalSandboxFactory {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SandboxFactory for LocalSandboxFactory {
    async fn create(&self, project_id: &str) -> Result<Arc<dyn SandboxProvider>, SandboxError> {
        let sandbox = LocalSandbox::create(project_id, &self.config).await?;
        Ok(Arc::new(sandbox))
    }
}

#[derive(Default)]
pub struct SandboxRegistry {
    sandboxes: RwLock<HashMap<String, Arc<dyn SandboxProvider>>>,
    factory: Option<Arc<dyn SandboxFactory>>,
}

impl SandboxRegistry {
    pub fn new(factory: Option<Arc<dyn SandboxFactory>>) -> Self {
        Self {
            sandboxes: RwLock::new(HashMap::new()),
            factory,
        }
    }

    /// Take ownership of `sandbox` and route the project to it.
    /// Returns the sandbox it replaced, if any.
    pub async fn attach(
        &self,
        context: &ProjectContext,
        sandbox: Arc<dyn SandboxProvider>,
    ) -> Option<Arc<dyn SandboxProvider>> {
        context.attach_sandbox(&sandbox);
        log::info!(
            "[Sandboxes] Attached sandbox '{}' to project '{}'",
            sandbox.id(),
            context.project_id()
        );
        self.sandboxes
            .write()
            .await
            .insert(context.project_id().to_string(), sandbox)
    }

    /// The project's sandbox, created through the factory when missing.
    ///
    /// `Ok(None)` means no sandbox is attached and none can be created.
    pub async fn resolve(
        &self,
        context: &ProjectContext,
    ) -> Result<Option<Arc<dyn SandboxProvider>>, SandboxError> {
        if let Some(sandbox) = context.sandbox() {
            return Ok(Some(sandbox));
        }
        if let Some(sandbox) = self.sandboxes.read().await.get(context.project_id()).cloned() {
            context.attach_sandbox(&sandbox);
            return Ok(Some(sandbox));
        }

        let Some(factory) = &self.factory else {
            return Ok(None);
        };

        // Creation happens outside the map lock; a concurrent creator for the
        // same project wins and this sandbox is discarded
        let created = factory.create(context.project_id()).await?;
        let mut sandboxes = self.sandboxes.write().await;
        let sandbox = sandboxes
            .entry(context.project_id().to_string())
            .or_insert_with(|| created.clone())
            .clone();
        drop(sandboxes);

        if !Arc::ptr_eq(&sandbox, &created) {
            let _ = created.terminate().await;
        } else {
            log::info!(
                "[Sandboxes] Created sandbox '{}' for project '{}'",
                sandbox.id(),
                context.project_id()
            );
        }
        context.attach_sandbox(&sandbox);
        Ok(Some(sandbox))
    }

    pub async fn get(&self, project_id: &str) -> Option<Arc<dyn SandboxProvider>> {
        self.sandboxes.read().await.get(project_id).cloned()
    }

    /// Drop ownership of a project's sandbox and terminate it
    pub async fn release(&self, project_id: &str) -> bool {
        let removed = self.sandboxes.write().await.remove(project_id);
        match removed {
            Some(sandbox) => {
                if let Err(e) = sandbox.terminate().await {
                    log::warn!(
                        "[Sandboxes] Failed to terminate sandbox for '{}': {}",
                        project_id,
                        e
                    );
                }
                log::info!("[Sandboxes] Released sandbox for project '{}'", project_id);
                true
            }
            None => false,
        }
    }

    /// Terminate every sandbox; used on shutdown
    pub async fn terminate_all(&self) -> usize {
        let drained: Vec<(String, Arc<dyn SandboxProvider>)> =
            self.sandboxes.write().await.drain().collect();
        let count = drained.len();
        for (project_id, sandbox) in drained {
            if let Err(e) = sandbox.terminate().await {
                log::warn!(
                    "[Sandboxes] Failed to terminate sandbox for '{}': {}",
                    project_id,
                    e
                );
            }
        }
        if count > 0 {
            log::info!("[Sandboxes] Terminated {} sandbox(es)", count);
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.sandboxes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sandboxes.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn local_factory(temp_dir: &TempDir) -> Arc<dyn SandboxFactory> {
        Arc::new(LocalSandboxFactory::new(SandboxConfig {
            workspace_root: temp_dir.path().to_path_buf(),
            ..SandboxConfig::default()
        }))
    }

    #[tokio::test]
    async fn test_resolve_without_factory() {
        let registry = SandboxRegistry::new(None);
        let context = ProjectContext::new("p1", 10);
        assert!(registry.resolve(&context).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_creates_once() {
        let temp_dir = TempDir::new().unwrap();
        let registry = SandboxRegistry::new(Some(local_factory(&temp_dir)));
        let context = ProjectContext::new("p1", 10);

        let first = registry.resolve(&context).await.unwrap().unwrap();
        let second = registry.resolve(&context).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().await, 1);
        assert!(temp_dir.path().join("p1").is_dir());
    }

    #[tokio::test]
    async fn test_release_detaches_weak_handle() {
        let temp_dir = TempDir::new().unwrap();
        let registry = SandboxRegistry::new(Some(local_factory(&temp_dir)));
        let context = ProjectContext::new("p1", 10);

        let sandbox = registry.resolve(&context).await.unwrap().unwrap();
        drop(sandbox);
        assert!(registry.release("p1").await);
        assert!(context.sandbox().is_none());
        assert!(!registry.release("p1").await);
    }

    #[tokio::test]
    async fn test_terminate_all() {
        let temp_dir = TempDir::new().unwrap();
        let registry = SandboxRegistry::new(Some(local_factory(&temp_dir)));
        for id in ["a", "b"] {
            let context = ProjectContext::new(id, 10);
            registry.resolve(&context).await.unwrap();
        }
        assert_eq!(registry.terminate_all().await, 2);
        assert!(registry.is_empty().await);
    }
}
