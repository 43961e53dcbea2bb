// Direct sandbox operations: file listing, one-off commands and package installs

use super::{store_error_kind, Engine, EventStream};
use crate::events::{ErrorKind, InstallEvent};
use crate::parsers::imports::normalize_package_request;
use crate::projects::{ProjectContext, StoreError};
use crate::providers::{CommandOutput, FileEntry, InstallProgress, SandboxError, SandboxProvider};
use futures_util::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub type InstallEventStream = EventStream<InstallEvent>;

/// Failure of a direct sandbox operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxOpError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No sandbox is attached to project '{0}'")]
    NoSandbox(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("{0}")]
    InvalidRequest(String),
}

impl SandboxOpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxOpError::Store(e) => store_error_kind(e),
            SandboxOpError::NoSandbox(_) => ErrorKind::NoSandbox,
            SandboxOpError::Sandbox(_) => ErrorKind::SandboxError,
            SandboxOpError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }
}

impl Engine {
    async fn project_sandbox(
        &self,
        project_id: &str,
    ) -> Result<(Arc<ProjectContext>, Arc<dyn SandboxProvider>), SandboxOpError> {
        let context = self.store().get_or_create(project_id).await?;
        let sandbox = self
            .sandboxes()
            .resolve(&context)
            .await?
            .ok_or_else(|| SandboxOpError::NoSandbox(project_id.to_string()))?;
        Ok((context, sandbox))
    }

    /// Files under `path` in the project's sandbox; `""` lists the root
    pub async fn list_files(
        &self,
        project_id: &str,
        path: &str,
    ) -> Result<Vec<FileEntry>, SandboxOpError> {
        let (_, sandbox) = self.project_sandbox(project_id).await?;
        Ok(sandbox.list_files(path).await?)
    }

    /// Run one command in the project's sandbox.
    /// A non-zero exit code is reported in the output, not as an error.
    pub async fn run_command(
        &self,
        project_id: &str,
        command: &str,
    ) -> Result<CommandOutput, SandboxOpError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(SandboxOpError::InvalidRequest(
                "Command must not be empty".to_string(),
            ));
        }
        let (context, sandbox) = self.project_sandbox(project_id).await?;
        let output = sandbox.run_command(command).await?;
        log::info!(
            "[{}] `{}` exited with {}",
            context.project_id(),
            command,
            output.exit_code
        );
        Ok(output)
    }

    /// Install packages in the project's sandbox, skipping the ones it
    /// already has. The stream ends with exactly one `Completed` or
    /// `Failed` event unless it is dropped first.
    pub fn install_packages(
        self: &Arc<Self>,
        project_id: &str,
        packages: &[String],
    ) -> InstallEventStream {
        let (tx, rx) = self.channel();
        let engine = Arc::clone(self);
        let project_id = project_id.to_string();
        let requested: BTreeSet<String> = packages
            .iter()
            .filter_map(|p| normalize_package_request(p))
            .collect();
        tokio::spawn(async move {
            if let Err(e) = run_install(&engine, &project_id, requested, &tx).await {
                log::warn!("[{}] Package install failed: {}", project_id, e);
                let _ = tx
                    .send(InstallEvent::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    })
                    .await;
            }
        });
        EventStream::new(rx)
    }
}

async fn run_install(
    engine: &Engine,
    project_id: &str,
    requested: BTreeSet<String>,
    tx: &mpsc::Sender<InstallEvent>,
) -> Result<(), SandboxOpError> {
    if requested.is_empty() {
        return Err(SandboxOpError::InvalidRequest(
            "No valid package names given".to_string(),
        ));
    }

    let (context, sandbox) = engine.project_sandbox(project_id).await?;
    let installed = context.installed_packages().await.unwrap_or_default();
    let (already_installed, missing): (Vec<String>, Vec<String>) =
        requested.into_iter().partition(|p| installed.contains(p));

    let started = InstallEvent::Started {
        packages: missing.clone(),
        already_installed,
    };
    if tx.send(started).await.is_err() {
        return Ok(());
    }
    if missing.is_empty() {
        let _ = tx.send(InstallEvent::Completed { packages: missing }).await;
        return Ok(());
    }

    let mut progress = sandbox.install_packages(&missing).await?;
    while let Some(item) = progress.next().await {
        match item? {
            InstallProgress::Output(line) => {
                // Dropping the stream cancels the install
                if tx.send(InstallEvent::Output { line }).await.is_err() {
                    log::info!("[{}] Package install cancelled", project_id);
                    return Ok(());
                }
            }
            InstallProgress::Finished { packages } => {
                context.extend_installed(packages.iter().cloned()).await;
                let _ = tx.send(InstallEvent::Completed { packages }).await;
                return Ok(());
            }
        }
    }

    Err(SandboxOpError::Sandbox(SandboxError::new(
        "Package installation ended without a result",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConversationConfig, EngineConfig};
    use crate::projects::ProjectStore;
    use crate::providers::InstallStream;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedSandbox {
        installs: Mutex<Vec<Vec<String>>>,
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SandboxProvider for ScriptedSandbox {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn write_file(&self, _path: &str, _content: &str) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
            Err(SandboxError::new(format!("{} not found", path)))
        }

        async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>, SandboxError> {
            if path == "missing" {
                return Err(SandboxError::new("'missing' is not a directory"));
            }
            Ok(vec![
                FileEntry {
                    path: "src".to_string(),
                    is_dir: true,
                    size: 0,
                },
                FileEntry {
                    path: "src/App.jsx".to_string(),
                    is_dir: false,
                    size: 42,
                },
            ])
        }

        async fn run_command(&self, command: &str) -> Result<CommandOutput, SandboxError> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(CommandOutput {
                stdout: "built".to_string(),
                stderr: String::new(),
                exit_code: if command.contains("fail") { 1 } else { 0 },
            })
        }

        async fn install_packages(&self, names: &[String]) -> Result<InstallStream, SandboxError> {
            self.installs.lock().unwrap().push(names.to_vec());
            let items: Vec<Result<InstallProgress, SandboxError>> = vec![
                Ok(InstallProgress::Output(format!("added {} packages", names.len()))),
                Ok(InstallProgress::Finished {
                    packages: names.to_vec(),
                }),
            ];
            Ok(Box::pin(stream::iter(items)))
        }

        async fn restart_dev_server(&self) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn terminate(&self) -> Result<(), SandboxError> {
            Ok(())
        }
    }

    async fn engine_with_sandbox() -> (Arc<Engine>, Arc<ScriptedSandbox>) {
        let store = Arc::new(ProjectStore::new(ConversationConfig::default()));
        let engine = Arc::new(Engine::new(store, EngineConfig::default()).unwrap());
        let sandbox = Arc::new(ScriptedSandbox::default());
        let context = engine.store().get_or_create("p1").await.unwrap();
        engine.sandboxes().attach(&context, sandbox.clone()).await;
        (engine, sandbox)
    }

    #[tokio::test]
    async fn test_list_files_from_sandbox() {
        let (engine, _) = engine_with_sandbox().await;
        let files = engine.list_files("p1", "").await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].path, "src/App.jsx");

        let err = engine.list_files("p1", "missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SandboxError);
    }

    #[tokio::test]
    async fn test_run_command_reports_exit_code() {
        let (engine, sandbox) = engine_with_sandbox().await;
        let output = engine.run_command("p1", "  npm run build ").await.unwrap();
        assert!(output.success());
        let output = engine.run_command("p1", "npm run fail").await.unwrap();
        assert_eq!(output.exit_code, 1);
        assert_eq!(
            *sandbox.commands.lock().unwrap(),
            vec!["npm run build", "npm run fail"]
        );

        let err = engine.run_command("p1", "   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_operations_without_sandbox() {
        let store = Arc::new(ProjectStore::new(ConversationConfig::default()));
        let engine = Arc::new(Engine::new(store, EngineConfig::default()).unwrap());
        let err = engine.run_command("p1", "ls").await.unwrap_err();
        assert_eq!(err, SandboxOpError::NoSandbox("p1".to_string()));

        let events: Vec<InstallEvent> = engine
            .install_packages("p1", &["zod".to_string()])
            .collect()
            .await;
        assert!(matches!(
            events.as_slice(),
            [InstallEvent::Failed {
                kind: ErrorKind::NoSandbox,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_install_skips_cached_packages() {
        let (engine, sandbox) = engine_with_sandbox().await;
        let context = engine.store().get_or_create("p1").await.unwrap();
        context.extend_installed(["react".to_string()]).await;

        let requested = vec![
            "react".to_string(),
            "axios@^1.6.0".to_string(),
            "@tanstack/react-query".to_string(),
        ];
        let events: Vec<InstallEvent> = engine.install_packages("p1", &requested).collect().await;

        assert_eq!(
            events[0],
            InstallEvent::Started {
                packages: vec!["@tanstack/react-query".to_string(), "axios".to_string()],
                already_installed: vec!["react".to_string()],
            }
        );
        assert_eq!(
            events[1],
            InstallEvent::Output {
                line: "added 2 packages".to_string()
            }
        );
        assert!(events.last().unwrap().is_terminal());
        assert_eq!(events.len(), 3);
        assert_eq!(
            *sandbox.installs.lock().unwrap(),
            vec![vec!["@tanstack/react-query".to_string(), "axios".to_string()]]
        );

        let installed = context.installed_packages().await.unwrap();
        assert!(installed.contains("axios"));
        assert!(installed.contains("@tanstack/react-query"));
    }

    #[tokio::test]
    async fn test_install_of_cached_packages_completes_without_sandbox_call() {
        let (engine, sandbox) = engine_with_sandbox().await;
        let context = engine.store().get_or_create("p1").await.unwrap();
        context.extend_installed(["react".to_string()]).await;

        let events: Vec<InstallEvent> = engine
            .install_packages("p1", &["react".to_string()])
            .collect()
            .await;
        assert_eq!(
            events.last(),
            Some(&InstallEvent::Completed { packages: vec![] })
        );
        assert!(sandbox.installs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_rejects_invalid_names() {
        let (engine, _) = engine_with_sandbox().await;
        let events: Vec<InstallEvent> = engine
            .install_packages("p1", &["./local".to_string(), "  ".to_string()])
            .collect()
            .await;
        assert!(matches!(
            events.as_slice(),
            [InstallEvent::Failed {
                kind: ErrorKind::InvalidRequest,
                ..
            }]
        ));
    }
}
