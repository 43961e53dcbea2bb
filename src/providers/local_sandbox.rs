// Directory-backed sandbox
//
// Each project gets its own directory under the workspace root. Commands run
// through the platform shell inside that directory; packages are installed
// with npm, which is invoked directly without a shell.

use super::{
    CommandOutput, FileEntry, InstallProgress, InstallStream, SandboxError, SandboxProvider,
};
use crate::config::SandboxConfig;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

/// Directories never reported by `list_files`
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git"];

pub struct LocalSandbox {
    id: String,
    root: PathBuf,
    command_timeout: Duration,
    install_timeout: Duration,
    legacy_peer_deps: bool,
    dev_server_port: u16,
    dev_server: Mutex<Option<Child>>,
    terminated: AtomicBool,
}

impl LocalSandbox {
    /// Create (or reopen) the sandbox directory for a project
    pub async fn create(project_id: &str, config: &SandboxConfig) -> Result<Self, SandboxError> {
        crate::utils::validate_project_id(project_id).map_err(SandboxError::new)?;

        let root = config.workspace_root.join(project_id);
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            SandboxError::new(format!(
                "Failed to create sandbox directory {}: {}",
                root.display(),
                e
            ))
        })?;

        log::info!("[LocalSandbox] Opened sandbox {} at {:?}", project_id, root);

        Ok(Self {
            id: project_id.to_string(),
            root,
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            install_timeout: Duration::from_secs(config.install_timeout_secs),
            legacy_peer_deps: config.legacy_peer_deps,
            dev_server_port: config.dev_server_port,
            dev_server: Mutex::new(None),
            terminated: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_active(&self) -> Result<(), SandboxError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(SandboxError::new(format!(
                "Sandbox {} has been terminated",
                self.id
            )));
        }
        Ok(())
    }

    /// Resolve a sandbox-relative path, refusing anything that escapes the root
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::new(format!(
                        "Path '{}' escapes the sandbox",
                        path
                    )));
                }
            }
        }
        Ok(resolved)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn shell_command(&self, command: &str) -> Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        };
        cmd.current_dir(&self.root).kill_on_drop(true);
        cmd
    }

    async fn stop_dev_server(&self) {
        let mut guard = self.dev_server.lock().await;
        if let Some(mut child) = guard.take() {
            if let Err(e) = child.kill().await {
                log::warn!("[LocalSandbox] Failed to stop dev server for {}: {}", self.id, e);
            }
        }
    }
}

/// Resolve the npm binary by checking common paths then falling back to PATH
fn resolve_npm() -> Option<PathBuf> {
    let standard_paths = [
        dirs::home_dir().map(|h| h.join(".npm-global/bin/npm")),
        Some(PathBuf::from("/usr/local/bin/npm")),
        Some(PathBuf::from("/opt/homebrew/bin/npm")),
    ];

    for path in standard_paths.iter().flatten() {
        if path.exists() {
            log::debug!("[LocalSandbox] Found npm at: {:?}", path);
            return Some(path.clone());
        }
    }

    which::which("npm").ok()
}

/// Package names go straight onto the npm command line
fn validate_package_name(name: &str) -> Result<(), SandboxError> {
    if name.is_empty() || name.starts_with('-') || name.chars().any(char::is_whitespace) {
        return Err(SandboxError::new(format!(
            "Refusing to install invalid package name '{}'",
            name
        )));
    }
    Ok(())
}

/// Forward lines from a child pipe until it closes or the receiver is gone
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<Result<InstallProgress, SandboxError>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(Ok(InstallProgress::Output(line))).await.is_err() {
            break;
        }
    }
}

#[async_trait]
impl SandboxProvider for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.ensure_active()?;
        let target = self.resolve(path)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SandboxError::new(format!("Failed to create directory for {}: {}", path, e))
            })?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| SandboxError::new(format!("Failed to write {}: {}", path, e)))?;

        log::debug!("[LocalSandbox] Wrote {} ({} bytes)", path, content.len());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        self.ensure_active()?;
        let target = self.resolve(path)?;
        tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| SandboxError::new(format!("Failed to read {}: {}", path, e)))
    }

    async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>, SandboxError> {
        self.ensure_active()?;
        let dir = self.resolve(path)?;
        if !dir.is_dir() {
            return Err(SandboxError::new(format!("'{}' is not a directory", path)));
        }

        let entries = tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(&dir)
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    !(e.file_type().is_dir()
                        && e.file_name().to_str().is_some_and(|n| SKIPPED_DIRS.contains(&n)))
                })
                .filter_map(|e| e.ok())
                .map(|e| {
                    let size = e.metadata().map(|m| m.len()).unwrap_or(0);
                    (e.path().to_path_buf(), e.file_type().is_dir(), size)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| SandboxError::new(format!("File listing task failed: {}", e)))?;

        Ok(entries
            .into_iter()
            .map(|(path, is_dir, size)| FileEntry {
                path: self.relative(&path),
                is_dir,
                size: if is_dir { 0 } else { size },
            })
            .collect())
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, SandboxError> {
        self.ensure_active()?;
        log::info!("[LocalSandbox] Running `{}` in {}", command, self.id);

        let output = timeout(self.command_timeout, self.shell_command(command).output())
            .await
            .map_err(|_| {
                SandboxError::new(format!(
                    "Command `{}` timed out after {} seconds",
                    command,
                    self.command_timeout.as_secs()
                ))
            })?
            .map_err(|e| SandboxError::new(format!("Failed to run `{}`: {}", command, e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn install_packages(&self, names: &[String]) -> Result<InstallStream, SandboxError> {
        self.ensure_active()?;
        for name in names {
            validate_package_name(name)?;
        }

        let npm = resolve_npm().ok_or_else(|| SandboxError::new("npm was not found on this system"))?;

        let mut cmd = Command::new(&npm);
        cmd.arg("install")
            .args(names)
            .current_dir(&self.root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.legacy_peer_deps {
            cmd.arg("--legacy-peer-deps");
        }

        log::info!(
            "[LocalSandbox] Installing {} package(s) in {}: {}",
            names.len(),
            self.id,
            names.join(" ")
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::new(format!("Failed to spawn npm: {}", e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::new("Failed to capture npm stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::new("Failed to capture npm stderr"))?;

        let (tx, rx) = mpsc::channel(32);
        let packages = names.to_vec();
        let limit = self.install_timeout;

        tokio::spawn(async move {
            let run = async {
                tokio::join!(
                    forward_lines(stdout, tx.clone()),
                    forward_lines(stderr, tx.clone())
                );
                child.wait().await
            };

            let outcome = tokio::select! {
                outcome = timeout(limit, run) => outcome,
                _ = tx.closed() => {
                    log::info!("[LocalSandbox] Install cancelled, stopping npm");
                    return;
                }
            };

            let result = match outcome {
                Ok(Ok(status)) if status.success() => Ok(InstallProgress::Finished { packages }),
                Ok(Ok(status)) => Err(SandboxError::new(format!(
                    "npm install exited with code {:?}",
                    status.code()
                ))),
                Ok(Err(e)) => Err(SandboxError::new(format!("Failed to wait for npm: {}", e))),
                Err(_) => Err(SandboxError::new(format!(
                    "npm install timed out after {} seconds",
                    limit.as_secs()
                ))),
            };
            // The child is killed on drop if it is still running
            let _ = tx.send(result).await;
        });

        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    async fn restart_dev_server(&self) -> Result<(), SandboxError> {
        self.ensure_active()?;
        self.stop_dev_server().await;

        let npm = resolve_npm().ok_or_else(|| SandboxError::new("npm was not found on this system"))?;
        let child = Command::new(&npm)
            .args(["run", "dev", "--", "--port"])
            .arg(self.dev_server_port.to_string())
            .arg("--host")
            .current_dir(&self.root)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::new(format!("Failed to start dev server: {}", e)))?;

        log::info!(
            "[LocalSandbox] Dev server for {} started on port {}",
            self.id,
            self.dev_server_port
        );
        *self.dev_server.lock().await = Some(child);
        Ok(())
    }

    async fn terminate(&self) -> Result<(), SandboxError> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop_dev_server().await;
        log::info!("[LocalSandbox] Terminated sandbox {}", self.id);
        Ok(())
    }
}
