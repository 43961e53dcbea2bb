// Producer side of an apply operation

use super::{store_error_kind, Engine};
use crate::events::{
    Activity, ActivityEntry, ApplySummary, CommandReport, ErrorKind, ProgressEvent, StepDetail,
};
use crate::models::state_machine::StageTracker;
use crate::models::{
    ApplyStage, EditOutcome, EditRecord, EditType, FileOp, ParseWarning, ParsedResponse,
};
use crate::parsers::installed_from_manifest;
use crate::projects::ProjectContext;
use crate::providers::{InstallProgress, SandboxProvider};
use futures_util::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Why an operation stopped before completing
enum Stop {
    /// The consumer dropped the stream
    Cancelled,
    Failed(ErrorKind, String),
}

pub(super) async fn run(
    engine: Arc<Engine>,
    parsed: ParsedResponse,
    project_id: String,
    tx: mpsc::Sender<ProgressEvent>,
) {
    let operation_id = uuid::Uuid::new_v4().to_string();

    let context = match engine.store().get_or_create(&project_id).await {
        Ok(context) => context,
        Err(e) => {
            log::warn!("[Apply] Cannot start operation for '{}': {}", project_id, e);
            let _ = tx
                .send(ProgressEvent::Started {
                    project_id,
                    operation_id,
                })
                .await;
            let _ = tx
                .send(ProgressEvent::Failed {
                    failed_stage: ApplyStage::Started,
                    kind: store_error_kind(&e),
                    message: e.to_string(),
                })
                .await;
            return;
        }
    };

    let edit_type = if context.read(|state| state.edits.is_empty()).await {
        EditType::Create
    } else {
        EditType::Edit
    };

    let mut run = ApplyRun {
        engine,
        context,
        tx,
        tracker: StageTracker::new(),
        operation_id,
        edit_type,
        summary: ApplySummary::default(),
    };

    match run.execute(parsed).await {
        Ok(()) => {}
        Err(Stop::Cancelled) => {
            log::info!(
                "[Apply] Operation {} cancelled during {}",
                run.operation_id,
                run.tracker.working_stage()
            );
            run.record_edit(EditOutcome::Cancelled, None).await;
        }
        Err(Stop::Failed(kind, message)) => run.fail(kind, message).await,
    }
}

struct ApplyRun {
    engine: Arc<Engine>,
    context: Arc<ProjectContext>,
    tx: mpsc::Sender<ProgressEvent>,
    tracker: StageTracker,
    operation_id: String,
    edit_type: EditType,
    summary: ApplySummary,
}

impl ApplyRun {
    async fn execute(&mut self, parsed: ParsedResponse) -> Result<(), Stop> {
        self.emit(ProgressEvent::Started {
            project_id: self.context.project_id().to_string(),
            operation_id: self.operation_id.clone(),
        })
        .await?;

        let sandbox = match self.engine.sandboxes().resolve(&self.context).await {
            Ok(Some(sandbox)) => sandbox,
            Ok(None) => {
                return Err(Stop::Failed(
                    ErrorKind::NoSandbox,
                    format!(
                        "No sandbox is attached to project '{}'",
                        self.context.project_id()
                    ),
                ))
            }
            Err(e) => return Err(Stop::Failed(ErrorKind::SandboxError, e.to_string())),
        };

        // PARSING: normalize paths, then detect packages against the installed set
        let ParsedResponse {
            files: raw_files,
            packages,
            commands,
            warnings,
            ..
        } = parsed;

        let policy = self.engine.config().parsing.path_policy();
        let mut files: Vec<FileOp> = Vec::with_capacity(raw_files.len());
        let mut invalid = Vec::new();
        for op in raw_files {
            match policy.normalize(&op.path) {
                Ok(path) => {
                    let path = path.into_string();
                    // Distinct raw paths can land on the same project path
                    match files.iter_mut().find(|f| f.path == path) {
                        Some(existing) => existing.content = op.content,
                        None => files.push(FileOp {
                            path,
                            content: op.content,
                        }),
                    }
                }
                Err(e) => invalid.push(e),
            }
        }

        let installed = self.installed_packages(&sandbox).await;
        let detection = self.engine.detect_packages(&files, &packages, &installed);

        self.emit(ProgressEvent::Parsing {
            files: files.len(),
            packages: detection.classification.len(),
            commands: commands.len(),
        })
        .await?;

        for warning in &warnings {
            let path = match warning {
                ParseWarning::EmptyFile { path } => Some(path.clone()),
                _ => None,
            };
            self.warn(warning.to_string(), path).await?;
        }
        for error in invalid {
            self.summary.files_skipped.push(error.path.clone());
            self.warn(error.to_string(), Some(error.path)).await?;
        }
        for warning in &detection.warnings {
            self.warn(warning.to_string(), Some(warning.file.clone()))
                .await?;
        }

        // INSTALLING_PACKAGES
        let classification = detection.classification;
        let to_install: Vec<String> = classification.to_install.into_iter().collect();
        self.emit(ProgressEvent::InstallingPackages {
            packages: to_install.clone(),
            already_installed: classification.already_installed.into_iter().collect(),
            builtin: classification.builtin.into_iter().collect(),
        })
        .await?;
        if !to_install.is_empty() {
            self.install(&sandbox, &to_install).await?;
        }

        // WRITING_FILES
        self.emit(ProgressEvent::WritingFiles {
            files: files.iter().map(|f| f.path.clone()).collect(),
        })
        .await?;
        for file in &files {
            self.ensure_open()?;
            sandbox
                .write_file(&file.path, &file.content)
                .await
                .map_err(|e| {
                    Stop::Failed(
                        ErrorKind::SandboxError,
                        format!("Failed to write '{}': {}", file.path, e.reason),
                    )
                })?;
            self.context.record_file(&file.path, &file.content).await;
            self.summary.files_written.push(file.path.clone());
            self.emit(ProgressEvent::Progress {
                detail: StepDetail::FileWritten {
                    path: file.path.clone(),
                    bytes: file.content.len(),
                },
            })
            .await?;
        }

        // RUNNING_COMMANDS
        self.emit(ProgressEvent::RunningCommands {
            commands: commands.clone(),
        })
        .await?;
        for command in &commands {
            self.ensure_open()?;
            let output = sandbox.run_command(command).await.map_err(|e| {
                Stop::Failed(
                    ErrorKind::SandboxError,
                    format!("Failed to run '{}': {}", command, e.reason),
                )
            })?;
            let report = CommandReport {
                command: command.clone(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            };
            self.summary.commands_run.push(report.clone());
            self.emit(ProgressEvent::Progress {
                detail: StepDetail::CommandFinished(report),
            })
            .await?;

            if output.exit_code != 0 {
                let message = format!("Command '{}' exited with code {}", command, output.exit_code);
                log::warn!("[Apply] {}", message);
                if self.engine.config().apply.stop_on_command_failure {
                    return Err(Stop::Failed(ErrorKind::CommandFailed, message));
                }
                self.summary.warnings.push(message);
            }
        }

        if self.engine.config().sandbox.auto_restart_dev_server
            && !self.summary.packages_installed.is_empty()
        {
            match sandbox.restart_dev_server().await {
                Ok(()) => {
                    self.emit(ProgressEvent::Progress {
                        detail: StepDetail::DevServerRestarted,
                    })
                    .await?
                }
                Err(e) => {
                    log::warn!("[Apply] Dev server restart failed: {}", e);
                    self.summary
                        .warnings
                        .push(format!("Dev server restart failed: {}", e.reason));
                }
            }
        }

        // The edit is visible in the state before COMPLETED reaches the consumer
        self.record_edit(EditOutcome::Success, None).await;
        let summary = self.summary.clone();
        if self.emit(ProgressEvent::Completed { summary }).await.is_err() {
            log::debug!(
                "[Apply] Operation {} completed after its consumer left",
                self.operation_id
            );
        }
        Ok(())
    }

    /// Installed packages from the cache, or from the sandbox manifest on first use
    async fn installed_packages(&self, sandbox: &Arc<dyn SandboxProvider>) -> BTreeSet<String> {
        if let Some(installed) = self.context.installed_packages().await {
            return installed;
        }

        match sandbox.read_file("package.json").await {
            Ok(manifest) => match installed_from_manifest(&manifest) {
                Ok(installed) => {
                    self.context.set_installed(installed.clone()).await;
                    installed
                }
                Err(e) => {
                    log::warn!(
                        "[Apply] Ignoring unreadable package.json in '{}': {}",
                        self.context.project_id(),
                        e
                    );
                    BTreeSet::new()
                }
            },
            Err(e) => {
                log::debug!(
                    "[Apply] No manifest for '{}': {}",
                    self.context.project_id(),
                    e
                );
                BTreeSet::new()
            }
        }
    }

    async fn install(
        &mut self,
        sandbox: &Arc<dyn SandboxProvider>,
        names: &[String],
    ) -> Result<(), Stop> {
        let mut progress = sandbox
            .install_packages(names)
            .await
            .map_err(|e| Stop::Failed(ErrorKind::SandboxError, e.reason))?;

        while let Some(item) = progress.next().await {
            match item {
                Ok(InstallProgress::Output(line)) => {
                    self.emit(ProgressEvent::Progress {
                        detail: StepDetail::InstallOutput { line },
                    })
                    .await?
                }
                Ok(InstallProgress::Finished { packages }) => {
                    self.context.extend_installed(packages.iter().cloned()).await;
                    self.summary.packages_installed.extend(packages.iter().cloned());
                    return self
                        .emit(ProgressEvent::Progress {
                            detail: StepDetail::PackagesInstalled { packages },
                        })
                        .await;
                }
                Err(e) => return Err(Stop::Failed(ErrorKind::SandboxError, e.reason)),
            }
        }

        Err(Stop::Failed(
            ErrorKind::SandboxError,
            "Package installation ended without a result".to_string(),
        ))
    }

    async fn warn(&mut self, message: String, path: Option<String>) -> Result<(), Stop> {
        log::debug!("[Apply] Parse warning: {}", message);
        self.summary.warnings.push(message.clone());
        self.emit(ProgressEvent::ParseWarning { message, path }).await
    }

    /// Send one event, advancing the stage machine for transitions
    async fn emit(&mut self, event: ProgressEvent) -> Result<(), Stop> {
        if let Some(stage) = event.stage() {
            // The tracker starts in STARTED
            if stage != ApplyStage::Started {
                if let Err(e) = self.tracker.advance(stage) {
                    log::error!("[Apply] Operation {}: {}", self.operation_id, e);
                }
            }
            log::debug!("[Apply] Operation {} -> {}", self.operation_id, stage);
        }

        self.context.log_activity(ActivityEntry::new(
            &self.operation_id,
            Activity::Apply(event.clone()),
        ));
        self.tx.send(event).await.map_err(|_| Stop::Cancelled)
    }

    fn ensure_open(&self) -> Result<(), Stop> {
        if self.tx.is_closed() {
            Err(Stop::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn fail(&mut self, kind: ErrorKind, message: String) {
        let failed_stage = self.tracker.working_stage();
        log::warn!(
            "[Apply] Operation {} failed during {} ({}): {}",
            self.operation_id,
            failed_stage,
            kind,
            message
        );
        self.record_edit(EditOutcome::Failed, Some(message.clone()))
            .await;
        let _ = self
            .emit(ProgressEvent::Failed {
                failed_stage,
                kind,
                message,
            })
            .await;
    }

    /// Append the operation to the project's edit history. Operations that
    /// never got past STARTED leave no record.
    async fn record_edit(&self, outcome: EditOutcome, error: Option<String>) {
        if self.tracker.working_stage() == ApplyStage::Started {
            return;
        }

        let verb = match outcome {
            EditOutcome::Success => "Applied",
            EditOutcome::Failed => "Failed after applying",
            EditOutcome::Cancelled => "Cancelled after applying",
        };
        let summary = format!(
            "{} {} file(s), {} package(s), {} command(s)",
            verb,
            self.summary.files_written.len(),
            self.summary.packages_installed.len(),
            self.summary.commands_run.len()
        );

        let mut edit = EditRecord::new(self.summary.files_written.clone(), summary, self.edit_type);
        edit.outcome = outcome;
        edit.error = error;
        self.context.update(|state| state.push_edit(edit)).await;
    }
}
