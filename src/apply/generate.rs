// Producer side of a generate operation

use super::{store_error_kind, Engine};
use crate::config::providers::split_model;
use crate::events::{Activity, ActivityEntry, ErrorKind, GenerationEvent};
use crate::models::{EditType, Message, MessageMetadata, Role};
use crate::parsers::imports::normalize_package_request;
use crate::parsers::scanner::TagKind;
use crate::parsers::{self, ParseError, Segment, StreamingScanner};
use crate::projects::ProjectContext;
use crate::providers::{
    create_provider, AiProvider, GenerationRequest, PromptMessage, PromptRole, ProviderError,
};
use crate::templates::PromptContext;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

/// Body of a generation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt: String,
    /// `provider/model`; the configured default when absent
    #[serde(default)]
    pub model: Option<String>,
    /// Forces edit mode on or off; inferred from the project history when absent
    #[serde(default)]
    pub is_edit: Option<bool>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

enum Stop {
    Cancelled,
    Failed(ErrorKind, String),
}

impl Engine {
    /// Provider and bare model name for a `provider/model` string
    fn resolve_provider(&self, model: &str) -> Result<(Arc<dyn AiProvider>, String), ProviderError> {
        match &self.ai_override {
            Some(provider) => Ok((Arc::clone(provider), split_model(model).1.to_string())),
            None => create_provider(model, &self.config.ai),
        }
    }
}

pub(super) async fn run(
    engine: Arc<Engine>,
    project_id: String,
    request: GenerateRequest,
    tx: mpsc::Sender<GenerationEvent>,
) {
    let context = match engine.store().get_or_create(&project_id).await {
        Ok(context) => context,
        Err(e) => {
            log::warn!("[Generate] Cannot start generation for '{}': {}", project_id, e);
            let _ = tx
                .send(GenerationEvent::Failed {
                    kind: store_error_kind(&e),
                    message: e.to_string(),
                })
                .await;
            return;
        }
    };

    let mut run = GenerateRun {
        engine,
        context,
        tx,
        operation_id: uuid::Uuid::new_v4().to_string(),
        seen_files: BTreeSet::new(),
        seen_packages: BTreeSet::new(),
        in_package: false,
    };

    match run.execute(request).await {
        Ok(()) => {}
        Err(Stop::Cancelled) => {
            log::info!("[Generate] Operation {} cancelled", run.operation_id);
        }
        Err(Stop::Failed(kind, message)) => {
            log::warn!(
                "[Generate] Operation {} failed ({}): {}",
                run.operation_id,
                kind,
                message
            );
            let _ = run.emit(GenerationEvent::Failed { kind, message }).await;
        }
    }
}

struct GenerateRun {
    engine: Arc<Engine>,
    context: Arc<ProjectContext>,
    tx: mpsc::Sender<GenerationEvent>,
    operation_id: String,
    seen_files: BTreeSet<String>,
    seen_packages: BTreeSet<String>,
    /// Inside a `<package>` tag while streaming
    in_package: bool,
}

impl GenerateRun {
    async fn execute(&mut self, request: GenerateRequest) -> Result<(), Stop> {
        let ai = self.engine.config().ai.clone();
        let model = request
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| ai.default_model.clone());

        // Prompt context is taken before the new message is appended
        let state = self.context.state().await;
        let cached = self.context.cached_files().await;
        let is_edit = request
            .is_edit
            .unwrap_or(!state.edits.is_empty() || !cached.is_empty());

        let mut files = Vec::with_capacity(cached.len());
        for path in cached {
            if let Some(content) = self.context.file_content(&path).await {
                files.push((path, content));
            }
        }
        let installed = self.context.installed_packages().await.unwrap_or_default();

        let prompt_context = PromptContext::new()
            .with_edit_mode(is_edit)
            .with_conversation(
                &state,
                ai.context_messages,
                self.engine.config().conversation.max_edits,
            )
            .with_files(files)
            .with_installed_packages(installed.iter().cloned());
        let system = self
            .engine
            .prompts
            .render_system_prompt(&prompt_context)
            .map_err(|e| Stop::Failed(ErrorKind::ProviderError, e.to_string()))?;

        self.context
            .update(|state| state.push_message(Message::new(Role::User, &request.prompt)))
            .await;

        self.emit(GenerationEvent::Started {
            project_id: self.context.project_id().to_string(),
            operation_id: self.operation_id.clone(),
            model: model.clone(),
            is_edit,
        })
        .await?;

        let (provider, model_name) = self
            .engine
            .resolve_provider(&model)
            .map_err(|e| Stop::Failed(ErrorKind::ProviderError, e.to_string()))?;
        log::info!(
            "[Generate] Operation {} using {} model '{}'",
            self.operation_id,
            provider.name(),
            model_name
        );

        let generation = GenerationRequest {
            model: model_name,
            system,
            messages: vec![PromptMessage {
                role: PromptRole::User,
                content: request.prompt,
            }],
            temperature: ai.temperature,
            max_tokens: ai.max_tokens,
        };

        // One deadline covers connecting and the whole token stream
        let deadline = Instant::now() + Duration::from_secs(ai.timeout_secs);
        let timed_out = || {
            Stop::Failed(
                ErrorKind::ProviderTimeout,
                format!("Generation timed out after {} seconds", ai.timeout_secs),
            )
        };

        let mut tokens = match timeout_at(deadline, provider.stream_tokens(generation)).await {
            Ok(Ok(tokens)) => tokens,
            Ok(Err(e)) => return Err(Stop::Failed(ErrorKind::ProviderError, e.to_string())),
            Err(_) => return Err(timed_out()),
        };

        let mut scanner = StreamingScanner::new();
        let mut response = String::new();
        loop {
            let next = timeout_at(deadline, tokens.next())
                .await
                .map_err(|_| timed_out())?;
            match next {
                None => break,
                Some(Err(e)) => return Err(Stop::Failed(ErrorKind::ProviderError, e.to_string())),
                Some(Ok(token)) => {
                    response.push_str(&token);
                    let segments = scanner.push(&token);
                    self.emit(GenerationEvent::Chunk { text: token }).await?;
                    self.announce(segments).await?;
                }
            }
        }
        let (rest, _) = scanner.finish();
        self.announce(rest).await?;

        let parsed = parsers::parse(&response).map_err(|e| match e {
            ParseError::EmptyResponse => Stop::Failed(ErrorKind::EmptyResponse, e.to_string()),
        })?;
        let detection = self
            .engine
            .detect_packages(&parsed.files, &parsed.packages, &installed);

        let files: Vec<String> = parsed.files.iter().map(|f| f.path.clone()).collect();
        let packages: Vec<String> = detection.classification.to_install.into_iter().collect();
        let warnings: Vec<String> = parsed
            .warnings
            .iter()
            .map(|w| w.to_string())
            .chain(detection.warnings.iter().map(|w| w.to_string()))
            .collect();

        let metadata = MessageMetadata {
            edited_files: files.clone(),
            packages: packages.clone(),
            edit_type: Some(if is_edit { EditType::Edit } else { EditType::Create }),
        };
        self.context
            .update(|state| {
                state.push_message(Message::new(Role::Assistant, &response).with_metadata(metadata))
            })
            .await;

        log::info!(
            "[Generate] Operation {} finished: {} file(s), {} package(s)",
            self.operation_id,
            files.len(),
            packages.len()
        );
        let _ = self
            .emit(GenerationEvent::Completed {
                response,
                files,
                packages,
                warnings,
            })
            .await;
        Ok(())
    }

    /// Emit detection events for the files and packages in tags and fences
    /// the scanner has completed. A file is announced once its whole block,
    /// closing tag included, has arrived.
    async fn announce(&mut self, segments: Vec<Segment>) -> Result<(), Stop> {
        for segment in segments {
            match &segment {
                Segment::TagOpen {
                    tag: TagKind::File, ..
                } => {
                    if let Some(path) = segment.attribute("path") {
                        self.file_detected(path.to_string()).await?;
                    }
                }
                Segment::TagOpen {
                    tag: TagKind::Package,
                    ..
                } => self.in_package = true,
                Segment::TagClose {
                    tag: TagKind::Package,
                } => self.in_package = false,
                Segment::Content(text) if self.in_package => {
                    let names: Vec<String> = text
                        .split(|c: char| c == ',' || c.is_whitespace())
                        .filter_map(normalize_package_request)
                        .collect();
                    for name in names {
                        if self.seen_packages.insert(name.clone()) {
                            self.emit(GenerationEvent::PackageDetected { name }).await?;
                        }
                    }
                }
                Segment::FenceOpen {
                    info_path,
                    heading_path,
                    ..
                } => {
                    if let Some(path) = info_path.as_ref().or(heading_path.as_ref()) {
                        self.file_detected(path.clone()).await?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn file_detected(&mut self, path: String) -> Result<(), Stop> {
        if path.trim().is_empty() || !self.seen_files.insert(path.clone()) {
            return Ok(());
        }
        self.emit(GenerationEvent::FileDetected { path }).await
    }

    async fn emit(&self, event: GenerationEvent) -> Result<(), Stop> {
        // Chunks would flood the activity log
        if !matches!(event, GenerationEvent::Chunk { .. }) {
            self.context.log_activity(ActivityEntry::new(
                &self.operation_id,
                Activity::Generate(event.clone()),
            ));
        }
        self.tx.send(event).await.map_err(|_| Stop::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request: GenerateRequest =
            serde_json::from_str(r#"{"prompt": "make a todo app"}"#).unwrap();
        assert_eq!(request, GenerateRequest::new("make a todo app"));
    }

    #[test]
    fn test_request_camel_case() {
        let request: GenerateRequest = serde_json::from_str(
            r#"{"prompt": "x", "model": "openai/gpt-4o", "isEdit": true}"#,
        )
        .unwrap();
        assert_eq!(request.model.as_deref(), Some("openai/gpt-4o"));
        assert_eq!(request.is_edit, Some(true));
    }
}
