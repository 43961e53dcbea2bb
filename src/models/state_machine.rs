// Apply-operation stage state machine with validation

use super::ApplyStage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageTransitionError {
    #[error("Invalid stage transition from {from} to {to}")]
    InvalidTransition { from: ApplyStage, to: ApplyStage },

    #[error("Operation already in terminal stage: {0}")]
    AlreadyTerminal(ApplyStage),
}

/// Validates if an apply operation can move from one stage to another
pub fn can_transition(from: ApplyStage, to: ApplyStage) -> bool {
    use ApplyStage::*;

    match (from, to) {
        // Nothing leaves a terminal stage
        (Completed, _) | (Failed, _) => false,

        // Any live stage can fail
        (_, Failed) => true,

        (Started, Parsing) => true,

        // Warnings are reported right after parsing, any number of them
        (Parsing, ParseWarning) => true,
        (ParseWarning, ParseWarning) => true,
        (Parsing, InstallingPackages) => true,
        (ParseWarning, InstallingPackages) => true,

        (InstallingPackages, WritingFiles) => true,
        (WritingFiles, RunningCommands) => true,
        (RunningCommands, Completed) => true,

        _ => false,
    }
}

/// Validates and performs a stage transition
pub fn transition_stage(
    current: ApplyStage,
    target: ApplyStage,
) -> Result<ApplyStage, StageTransitionError> {
    if is_terminal_stage(current) {
        return Err(StageTransitionError::AlreadyTerminal(current));
    }
    if !can_transition(current, target) {
        return Err(StageTransitionError::InvalidTransition {
            from: current,
            to: target,
        });
    }

    Ok(target)
}

/// Check if a stage ends the operation
pub fn is_terminal_stage(stage: ApplyStage) -> bool {
    matches!(stage, ApplyStage::Completed | ApplyStage::Failed)
}

/// Check if a stage performs sandbox side effects
pub fn is_side_effect_stage(stage: ApplyStage) -> bool {
    matches!(
        stage,
        ApplyStage::InstallingPackages | ApplyStage::WritingFiles | ApplyStage::RunningCommands
    )
}

/// Get the next stage on the success path
pub fn next_stage(current: ApplyStage) -> Option<ApplyStage> {
    match current {
        ApplyStage::Started => Some(ApplyStage::Parsing),
        ApplyStage::Parsing | ApplyStage::ParseWarning => Some(ApplyStage::InstallingPackages),
        ApplyStage::InstallingPackages => Some(ApplyStage::WritingFiles),
        ApplyStage::WritingFiles => Some(ApplyStage::RunningCommands),
        ApplyStage::RunningCommands => Some(ApplyStage::Completed),
        ApplyStage::Completed | ApplyStage::Failed => None,
    }
}

/// Tracks the current stage of one operation and rejects illegal moves
#[derive(Debug, Clone)]
pub struct StageTracker {
    current: ApplyStage,
    history: Vec<ApplyStage>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            current: ApplyStage::Started,
            history: vec![ApplyStage::Started],
        }
    }

    pub fn current(&self) -> ApplyStage {
        self.current
    }

    /// The last non-warning stage, used to name where a failure happened
    pub fn working_stage(&self) -> ApplyStage {
        self.history
            .iter()
            .rev()
            .copied()
            .find(|s| *s != ApplyStage::ParseWarning && *s != ApplyStage::Failed)
            .unwrap_or(ApplyStage::Started)
    }

    pub fn advance(&mut self, target: ApplyStage) -> Result<ApplyStage, StageTransitionError> {
        let next = transition_stage(self.current, target)?;
        self.current = next;
        self.history.push(next);
        Ok(next)
    }

    pub fn history(&self) -> &[ApplyStage] {
        &self.history
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}
