// Conversation state operations: append, merge, trim, reset

use crate::models::{ConversationState, EditRecord, Message, StatePatch, TrimPolicy, TrimReport};
use chrono::{DateTime, Duration, Utc};

impl ConversationState {
    pub fn new(project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.into(),
            messages: Vec::new(),
            edits: Vec::new(),
            topic: None,
            preferences: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn push_edit(&mut self, edit: EditRecord) {
        self.edits.push(edit);
        self.touch();
    }

    /// Shallow merge: absent fields stay, preference keys are merged one by one
    pub fn apply_patch(&mut self, patch: StatePatch) {
        if let Some(topic) = patch.topic {
            self.topic = Some(topic);
        }
        if let Some(preferences) = patch.preferences {
            for (key, value) in preferences {
                self.preferences.insert(key, value);
            }
        }
        self.touch();
    }

    /// Drop the oldest messages and edits beyond the policy limits.
    /// The newest entry of each list always survives.
    pub fn trim(&mut self, policy: &TrimPolicy) -> TrimReport {
        self.trim_at(policy, Utc::now())
    }

    pub(crate) fn trim_at(&mut self, policy: &TrimPolicy, now: DateTime<Utc>) -> TrimReport {
        // An age beyond chrono's range excludes nothing
        let cutoff = policy.max_age_secs.and_then(|secs| {
            Duration::try_seconds(secs).and_then(|age| now.checked_sub_signed(age))
        });

        let report = TrimReport {
            messages_removed: trim_oldest(&mut self.messages, policy.max_messages, cutoff, |m| {
                m.timestamp
            }),
            edits_removed: trim_oldest(&mut self.edits, policy.max_edits, cutoff, |e| e.timestamp),
        };

        if report.messages_removed > 0 || report.edits_removed > 0 {
            self.touch();
        }
        report
    }

    /// Forget history, topic and preferences; identity and creation time stay
    pub fn clear_history(&mut self) {
        self.messages.clear();
        self.edits.clear();
        self.topic = None;
        self.preferences.clear();
        self.touch();
    }

    /// The last `n` messages, oldest first
    pub fn recent_messages(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn recent_edits(&self, n: usize) -> &[EditRecord] {
        let start = self.edits.len().saturating_sub(n);
        &self.edits[start..]
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Remove entries from the front of a chronological list. Returns how many
/// were removed; at least one entry is always kept.
fn trim_oldest<T>(
    items: &mut Vec<T>,
    max_count: Option<usize>,
    cutoff: Option<DateTime<Utc>>,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
) -> usize {
    if items.len() <= 1 {
        return 0;
    }

    let over_count = max_count
        .map(|max| items.len().saturating_sub(max.max(1)))
        .unwrap_or(0);
    let too_old = cutoff
        .map(|cutoff| items.iter().take_while(|item| timestamp(item) < cutoff).count())
        .unwrap_or(0);

    let remove = over_count.max(too_old).min(items.len() - 1);
    items.drain(..remove);
    remove
}
