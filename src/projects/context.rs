// Per-project state bundle

use crate::events::ActivityEntry;
use crate::models::ConversationState;
use crate::providers::SandboxProvider;
use crate::utils::lock_mutex_recover;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Isolated state for one project identifier.
///
/// The conversation sits behind its own lock, so writers of one project
/// never block another. Callers hold locks only around in-memory updates,
/// never across provider or sandbox I/O.
pub struct ProjectContext {
    project_id: String,
    conversation: RwLock<ConversationState>,
    /// `None` until read from the sandbox manifest
    installed: RwLock<Option<BTreeSet<String>>>,
    /// Content of files written by apply operations
    files: RwLock<BTreeMap<String, String>>,
    activity: Mutex<VecDeque<ActivityEntry>>,
    activity_capacity: usize,
    /// Routing only; the sandbox is owned by whoever created it
    sandbox: Mutex<Option<Weak<dyn SandboxProvider>>>,
    last_active: Mutex<Instant>,
}

impl ProjectContext {
    pub fn new(project_id: impl Into<String>, activity_capacity: usize) -> Self {
        let project_id = project_id.into();
        let state = ConversationState::new(project_id.clone());
        Self::from_state(state, activity_capacity)
    }

    /// Rebuild a context around a previously saved conversation
    pub fn from_state(state: ConversationState, activity_capacity: usize) -> Self {
        Self {
            project_id: state.project_id.clone(),
            conversation: RwLock::new(state),
            installed: RwLock::new(None),
            files: RwLock::new(BTreeMap::new()),
            activity: Mutex::new(VecDeque::new()),
            activity_capacity: activity_capacity.max(1),
            sandbox: Mutex::new(None),
            last_active: Mutex::new(Instant::now()),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Consistent copy of the conversation
    pub async fn state(&self) -> ConversationState {
        self.touch();
        self.conversation.read().await.clone()
    }

    /// Read the conversation without cloning it
    pub async fn read<R>(&self, f: impl FnOnce(&ConversationState) -> R) -> R {
        self.touch();
        f(&*self.conversation.read().await)
    }

    /// Mutate the conversation under the project's write lock
    pub async fn update<R>(&self, f: impl FnOnce(&mut ConversationState) -> R) -> R {
        self.touch();
        f(&mut *self.conversation.write().await)
    }

    /// Discard history, cached files and activity. Installed-package
    /// knowledge survives.
    pub async fn reset(&self) {
        self.update(|state| state.clear_history()).await;
        self.files.write().await.clear();
        lock_mutex_recover(&self.activity).clear();
    }

    // ------------------------------------------------------------------
    // Installed packages
    // ------------------------------------------------------------------

    pub async fn installed_packages(&self) -> Option<BTreeSet<String>> {
        self.installed.read().await.clone()
    }

    pub async fn set_installed(&self, packages: BTreeSet<String>) {
        *self.installed.write().await = Some(packages);
    }

    /// Record newly installed packages
    pub async fn extend_installed<I>(&self, packages: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.installed
            .write()
            .await
            .get_or_insert_with(BTreeSet::new)
            .extend(packages);
    }

    // ------------------------------------------------------------------
    // File cache
    // ------------------------------------------------------------------

    pub async fn record_file(&self, path: &str, content: &str) {
        self.files
            .write()
            .await
            .insert(path.to_string(), content.to_string());
    }

    pub async fn file_content(&self, path: &str) -> Option<String> {
        self.files.read().await.get(path).cloned()
    }

    pub async fn cached_files(&self) -> Vec<String> {
        self.files.read().await.keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Activity log
    // ------------------------------------------------------------------

    /// Append to the activity ring buffer, dropping the oldest entry when full
    pub fn log_activity(&self, entry: ActivityEntry) {
        let mut activity = lock_mutex_recover(&self.activity);
        if activity.len() >= self.activity_capacity {
            activity.pop_front();
        }
        activity.push_back(entry);
    }

    pub fn activity(&self) -> Vec<ActivityEntry> {
        lock_mutex_recover(&self.activity).iter().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Sandbox routing
    // ------------------------------------------------------------------

    pub fn attach_sandbox(&self, sandbox: &Arc<dyn SandboxProvider>) {
        *lock_mutex_recover(&self.sandbox) = Some(Arc::downgrade(sandbox));
    }

    /// The attached sandbox, if it is still alive
    pub fn sandbox(&self) -> Option<Arc<dyn SandboxProvider>> {
        lock_mutex_recover(&self.sandbox)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub fn detach_sandbox(&self) -> Option<Arc<dyn SandboxProvider>> {
        lock_mutex_recover(&self.sandbox)
            .take()
            .and_then(|weak| weak.upgrade())
    }

    // ------------------------------------------------------------------
    // Idle tracking
    // ------------------------------------------------------------------

    pub fn touch(&self) {
        *lock_mutex_recover(&self.last_active) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        lock_mutex_recover(&self.last_active).elapsed()
    }
}

impl std::fmt::Debug for ProjectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectContext")
            .field("project_id", &self.project_id)
            .field("activity_capacity", &self.activity_capacity)
            .finish_non_exhaustive()
    }
}
