// Conversation snapshot file
//
// Written atomically (temp file + rename) while holding an exclusive lock on
// a sidecar `.lock` file, so two engines sharing a snapshot path never
// interleave writes.

use crate::models::ConversationState;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub projects: Vec<ConversationState>,
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock = path.as_os_str().to_owned();
    lock.push(".lock");
    PathBuf::from(lock)
}

/// Hold an exclusive lock on the snapshot's sidecar file until dropped
fn acquire_lock(path: &Path) -> Result<File> {
    let lock_path = lock_path_for(path);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| anyhow!("Failed to open lock file {:?}: {}", lock_path, e))?;
    file.lock_exclusive()
        .map_err(|e| anyhow!("Failed to lock {:?}: {}", lock_path, e))?;
    Ok(file)
}

/// Write all conversation states to `path`
pub fn save_snapshot(path: &Path, projects: Vec<ConversationState>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| anyhow!("Failed to create directory {:?}: {}", parent, e))?;
    }

    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        projects,
    };
    let content = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| anyhow!("Failed to serialize snapshot: {}", e))?;

    let _lock = acquire_lock(path)?;
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)
        .map_err(|e| anyhow!("Failed to write temp file {:?}: {}", temp_path, e))?;
    fs::rename(&temp_path, path)
        .map_err(|e| anyhow!("Failed to rename {:?} to {:?}: {}", temp_path, path, e))?;

    log::info!(
        "Saved conversation snapshot with {} project(s) to {:?}",
        snapshot.projects.len(),
        path
    );
    Ok(())
}

/// Read conversation states from `path`; a missing file holds no projects
pub fn load_snapshot(path: &Path) -> Result<Vec<ConversationState>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let _lock = acquire_lock(path)?;
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read snapshot {:?}: {}", path, e))?;
    let snapshot: Snapshot = serde_json::from_str(&content)
        .map_err(|e| anyhow!("Failed to parse snapshot {:?}: {}", path, e))?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(anyhow!(
            "Unsupported snapshot version {} in {:?} (expected {})",
            snapshot.version,
            path,
            SNAPSHOT_VERSION
        ));
    }

    Ok(snapshot.projects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, Role, StatePatch};
    use tempfile::TempDir;

    #[test]
    fn test_missing_snapshot_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let states = load_snapshot(&temp_dir.path().join("state.json")).unwrap();
        assert!(states.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/state.json");

        let mut state = ConversationState::new("p1");
        state.push_message(Message::new(Role::User, "build a todo app"));
        state.apply_patch(StatePatch::preference("style", "targeted"));

        save_snapshot(&path, vec![state.clone()]).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let loaded = load_snapshot(&path).unwrap();
        assert_eq!(loaded, vec![state]);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"version": 99, "savedAt": "2024-01-01T00:00:00Z", "projects": []}"#,
        )
        .unwrap();
        assert!(load_snapshot(&path).is_err());
    }

    #[test]
    fn test_rejects_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_snapshot(&path).is_err());
    }
}
