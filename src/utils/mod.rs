// Utility functions

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// Project identifier used when a request does not name one
pub const DEFAULT_PROJECT_ID: &str = "default";

/// Maximum length of a project identifier
const MAX_PROJECT_ID_LEN: usize = 64;

/// Truncate a string to approximately max_bytes, ensuring we don't cut in the middle of a UTF-8 character
pub fn truncate_string(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    // Find the last valid char boundary at or before max_bytes
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Check that a project identifier is safe to use as a directory name.
///
/// Accepts 1-64 characters from `[A-Za-z0-9_-]`.
pub fn validate_project_id(project_id: &str) -> Result<(), String> {
    if project_id.is_empty() {
        return Err("Project id must not be empty".to_string());
    }
    if project_id.len() > MAX_PROJECT_ID_LEN {
        return Err(format!(
            "Project id is longer than {} characters",
            MAX_PROJECT_ID_LEN
        ));
    }
    if let Some(c) = project_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(format!("Project id contains invalid character '{}'", c));
    }
    Ok(())
}

/// Base directory for engine data (`~/.builder-engine`)
pub fn engine_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".builder-engine")
}

/// Safely acquire a mutex lock, recovering from poisoning by returning the guard.
/// The caches guarded this way stay usable even if a writer panicked.
pub fn lock_mutex_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Mutex was poisoned, recovering: {}", poisoned);
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string_respects_char_boundary() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello", 3), "hel");
        // 'é' is two bytes
        assert_eq!(truncate_string("héllo", 2), "h");
    }

    #[test]
    fn test_validate_project_id() {
        assert!(validate_project_id("default").is_ok());
        assert!(validate_project_id("proj_01-A").is_ok());
        assert!(validate_project_id("").is_err());
        assert!(validate_project_id("../etc").is_err());
        assert!(validate_project_id("a b").is_err());
        assert!(validate_project_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_engine_home() {
        assert!(engine_home().ends_with(".builder-engine"));
    }

    #[test]
    fn test_lock_mutex_recover() {
        let mutex = Mutex::new(5);
        assert_eq!(*lock_mutex_recover(&mutex), 5);
    }
}
