// Path normalization - maps AI-supplied file paths onto the project layout

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// Files kept at the project root. A single `*` matches any run of characters.
pub const DEFAULT_ROOT_FILES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "vite.config.*",
    "tailwind.config.*",
    "postcss.config.*",
    "next.config.*",
    "babel.config.*",
    "webpack.config.*",
    "eslint.config.*",
    "prettier.config.*",
    "tsconfig*.json",
    "jsconfig.json",
    "components.json",
    "vercel.json",
    "index.html",
    ".env*",
    ".eslintrc*",
    ".prettierrc*",
    ".gitignore",
    ".npmrc",
    ".nvmrc",
    "*.md",
];

/// Directories that are already valid top-level locations
pub const DEFAULT_ROOT_DIRS: &[&str] = &["src", "public"];

pub const DEFAULT_SOURCE_ROOT: &str = "src";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidPathReason {
    Empty,
    Traversal,
    AbsoluteDrive,
    ControlCharacter,
}

impl std::fmt::Display for InvalidPathReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            InvalidPathReason::Empty => "path is empty",
            InvalidPathReason::Traversal => "path contains '..'",
            InvalidPathReason::AbsoluteDrive => "path names a drive",
            InvalidPathReason::ControlCharacter => "path contains a control character",
        };
        write!(f, "{}", reason)
    }
}

/// A path that cannot be written inside the project
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid path '{path}': {reason}")]
pub struct InvalidPath {
    pub path: String,
    pub reason: InvalidPathReason,
}

/// A project-relative path using `/` separators
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NormalizedPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Layout rules used by `normalize`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct PathPolicy {
    pub source_root: String,
    pub root_dirs: Vec<String>,
    pub root_files: Vec<String>,
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self {
            source_root: DEFAULT_SOURCE_ROOT.to_string(),
            root_dirs: DEFAULT_ROOT_DIRS.iter().map(|s| s.to_string()).collect(),
            root_files: DEFAULT_ROOT_FILES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PathPolicy {
    /// Normalize a path: unify separators, drop `.` segments and leading
    /// slashes, reject `..`, keep root files and root directories in place,
    /// and move everything else under the source root.
    ///
    /// Normalizing an already normalized path returns it unchanged.
    pub fn normalize(&self, path: &str) -> Result<NormalizedPath, InvalidPath> {
        let invalid = |reason| InvalidPath {
            path: path.to_string(),
            reason,
        };

        let unified = path.trim().replace('\\', "/");
        if unified.chars().any(char::is_control) {
            return Err(invalid(InvalidPathReason::ControlCharacter));
        }
        let bytes = unified.as_bytes();
        if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            return Err(invalid(InvalidPathReason::AbsoluteDrive));
        }

        let mut segments = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(invalid(InvalidPathReason::Traversal)),
                s => segments.push(s),
            }
        }
        let Some(first) = segments.first() else {
            return Err(invalid(InvalidPathReason::Empty));
        };

        let keep = (segments.len() == 1 && self.is_root_file(first))
            || *first == self.source_root
            || self.root_dirs.iter().any(|d| d.as_str() == *first);

        let joined = segments.join("/");
        if keep {
            Ok(NormalizedPath(joined))
        } else {
            Ok(NormalizedPath(format!("{}/{}", self.source_root, joined)))
        }
    }

    pub fn is_root_file(&self, name: &str) -> bool {
        self.root_files.iter().any(|pattern| glob_match(pattern, name))
    }
}

/// Normalize with the default layout
pub fn normalize(path: &str) -> Result<NormalizedPath, InvalidPath> {
    static POLICY: OnceLock<PathPolicy> = OnceLock::new();
    POLICY.get_or_init(PathPolicy::default).normalize(path)
}

/// Case-insensitive shell-style match; an invalid pattern only matches itself
fn glob_match(pattern: &str, name: &str) -> bool {
    let options = glob::MatchOptions {
        case_sensitive: false,
        ..glob::MatchOptions::new()
    };
    match glob::Pattern::new(pattern) {
        Ok(compiled) => compiled.matches_with(name, options),
        Err(e) => {
            log::debug!("Invalid root file pattern '{}': {}", pattern, e);
            pattern.eq_ignore_ascii_case(name)
        }
    }
}
