// Package classification - splits specifiers into built-in, installed and to-install

use super::imports::{self, Extraction, ImportWarning};
use crate::models::{FileOp, PackageClassification};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Node.js runtime modules that are never installable packages
pub const DEFAULT_BUILTINS: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "cluster",
    "constants",
    "crypto",
    "dgram",
    "dns",
    "events",
    "fs",
    "http",
    "https",
    "module",
    "net",
    "os",
    "path",
    "process",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "timers",
    "tls",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "worker_threads",
    "zlib",
];

/// Manifest sections whose keys count as installed
const MANIFEST_SECTIONS: &[&str] = &["dependencies", "devDependencies", "peerDependencies"];

pub fn default_builtins() -> BTreeSet<String> {
    DEFAULT_BUILTINS.iter().map(|s| s.to_string()).collect()
}

/// `node:` specifiers are built-in regardless of the configured list
pub fn is_builtin(specifier: &str, builtins: &BTreeSet<String>) -> bool {
    specifier.starts_with("node:") || builtins.contains(specifier)
}

/// Partition `specifiers` into exactly one of three sets each.
///
/// Built-in wins over installed, installed wins over to-install.
pub fn classify(
    specifiers: &BTreeSet<String>,
    installed: &BTreeSet<String>,
    builtins: &BTreeSet<String>,
) -> PackageClassification {
    let mut classification = PackageClassification::default();

    for specifier in specifiers {
        let target = if is_builtin(specifier, builtins) {
            &mut classification.builtin
        } else if installed.contains(specifier) {
            &mut classification.already_installed
        } else {
            &mut classification.to_install
        };
        target.insert(specifier.clone());
    }

    classification
}

/// Read installed package names from a `package.json` document
pub fn installed_from_manifest(manifest: &str) -> Result<BTreeSet<String>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(manifest)?;

    Ok(MANIFEST_SECTIONS
        .iter()
        .filter_map(|section| value.get(section).and_then(|v| v.as_object()))
        .flat_map(|deps| deps.keys().cloned())
        .collect())
}

/// Outcome of a detection run over a set of files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    /// Specifiers found in file contents
    pub detected: BTreeSet<String>,
    /// Explicitly requested packages after normalization
    pub explicit: BTreeSet<String>,
    pub classification: PackageClassification,
    pub warnings: Vec<ImportWarning>,
}

/// Scan files for imports, merge in explicitly requested packages and
/// classify the union
pub fn detect_packages(
    files: &[FileOp],
    explicit: &BTreeSet<String>,
    installed: &BTreeSet<String>,
    builtins: &BTreeSet<String>,
) -> Detection {
    let Extraction {
        specifiers,
        warnings,
        ..
    } = imports::extract(files.iter().map(|f| (f.path.as_str(), f.content.as_str())));

    let explicit: BTreeSet<String> = explicit
        .iter()
        .filter_map(|p| imports::normalize_package_request(p))
        .collect();

    let all: BTreeSet<String> = specifiers.union(&explicit).cloned().collect();
    let classification = classify(&all, installed, builtins);

    log::debug!(
        "Detected {} specifier(s), {} explicit, {} to install",
        specifiers.len(),
        explicit.len(),
        classification.to_install.len()
    );

    Detection {
        detected: specifiers,
        explicit,
        classification,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classify_partitions_exactly() {
        let input = set(&["fs", "react", "axios", "node:path", "lodash"]);
        let installed = set(&["react", "fs"]);
        let builtins = default_builtins();

        let c = classify(&input, &installed, &builtins);

        assert_eq!(c.builtin, set(&["fs", "node:path"]));
        assert_eq!(c.already_installed, set(&["react"]));
        assert_eq!(c.to_install, set(&["axios", "lodash"]));
        assert_eq!(c.len(), input.len());
        assert!(c.builtin.is_disjoint(&c.already_installed));
        assert!(c.builtin.is_disjoint(&c.to_install));
        assert!(c.already_installed.is_disjoint(&c.to_install));
    }

    #[test]
    fn test_classify_empty() {
        let c = classify(&BTreeSet::new(), &BTreeSet::new(), &BTreeSet::new());
        assert!(c.is_empty());
    }

    #[test]
    fn test_installed_from_manifest() {
        let manifest = r#"{
            "name": "app",
            "dependencies": {"react": "^18.2.0", "react-dom": "^18.2.0"},
            "devDependencies": {"vite": "^5.0.0"},
            "peerDependencies": {"typescript": "*"}
        }"#;
        let installed = installed_from_manifest(manifest).unwrap();
        assert_eq!(installed, set(&["react", "react-dom", "typescript", "vite"]));
    }

    #[test]
    fn test_installed_from_manifest_without_deps() {
        assert!(installed_from_manifest(r#"{"name": "x"}"#).unwrap().is_empty());
        assert!(installed_from_manifest("not json").is_err());
    }

    #[test]
    fn test_detect_merges_explicit_packages() {
        let files = vec![FileOp {
            path: "src/App.jsx".to_string(),
            content: "import axios from 'axios';\nimport './util';".to_string(),
        }];
        let detection = detect_packages(
            &files,
            &set(&["lodash"]),
            &BTreeSet::new(),
            &BTreeSet::new(),
        );
        assert_eq!(detection.detected, set(&["axios"]));
        assert_eq!(detection.classification.to_install, set(&["axios", "lodash"]));
    }

    #[test]
    fn test_explicit_builtin_still_filtered() {
        let detection = detect_packages(&[], &set(&["fs", "react@18"]), &BTreeSet::new(), &default_builtins());
        assert_eq!(detection.classification.builtin, set(&["fs"]));
        assert_eq!(detection.classification.to_install, set(&["react"]));
    }
}
