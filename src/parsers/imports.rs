// Import scanner - finds module specifiers in generated source files
//
// Recognized forms: `import x from "m"`, `import "m"`, `import("m")`,
// `require("m")` and `export ... from "m"`. Each file is scanned on its own;
// a malformed statement produces a warning and the scan continues.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// File extensions whose contents are scanned for imports
const SCRIPT_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "mts", "cts", "vue", "svelte", "astro",
];

/// Each pattern ends on the opening quote of the specifier
fn import_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // import x from "m", import { a, b } from "m", import * as ns from "m"
            r#"(?:^|[^\w$.])import\s*(?:type\s+)?[\w$*{}\s,]*?\bfrom\s*["'`]"#,
            // import "m" (side effect only)
            r#"(?:^|[^\w$.])import\s*["'`]"#,
            // import("m")
            r#"(?:^|[^\w$.])import\s*\(\s*["'`]"#,
            // require("m")
            r#"(?:^|[^\w$.])require\s*\(\s*["'`]"#,
            // export * from "m", export { a } from "m"
            r#"(?:^|[^\w$.])export\s*(?:type\s+)?(?:\*(?:\s*as\s+[\w$]+)?|\{[^}]*\})\s*from\s*["'`]"#,
        ]
        .iter()
        .map(|p| Regex::new(p).expect("Invalid regex"))
        .collect()
    })
}

/// A statement that could not be turned into a specifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportWarning {
    pub file: String,
    /// 1-based line of the offending statement
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ImportWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}

/// What a raw specifier refers to after normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Specifier {
    /// An installable package name (or a `node:` built-in)
    Package(String),
    /// A local file, URL or path alias
    Local,
    /// Not a usable specifier
    Invalid(String),
}

/// Result of scanning a set of files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    /// Union of all package specifiers found
    pub specifiers: BTreeSet<String>,
    /// Specifiers per file path, files without imports omitted
    pub by_file: BTreeMap<String, BTreeSet<String>>,
    pub warnings: Vec<ImportWarning>,
}

/// Whether a file is source code that may contain imports
pub fn is_script_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            SCRIPT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        _ => false,
    }
}

/// Scan every script file in `files` for package imports
pub fn extract<'a, I>(files: I) -> Extraction
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut extraction = Extraction::default();

    for (path, text) in files {
        if !is_script_file(path) {
            continue;
        }
        let (found, warnings) = extract_from_source(path, text);
        extraction.warnings.extend(warnings);
        if !found.is_empty() {
            extraction.specifiers.extend(found.iter().cloned());
            extraction.by_file.insert(path.to_string(), found);
        }
    }

    extraction
}

/// Scan a single source text
pub fn extract_from_source(path: &str, text: &str) -> (BTreeSet<String>, Vec<ImportWarning>) {
    let mut found = BTreeSet::new();
    let mut warnings = Vec::new();

    // Several patterns may stop on the same quote
    let mut quote_positions = BTreeSet::new();
    for pattern in import_patterns() {
        for m in pattern.find_iter(text) {
            // Skip the boundary character matched before the keyword
            let keyword = m.start()
                + m.as_str()
                    .find(|c: char| c.is_ascii_alphabetic())
                    .unwrap_or(0);
            if !in_line_comment(text, keyword) {
                quote_positions.insert(m.end() - 1);
            }
        }
    }

    for quote_pos in quote_positions {
        let line = text[..quote_pos].matches('\n').count() + 1;
        let raw = match read_quoted(text, quote_pos) {
            Ok(Some(raw)) => raw,
            // Template literal with interpolation, resolved at runtime
            Ok(None) => continue,
            Err(message) => {
                warnings.push(ImportWarning {
                    file: path.to_string(),
                    line,
                    message,
                });
                continue;
            }
        };

        match normalize_specifier(raw) {
            Specifier::Package(name) => {
                found.insert(name);
            }
            Specifier::Local => {}
            Specifier::Invalid(message) => warnings.push(ImportWarning {
                file: path.to_string(),
                line,
                message,
            }),
        }
    }

    if !warnings.is_empty() {
        log::debug!("{} import warning(s) in {}", warnings.len(), path);
    }
    (found, warnings)
}

/// Read the string literal whose opening quote is at `quote_pos`
fn read_quoted(text: &str, quote_pos: usize) -> Result<Option<&str>, String> {
    let quote = text.as_bytes()[quote_pos];
    let start = quote_pos + 1;
    let bytes = text.as_bytes();
    let mut i = start;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if quote != b'`' => break,
            b'$' if quote == b'`' && bytes.get(i + 1) == Some(&b'{') => return Ok(None),
            b if b == quote => return Ok(Some(&text[start..i])),
            _ => i += 1,
        }
    }

    Err(format!(
        "Unterminated string in import of '{}'",
        crate::utils::truncate_string(text[start..].lines().next().unwrap_or_default(), 40)
    ))
}

/// True when `pos` sits after `//` or inside a `/* */`-style comment line
fn in_line_comment(text: &str, pos: usize) -> bool {
    let line_start = text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let prefix = text[line_start..pos].trim_start();
    if prefix.starts_with("//") {
        return true;
    }
    (prefix.starts_with("/*") || prefix.starts_with('*')) && !prefix.contains("*/")
}

/// Reduce a raw specifier to the package that provides it.
///
/// `@scope/pkg/sub` becomes `@scope/pkg`, `lodash/fp` becomes `lodash`,
/// `node:fs/promises` becomes `node:fs`. Relative paths, absolute paths,
/// URLs and path aliases (`@/`, `~/`, `#`) are local.
pub fn normalize_specifier(raw: &str) -> Specifier {
    let spec = raw.trim();
    if spec.is_empty() {
        return Specifier::Invalid("Empty module specifier".to_string());
    }

    // Bundler query suffixes (`x?raw`) are not part of the name
    let spec = spec.split(['?', '#']).next().unwrap_or(spec);
    if raw.trim().starts_with('#') {
        return Specifier::Local;
    }

    if spec.starts_with('.')
        || spec.starts_with('/')
        || spec.starts_with("@/")
        || spec.starts_with("~/")
        || spec.contains("://")
        || spec.starts_with("data:")
        || spec.starts_with("file:")
    {
        return Specifier::Local;
    }

    if let Some(rest) = spec.strip_prefix("node:") {
        let module = rest.split('/').next().unwrap_or_default();
        if module.is_empty() {
            return Specifier::Invalid(format!("Invalid built-in specifier '{}'", spec));
        }
        return Specifier::Package(format!("node:{}", module));
    }

    let name = if spec.starts_with('@') {
        let mut parts = spec.splitn(3, '/');
        let scope = parts.next().unwrap_or_default();
        match parts.next() {
            Some(package) if scope.len() > 1 && !package.is_empty() => {
                format!("{}/{}", scope, package)
            }
            _ => return Specifier::Invalid(format!("Incomplete scoped specifier '{}'", spec)),
        }
    } else {
        spec.split('/').next().unwrap_or_default().to_string()
    };

    if !is_valid_package_name(&name) {
        return Specifier::Invalid(format!("Invalid package name '{}'", name));
    }
    Specifier::Package(name)
}

/// Normalize an explicitly requested package, dropping a version suffix
/// (`react@18.2.0`, `@scope/pkg@^1`)
pub fn normalize_package_request(request: &str) -> Option<String> {
    let request = request.trim();
    let without_version = match request.strip_prefix('@') {
        Some(rest) => match rest.split_once('@') {
            Some((name, _)) => &request[..name.len() + 1],
            None => request,
        },
        None => request.split('@').next().unwrap_or(request),
    };
    match normalize_specifier(without_version) {
        Specifier::Package(name) => Some(name.to_lowercase()),
        _ => None,
    }
}

fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 214
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '/' | '-' | '_' | '.' | '~'))
}
