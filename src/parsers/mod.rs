// AI response parsing
//
// Raw response text flows scanner -> assembler -> ParsedResponse. File
// contents are scanned for imports by `imports`, classified by `classify`,
// and file paths are mapped onto the project layout by `paths`.

pub mod assembler;
pub mod classify;
pub mod imports;
pub mod paths;
pub mod scanner;

use crate::models::{ParseWarning, ParsedResponse};
use thiserror::Error;

pub use assembler::assemble;
pub use classify::{classify, detect_packages, installed_from_manifest, Detection};
pub use imports::{extract, Extraction, ImportWarning};
pub use paths::{normalize, InvalidPath, NormalizedPath, PathPolicy};
pub use scanner::{scan, Segment, StreamingScanner};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("AI response is empty")]
    EmptyResponse,
}

/// Parse a complete AI response into a change-set.
///
/// Fails only for empty or whitespace-only input. A response with nothing
/// actionable in it is a valid empty result carrying a warning.
pub fn parse(raw: &str) -> Result<ParsedResponse, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    let scanned = scan(raw);
    let mut parsed = assemble(scanned.segments);

    // Scanner notes come first: they describe input that never reached the assembler
    let mut warnings = scanned.notes;
    warnings.append(&mut parsed.warnings);
    parsed.warnings = warnings;

    if parsed.is_empty() && parsed.unattributed_blocks.is_empty() {
        parsed.warnings.push(ParseWarning::NoActionableContent);
    }

    for warning in &parsed.warnings {
        log::debug!("Parse warning: {}", warning);
    }
    log::debug!(
        "Parsed response: {} file(s), {} package(s), {} command(s)",
        parsed.files.len(),
        parsed.packages.len(),
        parsed.commands.len()
    );

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileOp;

    #[test]
    fn test_empty_input_fails() {
        assert_eq!(parse(""), Err(ParseError::EmptyResponse));
        assert_eq!(parse("  \n\t "), Err(ParseError::EmptyResponse));
    }

    #[test]
    fn test_plain_text_is_empty_result_with_warning() {
        let parsed = parse("Sure, I can help with that!").unwrap();
        assert!(parsed.is_empty());
        assert_eq!(parsed.warnings, vec![ParseWarning::NoActionableContent]);
    }

    #[test]
    fn test_end_to_end_example() {
        let parsed = parse(
            "<file path=\"src/App.jsx\">import axios from 'axios';\nimport './util';</file><package>lodash</package>",
        )
        .unwrap();
        assert_eq!(
            parsed.files,
            vec![FileOp {
                path: "src/App.jsx".to_string(),
                content: "import axios from 'axios';\nimport './util';".to_string(),
            }]
        );
        assert_eq!(parsed.packages.iter().collect::<Vec<_>>(), vec!["lodash"]);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_unterminated_note_precedes_other_warnings() {
        let parsed = parse("<file path=\"a.js\"></file><file path=\"b.js\">cut").unwrap();
        assert!(matches!(
            parsed.warnings[0],
            ParseWarning::UnterminatedTag { .. }
        ));
        assert!(matches!(parsed.warnings[1], ParseWarning::EmptyFile { .. }));
    }

    #[test]
    fn test_mixed_dialects() {
        let raw = "I'll create two files.\n\n<file path=\"src/App.jsx\">\nexport default function App() { return <h1>Hi</h1>; }\n</file>\n\n### src/index.css\n```css\nbody { margin: 0; }\n```\n\n<command>npm run dev</command>";
        let parsed = parse(raw).unwrap();
        let paths: Vec<_> = parsed.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/App.jsx", "src/index.css"]);
        assert_eq!(parsed.commands, vec!["npm run dev"]);
        assert_eq!(
            parsed.files[0].content,
            "export default function App() { return <h1>Hi</h1>; }"
        );
    }
}
