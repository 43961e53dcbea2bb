// Response assembler - builds a ParsedResponse from scanner segments

use super::scanner::{Segment, TagKind};
use crate::models::{CodeBlock, FileOp, ParseWarning, ParsedResponse};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Matches a path directive on the first line of a fenced block:
/// `// path: x`, `# file: x`, `/* path: x */`, `<!-- path: x -->`
fn path_directive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?://|#|/\*|<!--)\s*(?i:path|file|filename)\s*:\s*(\S+?)\s*(?:\*/|-->)?\s*$",
        )
        .expect("Invalid regex")
    })
}

/// Assemble scanner segments into a structured change-set.
///
/// Files are last-write-wins per path but keep the position of their first
/// occurrence. Package names are lower-cased and deduplicated. Commands are
/// kept verbatim in discovery order.
pub fn assemble(segments: impl IntoIterator<Item = Segment>) -> ParsedResponse {
    let mut assembler = Assembler::default();
    let mut segments = segments.into_iter().peekable();

    while let Some(segment) = segments.next() {
        match segment {
            Segment::TagOpen { tag, .. } => {
                let path = segment.attribute("path").map(str::to_string);
                let mut body = String::new();
                if let Some(Segment::Content(_)) = segments.peek() {
                    if let Some(Segment::Content(content)) = segments.next() {
                        body = content;
                    }
                }
                if let Some(Segment::TagClose { tag: close }) = segments.peek() {
                    if *close == tag {
                        segments.next();
                    }
                }
                assembler.tag(tag, path, &body);
            }
            Segment::FenceOpen {
                language,
                info_path,
                heading_path,
            } => {
                let body = match segments.peek() {
                    Some(Segment::Content(_)) => match segments.next() {
                        Some(Segment::Content(content)) => content,
                        _ => String::new(),
                    },
                    _ => String::new(),
                };
                if let Some(Segment::FenceClose) = segments.peek() {
                    segments.next();
                }
                assembler.fence(language, info_path, heading_path, &body);
            }
            Segment::Text(_) => {}
            Segment::Unrecognized { raw } => {
                assembler
                    .parsed
                    .warnings
                    .push(ParseWarning::MalformedTag { raw });
            }
            other => {
                assembler
                    .parsed
                    .warnings
                    .push(ParseWarning::UnrecognizedSegment {
                        raw: format!("{:?}", other),
                    });
            }
        }
    }

    assembler.parsed
}

#[derive(Default)]
struct Assembler {
    parsed: ParsedResponse,
    /// Dedup key -> index into `parsed.files`
    file_index: HashMap<String, usize>,
    fence_count: usize,
}

impl Assembler {
    fn tag(&mut self, tag: TagKind, path: Option<String>, body: &str) {
        match tag {
            TagKind::File => match path {
                Some(path) => self.file(path, trim_body(body)),
                None => self.parsed.warnings.push(ParseWarning::MalformedTag {
                    raw: "<file>".to_string(),
                }),
            },
            TagKind::Package => {
                let names: Vec<String> = body
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|n| !n.is_empty())
                    .map(str::to_lowercase)
                    .collect();
                if names.is_empty() {
                    self.parsed.warnings.push(ParseWarning::EmptyPackage);
                }
                self.parsed.packages.extend(names);
            }
            TagKind::Command => {
                let command = body.trim();
                if command.is_empty() {
                    self.parsed.warnings.push(ParseWarning::EmptyCommand);
                } else {
                    self.parsed.commands.push(command.to_string());
                }
            }
        }
    }

    fn fence(
        &mut self,
        language: Option<String>,
        info_path: Option<String>,
        heading_path: Option<String>,
        body: &str,
    ) {
        let index = self.fence_count;
        self.fence_count += 1;

        let (directive_path, body) = split_path_directive(body);
        match info_path.or(directive_path).or(heading_path) {
            Some(path) => self.file(path, trim_body(body)),
            None => {
                log::debug!(
                    "Fenced block #{} ({}) has no destination path",
                    index,
                    language.as_deref().unwrap_or("plain")
                );
                self.parsed
                    .warnings
                    .push(ParseWarning::UnattributedCodeBlock {
                        language: language.clone(),
                        index,
                    });
                self.parsed.unattributed_blocks.push(CodeBlock {
                    language,
                    content: trim_body(body),
                });
            }
        }
    }

    fn file(&mut self, path: String, content: String) {
        if content.is_empty() {
            self.parsed
                .warnings
                .push(ParseWarning::EmptyFile { path: path.clone() });
        }

        let key = dedup_key(&path);
        match self.file_index.get(&key) {
            Some(&i) => {
                // Later occurrence replaces the earlier one in place
                self.parsed.files[i] = FileOp { path, content };
            }
            None => {
                self.file_index.insert(key, self.parsed.files.len());
                self.parsed.files.push(FileOp { path, content });
            }
        }
    }
}

/// Key used to detect the same file named two ways (`./src/a.js`, `src/a.js`)
fn dedup_key(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    let mut rest = path.as_str();
    loop {
        if let Some(r) = rest.strip_prefix("./") {
            rest = r;
        } else if let Some(r) = rest.strip_prefix('/') {
            rest = r;
        } else {
            break;
        }
    }
    rest.to_string()
}

/// Remove a leading path directive line from a fenced block body
fn split_path_directive(body: &str) -> (Option<String>, &str) {
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if line.trim().is_empty() {
            offset += line.len();
            continue;
        }
        if let Some(caps) = path_directive_regex().captures(line.trim_end()) {
            let path = caps[1].to_string();
            return (Some(path), &body[offset + line.len()..]);
        }
        break;
    }
    (None, body)
}

/// Strip blank lines around a body and trailing whitespace, keeping the
/// indentation of the first content line
fn trim_body(body: &str) -> String {
    let end = body.trim_end().len();
    let body = &body[..end];
    let mut start = 0;
    for line in body.split_inclusive('\n') {
        if line.trim().is_empty() && line.ends_with('\n') {
            start += line.len();
        } else {
            break;
        }
    }
    body[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::scanner::scan;

    fn assemble_text(text: &str) -> ParsedResponse {
        assemble(scan(text).segments)
    }

    #[test]
    fn test_last_write_wins_keeps_first_position() {
        let parsed = assemble_text(
            r#"<file path="src/a.js">one</file><file path="src/b.js">b</file><file path="./src/a.js">two</file>"#,
        );
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.files[0].path, "./src/a.js");
        assert_eq!(parsed.files[0].content, "two");
        assert_eq!(parsed.files[1].path, "src/b.js");
    }

    #[test]
    fn test_tag_and_fence_same_path_later_wins() {
        let parsed = assemble_text(
            "<file path=\"src/App.jsx\">old</file>\n```jsx:src/App.jsx\nnew\n```\n",
        );
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].content, "new");
    }

    #[test]
    fn test_empty_file_kept_with_warning() {
        let parsed = assemble_text("<file path=\"src/empty.js\">  \n </file>");
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].content, "");
        assert_eq!(
            parsed.warnings,
            vec![ParseWarning::EmptyFile {
                path: "src/empty.js".to_string()
            }]
        );
    }

    #[test]
    fn test_packages_lowercased_and_deduplicated() {
        let parsed = assemble_text(
            "<package>React</package><package>react</package><package>@Tanstack/Query, zod</package>",
        );
        let packages: Vec<_> = parsed.packages.iter().cloned().collect();
        assert_eq!(packages, vec!["@tanstack/query", "react", "zod"]);
    }

    #[test]
    fn test_empty_package_and_command_warn() {
        let parsed = assemble_text("<package> </package><command></command>");
        assert!(parsed.packages.is_empty());
        assert!(parsed.commands.is_empty());
        assert!(parsed.warnings.contains(&ParseWarning::EmptyPackage));
        assert!(parsed.warnings.contains(&ParseWarning::EmptyCommand));
    }

    #[test]
    fn test_commands_verbatim_in_order() {
        let parsed = assemble_text(
            "<command>npm run build && echo \"done\" | tee log</command><command>npm test</command>",
        );
        assert_eq!(
            parsed.commands,
            vec!["npm run build && echo \"done\" | tee log", "npm test"]
        );
    }

    #[test]
    fn test_fence_path_from_comment_directive() {
        let parsed = assemble_text("```jsx\n// path: src/components/Nav.jsx\nexport const Nav = 1;\n```");
        assert_eq!(parsed.files[0].path, "src/components/Nav.jsx");
        assert_eq!(parsed.files[0].content, "export const Nav = 1;");
    }

    #[test]
    fn test_fence_path_from_html_comment() {
        let parsed = assemble_text("```html\n<!-- file: index.html -->\n<div></div>\n```");
        assert_eq!(parsed.files[0].path, "index.html");
        assert_eq!(parsed.files[0].content, "<div></div>");
    }

    #[test]
    fn test_unattributed_block_is_kept() {
        let parsed = assemble_text("Run this:\n```bash\nnpm install\n```\n");
        assert!(parsed.files.is_empty());
        assert_eq!(parsed.unattributed_blocks.len(), 1);
        assert_eq!(parsed.unattributed_blocks[0].content, "npm install");
        assert_eq!(
            parsed.warnings,
            vec![ParseWarning::UnattributedCodeBlock {
                language: Some("bash".to_string()),
                index: 0
            }]
        );
    }

    #[test]
    fn test_malformed_file_tag_warns() {
        let parsed = assemble_text("<file>oops</file>");
        assert!(parsed.files.is_empty());
        assert_eq!(
            parsed.warnings,
            vec![ParseWarning::MalformedTag {
                raw: "<file>".to_string()
            }]
        );
    }

    #[test]
    fn test_trim_body_keeps_indentation() {
        assert_eq!(trim_body("\n\n    indented\n  next\n\n"), "    indented\n  next");
        assert_eq!(trim_body("   "), "");
    }

    #[test]
    fn test_interleaved_order_preserved() {
        let parsed = assemble_text(
            "<command>first</command>\n```js:src/x.js\nx\n```\n<file path=\"src/y.js\">y</file><command>second</command>",
        );
        assert_eq!(parsed.commands, vec!["first", "second"]);
        let paths: Vec<_> = parsed.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/x.js", "src/y.js"]);
    }
}
