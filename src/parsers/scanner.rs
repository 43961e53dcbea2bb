// Token scanner for AI responses
//
// Lexes raw response text into segments. Two dialects share the stream:
// XML-like action tags (<file path="...">, <package>, <command>) and
// Markdown code fences. Bodies of tags and fences are raw and never
// re-scanned, so JSX inside a <file> body is not mistaken for a tag.

use crate::models::ParseWarning;

/// Action tags the scanner knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    File,
    Package,
    Command,
}

impl TagKind {
    const ALL: [TagKind; 3] = [TagKind::File, TagKind::Package, TagKind::Command];

    pub fn name(&self) -> &'static str {
        match self {
            TagKind::File => "file",
            TagKind::Package => "package",
            TagKind::Command => "command",
        }
    }
}

/// A `name="value"` pair from an opening tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// A lexical unit of an AI response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    TagOpen {
        tag: TagKind,
        attributes: Vec<Attribute>,
    },
    TagClose {
        tag: TagKind,
    },
    FenceOpen {
        language: Option<String>,
        /// Path given in the info string (```jsx:src/App.jsx)
        info_path: Option<String>,
        /// Path taken from a Markdown heading right before the fence
        heading_path: Option<String>,
    },
    FenceClose,
    /// Raw body of a tag or fence
    Content(String),
    /// Prose outside of any tag or fence
    Text(String),
    /// Something tag-shaped that could not be interpreted
    Unrecognized {
        raw: String,
    },
}

impl Segment {
    /// Look up an attribute on an opening tag
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match self {
            Segment::TagOpen { attributes, .. } => attributes
                .iter()
                .find(|a| a.name.eq_ignore_ascii_case(name))
                .map(|a| a.value.as_str()),
            _ => None,
        }
    }
}

/// Result of a one-shot scan
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub segments: Vec<Segment>,
    pub notes: Vec<ParseWarning>,
}

/// Scan a complete response. The opening of an unterminated tag or fence
/// is dropped and reported in `notes`; scanning resumes right after it.
pub fn scan(text: &str) -> ScanOutput {
    let mut scanner = StreamingScanner::new();
    let mut segments = scanner.push(text);
    let (rest, notes) = scanner.finish();
    segments.extend(rest);
    ScanOutput { segments, notes }
}

/// Incremental scanner for responses that arrive in chunks.
///
/// `push` returns only segments whose construct is complete; anything that
/// could still grow (an open tag, an unclosed fence, a trailing `<fi`) stays
/// pending until more text arrives or `finish` is called.
#[derive(Debug, Default)]
pub struct StreamingScanner {
    buffer: String,
    /// Whether `buffer` begins at the start of a line
    at_line_start: bool,
    /// Last complete non-blank prose line since the previous construct
    last_prose_line: Option<String>,
    /// Prose emitted since the last newline
    prose_tail: String,
    notes: Vec<ParseWarning>,
}

enum Construct {
    Tag(TagKind),
    Fence,
}

enum TagScan {
    Complete {
        segments: Vec<Segment>,
        consumed: usize,
    },
    /// The opening tag ended but the input ran out before it was closed
    Unclosed {
        open_end: usize,
    },
    Incomplete,
    Malformed {
        consumed: usize,
    },
}

enum FenceScan {
    Complete {
        info: String,
        body: String,
        consumed: usize,
    },
    /// The opening line ended but no closing fence followed
    Unclosed {
        open_end: usize,
    },
    Incomplete,
    NotAFence,
}

impl StreamingScanner {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            at_line_start: true,
            last_prose_line: None,
            prose_tail: String::new(),
            notes: Vec::new(),
        }
    }

    /// Feed a chunk of text and collect the segments it completed
    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        self.buffer.push_str(chunk);
        // Constructs can only complete on a newline or a '>'
        if !chunk.contains(['\n', '>']) {
            return Vec::new();
        }
        self.drain(false)
    }

    /// Flush everything, dropping the openings of unterminated constructs
    pub fn finish(mut self) -> (Vec<Segment>, Vec<ParseWarning>) {
        let segments = self.drain(true);
        (segments, self.notes)
    }

    /// Text held back waiting for more input
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn drain(&mut self, is_final: bool) -> Vec<Segment> {
        let mut out = Vec::new();
        let mut pos = 0;
        let mut line_start = self.at_line_start;

        while pos < self.buffer.len() {
            let rest = &self.buffer[pos..];
            let Some((offset, construct)) = find_construct_start(rest, line_start) else {
                let safe = if is_final {
                    rest.len()
                } else {
                    safe_prefix_len(rest, line_start)
                };
                let text = rest[..safe].to_string();
                self.emit_text(&mut out, &text);
                pos += safe;
                break;
            };

            if offset > 0 {
                let text = rest[..offset].to_string();
                self.emit_text(&mut out, &text);
            }
            let start = pos + offset;
            let input = &self.buffer[start..];

            match construct {
                Construct::Tag(kind) => match scan_tag(input, kind) {
                    TagScan::Complete { segments, consumed } => {
                        out.extend(segments);
                        self.clear_prose();
                        pos = start + consumed;
                    }
                    TagScan::Malformed { consumed } => {
                        let raw = input[..consumed].to_string();
                        log::debug!("Unrecognized tag in response: {}", raw);
                        out.push(Segment::Unrecognized { raw });
                        pos = start + consumed;
                    }
                    TagScan::Unclosed { open_end } if is_final => {
                        self.drop_unterminated(kind.name(), start..start + open_end);
                        self.clear_prose();
                        pos = start + open_end;
                    }
                    TagScan::Unclosed { .. } | TagScan::Incomplete => {
                        pos = start;
                        if is_final {
                            // The opening tag itself runs to the end of input
                            self.drop_unterminated(kind.name(), start..self.buffer.len());
                            pos = self.buffer.len();
                        }
                        break;
                    }
                },
                Construct::Fence => match scan_fence(input, is_final) {
                    FenceScan::Complete {
                        info,
                        body,
                        consumed,
                    } => {
                        let (language, info_path) = parse_info_string(&info);
                        let heading_path = self
                            .last_prose_line
                            .take()
                            .and_then(|line| heading_path(&line));
                        self.clear_prose();
                        out.push(Segment::FenceOpen {
                            language,
                            info_path,
                            heading_path,
                        });
                        out.push(Segment::Content(body));
                        out.push(Segment::FenceClose);
                        pos = start + consumed;
                    }
                    FenceScan::NotAFence => {
                        let ticks = input.bytes().take_while(|b| *b == b'`').count();
                        let text = input[..ticks].to_string();
                        self.emit_text(&mut out, &text);
                        pos = start + ticks;
                    }
                    FenceScan::Unclosed { open_end } if is_final => {
                        self.drop_unterminated("fence", start..start + open_end);
                        self.clear_prose();
                        pos = start + open_end;
                    }
                    FenceScan::Unclosed { .. } | FenceScan::Incomplete => {
                        pos = start;
                        if is_final {
                            self.drop_unterminated("fence", start..self.buffer.len());
                            pos = self.buffer.len();
                        }
                        break;
                    }
                },
            }

            line_start = self.buffer[..pos].ends_with('\n');
        }

        if pos > 0 {
            self.at_line_start = self.buffer[..pos].ends_with('\n');
            self.buffer.drain(..pos);
        }
        out
    }

    /// Record an unterminated construct whose opening spans `opening`
    fn drop_unterminated(&mut self, tag: &str, opening: std::ops::Range<usize>) {
        log::debug!(
            "Dropping unterminated <{}> opening: {}",
            tag,
            crate::utils::truncate_string(self.buffer[opening].trim_end(), 60)
        );
        self.notes.push(ParseWarning::UnterminatedTag {
            tag: tag.to_string(),
        });
    }

    fn clear_prose(&mut self) {
        self.last_prose_line = None;
        self.prose_tail.clear();
    }

    fn emit_text(&mut self, out: &mut Vec<Segment>, text: &str) {
        if text.is_empty() {
            return;
        }
        self.prose_tail.push_str(text);
        if let Some(nl) = self.prose_tail.rfind('\n') {
            if let Some(line) = self.prose_tail[..nl]
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
            {
                self.last_prose_line = Some(line.trim().to_string());
            }
            self.prose_tail.drain(..=nl);
        }
        if let Some(Segment::Text(prev)) = out.last_mut() {
            prev.push_str(text);
        } else {
            out.push(Segment::Text(text.to_string()));
        }
    }
}

/// Find the first tag or fence that starts in `rest`
fn find_construct_start(rest: &str, at_line_start: bool) -> Option<(usize, Construct)> {
    let bytes = rest.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'<' => {
                if let Some(kind) = tag_at(&rest[i..]) {
                    return Some((i, Construct::Tag(kind)));
                }
            }
            b'`' => {
                if rest[i..].starts_with("```") && fence_indent_ok(rest, i, at_line_start) {
                    return Some((i, Construct::Fence));
                }
            }
            _ => {}
        }
    }
    None
}

/// Match `<file`, `<package` or `<command` followed by a tag boundary
fn tag_at(s: &str) -> Option<TagKind> {
    let after_lt = &s[1..];
    TagKind::ALL.into_iter().find(|kind| {
        let name = kind.name();
        if !after_lt.starts_with(name) {
            return false;
        }
        match after_lt[name.len()..].chars().next() {
            None => true,
            Some(c) => c.is_whitespace() || c == '>' || c == '/',
        }
    })
}

/// A fence may be indented by at most three spaces
fn fence_indent_ok(rest: &str, i: usize, at_line_start: bool) -> bool {
    let line_begin = match rest[..i].rfind('\n') {
        Some(nl) => nl + 1,
        None if at_line_start => 0,
        None => return false,
    };
    let indent = &rest[line_begin..i];
    indent.len() <= 3 && indent.bytes().all(|b| b == b' ')
}

/// Length of the prefix of `rest` that can be emitted as prose now
fn safe_prefix_len(rest: &str, at_line_start: bool) -> usize {
    let mut safe = rest.len();

    // A trailing '<' may still grow into a tag name
    if let Some(i) = rest.rfind('<') {
        let tail = &rest[i + 1..];
        if TagKind::ALL.iter().any(|k| k.name().starts_with(tail)) {
            safe = safe.min(i);
        }
    }

    // A trailing partial line may still become a fence
    let line_begin = rest.rfind('\n').map(|i| i + 1).unwrap_or(0);
    if line_begin > 0 || at_line_start {
        let line = &rest[line_begin..];
        let trimmed = line.trim_start_matches(' ');
        if line.len() - trimmed.len() <= 3 && trimmed.len() < 3 && trimmed.bytes().all(|b| b == b'`')
        {
            safe = safe.min(line_begin);
        }
    }

    safe
}

/// Scan an action tag starting at `input[0] == '<'`
fn scan_tag(input: &str, kind: TagKind) -> TagScan {
    let bytes = input.as_bytes();
    let mut i = 1 + kind.name().len();
    let mut attributes = Vec::new();
    let open_end;
    let self_closing;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            return TagScan::Incomplete;
        }
        match bytes[i] {
            b'>' => {
                open_end = i + 1;
                self_closing = false;
                break;
            }
            b'/' => {
                if i + 1 >= bytes.len() {
                    return TagScan::Incomplete;
                }
                if bytes[i + 1] == b'>' {
                    open_end = i + 2;
                    self_closing = true;
                    break;
                }
                return TagScan::Malformed { consumed: i + 1 };
            }
            b if is_attr_name_byte(b) => {
                let name_start = i;
                while i < bytes.len() && is_attr_name_byte(bytes[i]) {
                    i += 1;
                }
                let name = input[name_start..i].to_string();
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                if i >= bytes.len() {
                    return TagScan::Incomplete;
                }
                if bytes[i] != b'=' {
                    attributes.push(Attribute {
                        name,
                        value: String::new(),
                    });
                    continue;
                }
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                if i >= bytes.len() {
                    return TagScan::Incomplete;
                }
                let value = match bytes[i] {
                    quote @ (b'"' | b'\'') => {
                        let Some(len) = input[i + 1..].find(quote as char) else {
                            return TagScan::Incomplete;
                        };
                        let value = &input[i + 1..i + 1 + len];
                        i += len + 2;
                        value
                    }
                    _ => {
                        let value_start = i;
                        while i < bytes.len()
                            && !bytes[i].is_ascii_whitespace()
                            && bytes[i] != b'>'
                        {
                            i += 1;
                        }
                        if i >= bytes.len() {
                            return TagScan::Incomplete;
                        }
                        let value = input[value_start..i].trim_end_matches('/');
                        if input[value_start..i].ends_with('/') {
                            i -= 1;
                        }
                        value
                    }
                };
                attributes.push(Attribute {
                    name,
                    value: value.to_string(),
                });
            }
            _ => return TagScan::Malformed { consumed: i },
        }
    }

    let open = Segment::TagOpen {
        tag: kind,
        attributes,
    };

    if kind == TagKind::File && open.attribute("path").map_or(true, |p| p.trim().is_empty()) {
        return TagScan::Malformed { consumed: open_end };
    }

    if self_closing {
        return TagScan::Complete {
            segments: vec![open, Segment::TagClose { tag: kind }],
            consumed: open_end,
        };
    }

    let close_pattern = format!("</{}", kind.name());
    let mut search_from = open_end;
    while let Some(found) = input[search_from..].find(&close_pattern) {
        let close_start = search_from + found;
        let mut j = close_start + close_pattern.len();
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if j >= bytes.len() {
            return TagScan::Unclosed { open_end };
        }
        if bytes[j] == b'>' {
            return TagScan::Complete {
                segments: vec![
                    open,
                    Segment::Content(input[open_end..close_start].to_string()),
                    Segment::TagClose { tag: kind },
                ],
                consumed: j + 1,
            };
        }
        search_from = close_start + 1;
    }

    TagScan::Unclosed { open_end }
}

fn is_attr_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b':')
}

/// Scan a fenced block starting at the opening backticks
fn scan_fence(input: &str, is_final: bool) -> FenceScan {
    let ticks = input.bytes().take_while(|b| *b == b'`').count();
    let open_nl = input.find('\n');
    let info = input[ticks..open_nl.unwrap_or(input.len())]
        .trim_end_matches('\r')
        .trim();
    // ```inline``` on one line is inline code, not a fence
    if info.contains('`') {
        return FenceScan::NotAFence;
    }
    let Some(open_nl) = open_nl else {
        return FenceScan::Incomplete;
    };

    let body_start = open_nl + 1;
    let mut line_start = body_start;
    loop {
        if line_start >= input.len() {
            return FenceScan::Unclosed {
                open_end: body_start,
            };
        }
        let line_end = input[line_start..].find('\n').map(|i| line_start + i);
        let line = match line_end {
            Some(end) => &input[line_start..end],
            None => &input[line_start..],
        };
        let line = line.trim_end_matches('\r');
        let stripped = line.trim_start_matches(' ');
        let indent = line.len() - stripped.len();
        let closing_ticks = stripped.bytes().take_while(|b| *b == b'`').count();

        if indent <= 3 && closing_ticks >= ticks && stripped[closing_ticks..].trim().is_empty() {
            let consumed = match line_end {
                Some(end) => end + 1,
                None if is_final => input.len(),
                None => return FenceScan::Incomplete,
            };
            let body_end = if line_start > body_start {
                line_start - 1
            } else {
                body_start
            };
            return FenceScan::Complete {
                info: info.to_string(),
                body: input[body_start..body_end].trim_end_matches('\r').to_string(),
                consumed,
            };
        }

        match line_end {
            Some(end) => line_start = end + 1,
            None => {
                return FenceScan::Unclosed {
                    open_end: body_start,
                }
            }
        }
    }
}

/// Split a fence info string into language and optional path.
///
/// Accepted forms: `jsx`, `jsx:src/App.jsx`, `jsx path=src/App.jsx`,
/// `src/App.jsx`.
fn parse_info_string(info: &str) -> (Option<String>, Option<String>) {
    if info.is_empty() {
        return (None, None);
    }

    if let Some((lang, path)) = info.split_once(':') {
        let lang = lang.trim();
        let path = path.trim();
        if !lang.is_empty() && !lang.contains(char::is_whitespace) && !path.is_empty() {
            return (Some(lang.to_lowercase()), Some(path.to_string()));
        }
    }

    let mut tokens = info.split_whitespace();
    let first = tokens.next().unwrap_or_default();
    let attr_path = tokens.find_map(|t| {
        let (key, value) = t.split_once('=')?;
        matches!(key, "path" | "file" | "filename")
            .then(|| value.trim_matches(|c| c == '"' || c == '\'').to_string())
    });

    if attr_path.is_none() && looks_like_path(first) {
        let language = first.rsplit_once('.').map(|(_, ext)| ext.to_lowercase());
        return (language, Some(first.to_string()));
    }

    (Some(first.to_lowercase()), attr_path)
}

/// Extract a path from a Markdown heading such as `### src/App.jsx`
fn heading_path(line: &str) -> Option<String> {
    let line = line.trim();
    if !line.starts_with('#') {
        return None;
    }
    let text = line.trim_start_matches('#').trim();
    let text = text.trim_matches(|c| c == '`' || c == '*');
    let text = text
        .strip_prefix("File:")
        .or_else(|| text.strip_prefix("file:"))
        .map(str::trim)
        .unwrap_or(text)
        .trim_matches(|c| c == '`' || c == '*');

    looks_like_path(text).then(|| text.to_string())
}

fn looks_like_path(candidate: &str) -> bool {
    if candidate.is_empty() || candidate.contains(char::is_whitespace) {
        return false;
    }
    if candidate.contains('/') {
        return true;
    }
    matches!(candidate.rsplit_once('.'), Some((stem, ext)) if !stem.is_empty() && !ext.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(segments: &[Segment]) -> Vec<&Segment> {
        segments
            .iter()
            .filter(|s| !matches!(s, Segment::Text(_)))
            .collect()
    }

    #[test]
    fn test_scan_file_tag() {
        let out = scan(r#"Here you go: <file path="src/App.jsx">const a = <div>hi</div>;</file> done"#);
        let segs = texts(&out.segments);
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0].attribute("path"), Some("src/App.jsx"));
        assert_eq!(
            segs[1],
            &Segment::Content("const a = <div>hi</div>;".to_string())
        );
        assert_eq!(segs[2], &Segment::TagClose { tag: TagKind::File });
        assert!(out.notes.is_empty());
    }

    #[test]
    fn test_scan_single_quoted_attribute() {
        let out = scan("<file path='src/a.js'>x</file>");
        assert_eq!(out.segments[0].attribute("path"), Some("src/a.js"));
    }

    #[test]
    fn test_scan_package_and_command() {
        let out = scan("<package>lodash</package>\n<command>npm run build && echo ok</command>");
        let segs = texts(&out.segments);
        assert_eq!(segs.len(), 6);
        assert_eq!(segs[1], &Segment::Content("lodash".to_string()));
        assert_eq!(
            segs[4],
            &Segment::Content("npm run build && echo ok".to_string())
        );
    }

    #[test]
    fn test_scan_self_closing_file() {
        let out = scan(r#"<file path="src/empty.js"/>"#);
        assert_eq!(out.segments.len(), 2);
        assert_eq!(out.segments[1], Segment::TagClose { tag: TagKind::File });
    }

    #[test]
    fn test_file_without_path_is_unrecognized() {
        let out = scan("Use <file> tags to write files.");
        assert!(out
            .segments
            .iter()
            .any(|s| matches!(s, Segment::Unrecognized { raw } if raw == "<file>")));
        assert!(out.notes.is_empty());
    }

    #[test]
    fn test_similar_tag_names_are_text() {
        let out = scan("<filename>x</filename> <packages>");
        assert_eq!(out.segments.len(), 1);
        assert!(matches!(out.segments[0], Segment::Text(_)));
    }

    #[test]
    fn test_unterminated_tag_dropped_with_note() {
        let out = scan(r#"<package>react</package><file path="src/App.jsx">partial"#);
        let segs = texts(&out.segments);
        assert_eq!(segs.len(), 3);
        assert_eq!(
            out.notes,
            vec![ParseWarning::UnterminatedTag {
                tag: "file".to_string()
            }]
        );
    }

    #[test]
    fn test_unclosed_file_keeps_later_tags() {
        let out = scan(
            "<file path=\"src/a.js\">const a = 1;\n<package>react-router-dom</package>\n<command>npm run build</command>\n",
        );
        let segs = texts(&out.segments);
        assert_eq!(
            segs,
            vec![
                &Segment::TagOpen {
                    tag: TagKind::Package,
                    attributes: vec![],
                },
                &Segment::Content("react-router-dom".to_string()),
                &Segment::TagClose {
                    tag: TagKind::Package
                },
                &Segment::TagOpen {
                    tag: TagKind::Command,
                    attributes: vec![],
                },
                &Segment::Content("npm run build".to_string()),
                &Segment::TagClose {
                    tag: TagKind::Command
                },
            ]
        );
        assert_eq!(
            out.notes,
            vec![ParseWarning::UnterminatedTag {
                tag: "file".to_string()
            }]
        );
    }

    #[test]
    fn test_unclosed_fence_keeps_later_fence() {
        // Three ticks cannot close a four-tick fence
        let out = scan("````js\nlet a;\n```css:src/index.css\nbody {}\n```\n");
        let segs = texts(&out.segments);
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[1], &Segment::Content("body {}".to_string()));
        assert_eq!(out.notes.len(), 1);

        let out = scan("<file path=\"src/a.js\">x\n```css:src/index.css\nbody {}\n```\n");
        let segs = texts(&out.segments);
        assert_eq!(
            segs[0],
            &Segment::FenceOpen {
                language: Some("css".to_string()),
                info_path: Some("src/index.css".to_string()),
                heading_path: None,
            }
        );
        assert_eq!(segs[1], &Segment::Content("body {}".to_string()));
    }

    #[test]
    fn test_unterminated_open_tag_dropped() {
        let out = scan(r#"text <file path="src/Ap"#);
        assert_eq!(out.segments, vec![Segment::Text("text ".to_string())]);
        assert_eq!(out.notes.len(), 1);
    }

    #[test]
    fn test_scan_fence_with_info_path() {
        let out = scan("Intro\n```jsx:src/App.jsx\nexport default 1;\n```\n");
        let segs = texts(&out.segments);
        assert_eq!(
            segs[0],
            &Segment::FenceOpen {
                language: Some("jsx".to_string()),
                info_path: Some("src/App.jsx".to_string()),
                heading_path: None,
            }
        );
        assert_eq!(segs[1], &Segment::Content("export default 1;".to_string()));
        assert_eq!(segs[2], &Segment::FenceClose);
    }

    #[test]
    fn test_scan_fence_with_heading() {
        let out = scan("### `src/components/Button.jsx`\n\n```jsx\nx\n```");
        let segs = texts(&out.segments);
        assert_eq!(
            segs[0],
            &Segment::FenceOpen {
                language: Some("jsx".to_string()),
                info_path: None,
                heading_path: Some("src/components/Button.jsx".to_string()),
            }
        );
    }

    #[test]
    fn test_heading_not_path_ignored() {
        let out = scan("## Installation steps\n```bash\nnpm i\n```");
        let segs = texts(&out.segments);
        assert!(matches!(
            segs[0],
            Segment::FenceOpen {
                heading_path: None,
                ..
            }
        ));
    }

    #[test]
    fn test_fence_body_is_raw() {
        let out = scan("```html\n<file path=\"x\">not a tag</file>\n```");
        let segs = texts(&out.segments);
        assert_eq!(segs.len(), 3);
        assert_eq!(
            segs[1],
            &Segment::Content("<file path=\"x\">not a tag</file>".to_string())
        );
    }

    #[test]
    fn test_longer_closing_fence_and_inner_ticks() {
        let out = scan("````md\n```js\ninner\n```\n````\n");
        let segs = texts(&out.segments);
        assert_eq!(segs[1], &Segment::Content("```js\ninner\n```".to_string()));
    }

    #[test]
    fn test_inline_triple_backticks_not_fence() {
        let out = scan("```inline``` text");
        assert_eq!(out.segments.len(), 1);
        assert!(out.notes.is_empty());
    }

    #[test]
    fn test_inline_triple_backticks_at_end_kept_as_text() {
        let out = scan("```npm run dev```");
        assert_eq!(
            out.segments,
            vec![Segment::Text("```npm run dev```".to_string())]
        );
        assert!(out.notes.is_empty());
    }

    #[test]
    fn test_unterminated_fence_dropped() {
        let out = scan("text\n```js\nconst a = 1;\n");
        assert_eq!(
            out.segments,
            vec![Segment::Text("text\nconst a = 1;\n".to_string())]
        );
        assert_eq!(
            out.notes,
            vec![ParseWarning::UnterminatedTag {
                tag: "fence".to_string()
            }]
        );
    }

    #[test]
    fn test_streaming_holds_incomplete_tag() {
        let mut scanner = StreamingScanner::new();
        let first = scanner.push("Hello <file path=\"src/a.js\">line1\n");
        assert_eq!(first, vec![Segment::Text("Hello ".to_string())]);
        assert!(scanner.pending().starts_with("<file"));

        let second = scanner.push("line2</file>\n");
        assert_eq!(second.len(), 4);
        assert_eq!(second[1], Segment::Content("line1\nline2".to_string()));

        let (rest, notes) = scanner.finish();
        assert!(rest.is_empty());
        assert!(notes.is_empty());
    }

    #[test]
    fn test_streaming_split_inside_tag_name() {
        let mut scanner = StreamingScanner::new();
        let mut all = scanner.push("ok\n<pack");
        assert_eq!(all, vec![Segment::Text("ok\n".to_string())]);
        all.extend(scanner.push("age>zod</package>\n"));
        let (rest, _) = scanner.finish();
        all.extend(rest);
        assert!(all.contains(&Segment::Content("zod".to_string())));
    }

    #[test]
    fn test_streaming_split_fence_marker() {
        let mut scanner = StreamingScanner::new();
        let mut all = scanner.push("intro\n`");
        all.extend(scanner.push("``js:src/x.js\nlet x;\n``"));
        all.extend(scanner.push("`\n"));
        let (rest, notes) = scanner.finish();
        all.extend(rest);
        assert!(notes.is_empty());
        assert!(all.contains(&Segment::Content("let x;".to_string())));
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let input = "# Plan\n<file path=\"src/App.jsx\">import a from 'a';\n</file>\n### src/b.js\n```js\nb\n```\n<command>npm test</command>";
        let one_shot = scan(input).segments;

        let mut scanner = StreamingScanner::new();
        let mut streamed = Vec::new();
        for chunk in input.as_bytes().chunks(5) {
            streamed.extend(scanner.push(std::str::from_utf8(chunk).unwrap()));
        }
        let (rest, _) = scanner.finish();
        streamed.extend(rest);

        let structural = |segs: Vec<Segment>| -> Vec<Segment> {
            segs.into_iter()
                .filter(|s| !matches!(s, Segment::Text(_)))
                .collect()
        };
        assert_eq!(structural(one_shot), structural(streamed));
    }

    #[test]
    fn test_parse_info_string_forms() {
        assert_eq!(parse_info_string(""), (None, None));
        assert_eq!(parse_info_string("tsx"), (Some("tsx".to_string()), None));
        assert_eq!(
            parse_info_string("js path=src/a.js"),
            (Some("js".to_string()), Some("src/a.js".to_string()))
        );
        assert_eq!(
            parse_info_string("src/App.jsx"),
            (Some("jsx".to_string()), Some("src/App.jsx".to_string()))
        );
    }
}
