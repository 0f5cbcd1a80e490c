//! Ticket and run-log parsing.
//!
//! Tickets: a leading `---` line, YAML front matter, a closing `---` line,
//! then a Markdown body. Only heading presence is extracted from the body;
//! there is no Markdown AST.
//!
//! Logs: every non-blank line is decoded on its own. A bad line yields a
//! line-scoped [`ParseFailure`] and the remaining lines are still decoded.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use serde_yaml::Mapping;

use crate::timestamp;

const DELIMITER: &str = "---";

/// Structural parse failure with a best-effort file location (1-based).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct ParseFailure {
    pub reason: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl ParseFailure {
    fn at(reason: impl Into<String>, line: Option<usize>, column: Option<usize>) -> Self {
        Self {
            reason: reason.into(),
            line,
            column,
        }
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// A Markdown heading found in the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: usize,
    pub text: String,
    /// Line in the whole file (1-based).
    pub line: usize,
}

/// Raw ticket: front matter as a generic mapping plus body headings.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTicket {
    pub path: String,
    pub front_matter: Mapping,
    pub body: String,
    pub headings: Vec<Heading>,
}

impl ParsedTicket {
    /// Whether `required` (e.g. `"## Verification"`) is present as a
    /// heading of the same level, ignoring case and inner whitespace.
    pub fn has_section(&self, required: &str) -> bool {
        find_section(&self.headings, required).is_some()
    }

    /// Required sections absent from the body, in canonical order.
    pub fn missing_sections(&self) -> Vec<&'static str> {
        crate::model::REQUIRED_SECTIONS
            .iter()
            .copied()
            .filter(|s| !self.has_section(s))
            .collect()
    }

    /// Front-matter value by string key.
    pub fn field(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.front_matter.get(key)
    }
}

/// Parse one ticket file.
pub fn parse_ticket(path: &str, bytes: &[u8]) -> Result<ParsedTicket, ParseFailure> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        ParseFailure::at(
            format!("ticket is not valid UTF-8 (byte offset {})", e.valid_up_to()),
            None,
            None,
        )
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let (front_text, body, body_first_line) = split_front_matter(text)?;
    let front_matter = decode_front_matter(front_text)?;
    let headings = scan_headings(body, body_first_line);

    tracing::debug!(path, headings = headings.len(), "parsed ticket");

    Ok(ParsedTicket {
        path: path.to_string(),
        front_matter,
        body: body.to_string(),
        headings,
    })
}

/// Split into (front matter text, body, first body line number).
fn split_front_matter(text: &str) -> Result<(&str, &str, usize), ParseFailure> {
    let mut offset = 0usize;
    let mut front_start = None;
    for (idx, line) in text.split_inclusive('\n').enumerate() {
        let content = line.trim_end_matches(['\n', '\r']);
        let next = offset + line.len();
        match front_start {
            None => {
                if content.trim_end() != DELIMITER {
                    return Err(ParseFailure::at(
                        "missing front matter: file must start with a '---' line",
                        Some(1),
                        Some(1),
                    ));
                }
                front_start = Some(next);
            }
            Some(start) => {
                if content.trim_end() == DELIMITER {
                    return Ok((&text[start..offset], &text[next..], idx + 2));
                }
            }
        }
        offset = next;
    }
    match front_start {
        None => Err(ParseFailure::at("empty ticket file", Some(1), Some(1))),
        Some(_) => Err(ParseFailure::at(
            "unterminated front matter: no closing '---' line",
            Some(1),
            Some(1),
        )),
    }
}

fn decode_front_matter(front_text: &str) -> Result<Mapping, ParseFailure> {
    if front_text.trim().is_empty() {
        return Ok(Mapping::new());
    }
    let value: serde_yaml::Value = serde_yaml::from_str(front_text).map_err(|e| {
        let location = e.location();
        // +1 for the opening delimiter line.
        ParseFailure::at(
            format!("invalid YAML front matter: {e}"),
            location.as_ref().map(|l| l.line() + 1),
            location.as_ref().map(serde_yaml::Location::column),
        )
    })?;
    match value {
        serde_yaml::Value::Mapping(mapping) => Ok(mapping),
        serde_yaml::Value::Null => Ok(Mapping::new()),
        _ => Err(ParseFailure::at(
            "front matter must be a key/value mapping",
            Some(2),
            Some(1),
        )),
    }
}

fn scan_headings(body: &str, first_line: usize) -> Vec<Heading> {
    let mut headings = Vec::new();
    let mut fence: Option<&str> = None;
    for (idx, line) in body.lines().enumerate() {
        let trimmed = line.trim_start();
        if let Some(marker) = fence {
            if trimmed.starts_with(marker) {
                fence = None;
            }
            continue;
        }
        if trimmed.starts_with("```") {
            fence = Some("```");
            continue;
        }
        if trimmed.starts_with("~~~") {
            fence = Some("~~~");
            continue;
        }
        if let Some((level, text)) = split_heading(trimmed) {
            headings.push(Heading {
                level,
                text: text.to_string(),
                line: first_line + idx,
            });
        }
    }
    headings
}

/// Headings of a bare body; line numbers are relative to the body.
pub fn body_headings(body: &str) -> Vec<Heading> {
    scan_headings(body, 1)
}

/// First heading matching `required` (e.g. `"## Verification"`) at the same
/// level, ignoring case and inner whitespace.
pub fn find_section<'h>(headings: &'h [Heading], required: &str) -> Option<&'h Heading> {
    let (level, text) = split_heading(required.trim())?;
    let wanted = normalize_heading_text(text);
    headings
        .iter()
        .find(|h| h.level == level && normalize_heading_text(&h.text) == wanted)
}

/// `"## Acceptance Criteria ##"` → `(2, "Acceptance Criteria")`.
fn split_heading(line: &str) -> Option<(usize, &str)> {
    let level = line.bytes().take_while(|b| *b == b'#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = &line[level..];
    if !(rest.is_empty() || rest.starts_with([' ', '\t'])) {
        return None;
    }
    let text = rest.trim().trim_end_matches('#').trim_end();
    Some((level, text))
}

fn normalize_heading_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Render a ticket file from front matter and body.
pub fn render_ticket(front_matter: &Mapping, body: &str) -> Result<String, serde_yaml::Error> {
    let mut out = String::from("---\n");
    if !front_matter.is_empty() {
        out.push_str(&serde_yaml::to_string(front_matter)?);
    }
    out.push_str("---\n");
    out.push_str(body);
    Ok(out)
}

// ============================================================================
// Run logs
// ============================================================================

/// Decoded `<run_started-basic>-<run_id>.jsonl` file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFileName {
    pub run_started: String,
    pub run_id: String,
}

impl RunFileName {
    pub const EXTENSION: &'static str = ".jsonl";

    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(Self::EXTENSION)?;
        let (run_started, run_id) = stem.split_once('-')?;
        if !timestamp::is_canonical_basic(run_started) || !is_valid_run_id(run_id) {
            return None;
        }
        Some(Self {
            run_started: run_started.to_string(),
            run_id: run_id.to_string(),
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}-{}{}", self.run_started, self.run_id, Self::EXTENSION)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        timestamp::parse_timestamp(&self.run_started)
    }
}

/// Run ids are path components: ASCII letters, digits, `_`, `-`.
pub fn is_valid_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// One decoded (or undecodable) log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    /// 1-based line number in the file.
    pub line: usize,
    pub record: Result<Map<String, Value>, ParseFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLogFile {
    pub path: String,
    pub file_name: Option<RunFileName>,
    pub lines: Vec<LogLine>,
}

impl ParsedLogFile {
    /// Successfully decoded records in file order.
    pub fn records(&self) -> impl Iterator<Item = (usize, &Map<String, Value>)> {
        self.lines
            .iter()
            .filter_map(|l| l.record.as_ref().ok().map(|r| (l.line, r)))
    }
}

/// Decode every non-blank line of a log file independently.
pub fn parse_log_file(path: &str, bytes: &[u8]) -> ParsedLogFile {
    let file_name = path.rsplit('/').next().and_then(RunFileName::parse);
    let lines: Vec<LogLine> = bytes
        .split(|b| *b == b'\n')
        .enumerate()
        .filter(|(_, raw)| !raw.iter().all(u8::is_ascii_whitespace))
        .map(|(idx, raw)| LogLine {
            line: idx + 1,
            record: parse_log_line(idx + 1, raw),
        })
        .collect();

    tracing::debug!(path, lines = lines.len(), "parsed run log");

    ParsedLogFile {
        path: path.to_string(),
        file_name,
        lines,
    }
}

/// Decode one line as a single JSON object.
pub fn parse_log_line(line: usize, raw: &[u8]) -> Result<Map<String, Value>, ParseFailure> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| ParseFailure::at("log line is not valid UTF-8", Some(line), None))?;
    let text = text.trim_end_matches('\r');
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ParseFailure::at(
            "log line must be a single JSON object",
            Some(line),
            Some(1),
        )),
        Err(e) => Err(ParseFailure::at(
            format!("invalid JSON: {e}"),
            Some(line),
            Some(e.column()),
        )),
    }
}
