//! Schema model for tickets and run-log entries.
//!
//! These are the typed views. Validation and repair work on the raw
//! front-matter mapping / JSON object so that malformed or unknown content
//! is never lost; a typed `Ticket` or `LogEntry` is built only from content
//! that already satisfies the schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parser::{ParsedTicket, render_ticket};

/// Required body headings, in the order new tickets carry them.
pub const REQUIRED_SECTIONS: [&str; 4] = [
    "# Ticket",
    "## Description",
    "## Acceptance Criteria",
    "## Verification",
];

/// Front-matter fields every ticket must carry.
pub const REQUIRED_TICKET_FIELDS: [&str; 4] = ["id", "title", "status", "created_at"];

/// Fields every log entry must carry.
pub const REQUIRED_LOG_FIELDS: [&str; 5] =
    ["ts", "run_started", "actor_type", "actor_id", "summary"];

/// Optional list-of-string fields of a log entry.
pub const LOG_STRING_LIST_FIELDS: [&str; 5] = [
    "tickets_created",
    "context_carried_over",
    "decisions",
    "next_steps",
    "blockers",
];

/// Keys of `agent_limits`; each must be a positive integer.
pub const AGENT_LIMIT_KEYS: [&str; 4] = [
    "iteration_timebox_minutes",
    "max_iterations",
    "max_tool_calls",
    "checkpoint_every_minutes",
];

/// Relationship-shaped keys that are derived from other tickets and must
/// never be persisted in front matter.
pub const RELATIONSHIP_LIKE_FIELDS: [&str; 12] = [
    "blocked_by",
    "depends_on",
    "parent",
    "parents",
    "child",
    "children",
    "duplicate",
    "duplicates",
    "duplicate_of",
    "supersedes",
    "superseded_by",
    "related_to",
];

/// `written_by` value of entries produced by this engine.
pub const MACHINE_WRITER: &str = "tickets";

// ============================================================================
// Enumerations
// ============================================================================

/// Closed string vocabularies used in front matter and logs.
pub trait Vocabulary: Sized + Copy + 'static {
    const ALL: &'static [Self];

    fn as_str(&self) -> &'static str;

    /// Exact, case-sensitive match.
    fn parse_exact(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == raw)
    }

    /// Case-insensitive, whitespace-trimmed match. A value that only
    /// matches here is repairable without a human decision.
    fn normalize(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|v| v.as_str() == wanted)
    }

    /// `a|b|c` listing for messages.
    fn choices() -> String {
        Self::ALL
            .iter()
            .map(Vocabulary::as_str)
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Ticket workflow status.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Todo,
    Doing,
    Blocked,
    Done,
    Canceled,
}

impl Vocabulary for Status {
    const ALL: &'static [Self] = &[
        Self::Todo,
        Self::Doing,
        Self::Blocked,
        Self::Done,
        Self::Canceled,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Canceled => "canceled",
        }
    }
}

/// Ticket priority.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Vocabulary for Priority {
    const ALL: &'static [Self] = &[Self::Low, Self::Medium, Self::High, Self::Critical];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Who may work a ticket.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMode {
    HumanOnly,
    AgentOnly,
    Mixed,
}

impl Vocabulary for AssignmentMode {
    const ALL: &'static [Self] = &[Self::HumanOnly, Self::AgentOnly, Self::Mixed];

    fn as_str(&self) -> &'static str {
        match self {
            Self::HumanOnly => "human_only",
            Self::AgentOnly => "agent_only",
            Self::Mixed => "mixed",
        }
    }
}

/// Author class of a log entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Human,
    Agent,
}

impl Vocabulary for ActorType {
    const ALL: &'static [Self] = &[Self::Human, Self::Agent];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Agent => "agent",
        }
    }
}

/// Stored relationship lists. `blocked_by` and friends are derived, never
/// stored.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Dependencies,
    Blocks,
    Related,
}

impl Vocabulary for RelationKind {
    const ALL: &'static [Self] = &[Self::Dependencies, Self::Blocks, Self::Related];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Dependencies => "dependencies",
            Self::Blocks => "blocks",
            Self::Related => "related",
        }
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// `assignment` block. `owner` is informational only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<AssignmentMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

/// Agent iteration budget.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_timebox_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_every_minutes: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

/// How to verify a ticket is done.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

/// Typed ticket front matter. Keys this model does not know land in
/// `extra` and are written back unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketFrontMatter {
    pub id: String,
    pub title: String,
    pub status: Status,
    #[serde(with = "crate::timestamp::extended")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment: Option<Assignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_limits: Option<AgentLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

/// A ticket document: typed front matter plus the Markdown body verbatim.
#[derive(Clone, Debug, PartialEq)]
pub struct Ticket {
    pub front_matter: TicketFrontMatter,
    pub body: String,
}

impl Ticket {
    /// Build the typed view of an already-parsed ticket.
    ///
    /// Fails with a human-readable reason when the front matter does not
    /// fit the schema; run the validator for the complete list of problems.
    pub fn from_parsed(parsed: &ParsedTicket) -> Result<Self, String> {
        let mut front_matter: TicketFrontMatter =
            serde_yaml::from_value(serde_yaml::Value::Mapping(parsed.front_matter.clone()))
                .map_err(|e| e.to_string())?;
        for kind in RelationKind::ALL {
            dedup_in_place(front_matter.relations_mut(*kind));
        }
        Ok(Self {
            front_matter,
            body: parsed.body.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.front_matter.id
    }

    /// Full file contents.
    pub fn render(&self) -> Result<String, serde_yaml::Error> {
        let value = serde_yaml::to_value(&self.front_matter)?;
        let mapping = match value {
            serde_yaml::Value::Mapping(mapping) => mapping,
            _ => serde_yaml::Mapping::new(),
        };
        render_ticket(&mapping, &self.body)
    }
}

impl TicketFrontMatter {
    pub fn relations(&self, kind: RelationKind) -> &[String] {
        match kind {
            RelationKind::Dependencies => &self.dependencies,
            RelationKind::Blocks => &self.blocks,
            RelationKind::Related => &self.related,
        }
    }

    pub fn relations_mut(&mut self, kind: RelationKind) -> &mut Vec<String> {
        match kind {
            RelationKind::Dependencies => &mut self.dependencies,
            RelationKind::Blocks => &mut self.blocks,
            RelationKind::Related => &mut self.related,
        }
    }
}

/// Drop later duplicates, keeping first-occurrence order.
pub fn dedup_in_place(values: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
}

// ============================================================================
// Log entries
// ============================================================================

/// `changes` block of a log entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogChanges {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// `verification` block of a log entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogVerification {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<String>,
}

/// One line of a run log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: String,
    pub run_started: String,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<LogChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<LogVerification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_from: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tickets_created: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_carried_over: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blockers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub written_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LogEntry {
    pub fn is_machine(&self) -> bool {
        self.written_by.as_deref() == Some(MACHINE_WRITER) || self.machine == Some(true)
    }

    /// Parsed `ts`, if it is a valid UTC timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        crate::timestamp::parse_timestamp(&self.ts)
    }
}

/// Machine marker check on a raw decoded line.
pub fn is_machine_marked(entry: &serde_json::Map<String, serde_json::Value>) -> bool {
    entry.get("written_by").and_then(serde_json::Value::as_str) == Some(MACHINE_WRITER)
        || entry.get("machine").and_then(serde_json::Value::as_bool) == Some(true)
}

/// "Last updated" of a ticket: the greatest valid `ts` across its entries.
pub fn last_updated<'a>(entries: impl IntoIterator<Item = &'a LogEntry>) -> Option<DateTime<Utc>> {
    entries.into_iter().filter_map(LogEntry::timestamp).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_normalization_is_case_insensitive() {
        assert_eq!(Status::parse_exact("todo"), Some(Status::Todo));
        assert_eq!(Status::parse_exact("TODO"), None);
        assert_eq!(Status::normalize(" TODO "), Some(Status::Todo));
        assert_eq!(AssignmentMode::normalize("Agent_Only"), Some(AssignmentMode::AgentOnly));
        assert_eq!(Priority::normalize("urgent"), None);
        assert_eq!(Status::choices(), "todo|doing|blocked|done|canceled");
    }

    #[test]
    fn machine_marker_variants() {
        let marked: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(r#"{"written_by":"tickets"}"#).expect("json");
        let flagged: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(r#"{"machine":true}"#).expect("json");
        let other: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(r#"{"written_by":"someone","machine":"yes"}"#).expect("json");
        assert!(is_machine_marked(&marked));
        assert!(is_machine_marked(&flagged));
        assert!(!is_machine_marked(&other));
    }

    #[test]
    fn last_updated_is_max_valid_ts() {
        let entry = |ts: &str| LogEntry {
            ts: ts.to_string(),
            run_started: "20260101T000000.000Z".to_string(),
            actor_type: ActorType::Human,
            actor_id: "me".to_string(),
            summary: "s".to_string(),
            changes: None,
            verification: None,
            created_from: None,
            tickets_created: Vec::new(),
            context_carried_over: Vec::new(),
            decisions: Vec::new(),
            next_steps: Vec::new(),
            blockers: Vec::new(),
            written_by: None,
            machine: None,
            extra: serde_json::Map::new(),
        };
        let entries = [
            entry("2026-01-02T00:00:00Z"),
            entry("not a time"),
            entry("2026-01-03T00:00:00Z"),
        ];
        let newest = last_updated(&entries).map(crate::timestamp::format_extended);
        assert_eq!(newest.as_deref(), Some("2026-01-03T00:00:00Z"));
    }
}
