//! Ticket and run-log validation.
//!
//! Validation is pure: it reads parsed content plus the repository graph and
//! returns every finding it can make, never stopping at the first one. Each
//! finding carries the repair that would address it, when one exists.

use std::collections::HashSet;

use serde_json::{Map, Value as Json, json};
use serde_yaml::Value;

use crate::graph::TicketGraph;
use crate::issue::{Issue, IssueCode, RepairProposal, Severity};
use crate::model::{
    AGENT_LIMIT_KEYS, ActorType, AssignmentMode, LOG_STRING_LIST_FIELDS, Priority,
    RELATIONSHIP_LIKE_FIELDS, REQUIRED_LOG_FIELDS, REQUIRED_TICKET_FIELDS, RelationKind, Status,
    Vocabulary, is_machine_marked,
};
use crate::parser::{ParseFailure, ParsedLogFile, ParsedTicket};
use crate::timestamp::{format_extended, is_canonical_extended, parse_timestamp, same_instant};
use crate::uuid7::{canonicalize_uuid, is_uuid7};

// ============================================================================
// Tickets
// ============================================================================

/// A ticket that could not be parsed yields exactly one issue.
pub fn validate_parse_failure(path: &str, failure: &ParseFailure) -> Issue {
    Issue::error(
        IssueCode::TicketFrontMatterInvalid,
        path,
        format!("cannot parse ticket: {}", failure.reason),
    )
    .with_location(failure.line, failure.column)
}

/// Validate one parsed ticket against the schema and the repository graph.
pub fn validate_ticket(parsed: &ParsedTicket, graph: &TicketGraph) -> Vec<Issue> {
    let mut check = TicketCheck {
        parsed,
        graph,
        issues: Vec::new(),
    };
    check.required_fields();
    let self_id = check.id();
    check.created_at();
    check.enums_and_blocks();
    check.relationships(self_id.as_deref());
    check.forbidden_keys();
    check.sections();

    tracing::debug!(path = %parsed.path, issues = check.issues.len(), "validated ticket");
    check.issues
}

struct TicketCheck<'a> {
    parsed: &'a ParsedTicket,
    graph: &'a TicketGraph,
    issues: Vec<Issue>,
}

impl<'a> TicketCheck<'a> {
    fn path(&self) -> &'a str {
        &self.parsed.path
    }

    /// Non-null value of a top-level key.
    fn value(&self, key: &str) -> Option<&'a Value> {
        self.parsed.field(key).filter(|v| !v.is_null())
    }

    fn push(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    fn error(&self, code: IssueCode, field: &str, message: impl Into<String>) -> Issue {
        Issue::error(code, self.path(), message).with_field(field)
    }

    fn required_fields(&mut self) {
        for field in REQUIRED_TICKET_FIELDS {
            if self.value(field).is_some() {
                continue;
            }
            let proposal = match field {
                "id" => RepairProposal::replace_id(None, None, Some(false)),
                _ => RepairProposal::set_front_matter_field(field),
            };
            let issue = self
                .error(
                    IssueCode::TicketRequiredFieldMissing,
                    field,
                    format!("required field '{field}' is missing"),
                )
                .with_proposal(proposal);
            self.push(issue);
        }

        match self.value("title") {
            Some(Value::String(title)) if title.trim().is_empty() => {
                let issue = self
                    .error(IssueCode::TicketTitleEmpty, "title", "title must not be empty")
                    .with_proposal(RepairProposal::set_front_matter_field("title"));
                self.push(issue);
            }
            Some(Value::String(_)) | None => {}
            Some(_) => {
                let issue = self
                    .error(IssueCode::TicketFieldTypeInvalid, "title", "title must be a string")
                    .with_proposal(RepairProposal::set_front_matter_field("title"));
                self.push(issue);
            }
        }
    }

    /// Checks `id`; returns it when it is a string so relationship checks
    /// can detect self references.
    fn id(&mut self) -> Option<String> {
        let raw = self.value("id")?.as_str().map(str::to_string);
        let Some(raw) = raw else {
            let issue = self
                .error(IssueCode::TicketIdInvalid, "id", "id must be a UUIDv7 string")
                .with_proposal(RepairProposal::replace_id(None, None, Some(false)));
            self.push(issue);
            return None;
        };

        if !is_uuid7(&raw) {
            let suggestion = canonicalize_uuid(&raw).filter(|c| is_uuid7(c));
            let issue = self
                .error(
                    IssueCode::TicketIdInvalid,
                    "id",
                    format!("id '{raw}' is not a lowercase canonical UUIDv7"),
                )
                .with_proposal(RepairProposal::replace_id(Some(&raw), suggestion, None));
            self.push(issue);
        } else if self.graph.is_duplicate(&raw, self.path()) {
            let first = self.graph.path_of(&raw).unwrap_or_default().to_string();
            let issue = self
                .error(
                    IssueCode::TicketIdDuplicate,
                    "id",
                    format!("id '{raw}' is already used by {first}"),
                )
                .with_details(json!({ "first_path": first }))
                .with_proposal(RepairProposal::replace_id(Some(&raw), None, None));
            self.push(issue);
        }
        Some(raw)
    }

    fn created_at(&mut self) {
        let Some(value) = self.value("created_at") else {
            return;
        };
        let parsed = value.as_str().map(|s| (s, parse_timestamp(s)));
        match parsed {
            Some((raw, Some(dt))) => {
                if !is_canonical_extended(raw) {
                    let canonical = format_extended(dt);
                    let issue = Issue::warning(
                        IssueCode::TicketCreatedAtNoncanonical,
                        self.path(),
                        format!("created_at '{raw}' is not in canonical form '{canonical}'"),
                    )
                    .with_field("created_at")
                    .with_proposal(RepairProposal::normalize_created_at(&canonical));
                    self.push(issue);
                }
            }
            _ => {
                let issue = self
                    .error(
                        IssueCode::TicketCreatedAtInvalid,
                        "created_at",
                        "created_at must be an ISO-8601 UTC timestamp",
                    )
                    .with_proposal(RepairProposal::set_front_matter_field("created_at"));
                self.push(issue);
            }
        }
    }

    fn enums_and_blocks(&mut self) {
        let status = self.value("status").cloned();
        self.vocabulary::<Status>("status", status.as_ref(), IssueCode::TicketStatusInvalid);
        let priority = self.value("priority").cloned();
        self.vocabulary::<Priority>(
            "priority",
            priority.as_ref(),
            IssueCode::TicketPriorityInvalid,
        );

        match self.value("assignment").cloned() {
            None => {}
            Some(Value::Mapping(assignment)) => {
                self.vocabulary::<AssignmentMode>(
                    "assignment.mode",
                    assignment.get("mode").filter(|v| !v.is_null()),
                    IssueCode::TicketAssignmentModeInvalid,
                );
                if assignment
                    .get("owner")
                    .is_some_and(|owner| !owner.is_null() && !owner.is_string())
                {
                    let issue = self.error(
                        IssueCode::TicketAssignmentOwnerInvalid,
                        "assignment.owner",
                        "assignment.owner must be a string",
                    );
                    self.push(issue);
                }
            }
            Some(_) => {
                let issue = self.error(
                    IssueCode::TicketAssignmentInvalid,
                    "assignment",
                    "assignment must be a mapping with 'mode' and optional 'owner'",
                );
                self.push(issue);
            }
        }

        if self.value("labels").is_some_and(|v| !is_string_list(v)) {
            let issue = self.error(
                IssueCode::TicketLabelsInvalid,
                "labels",
                "labels must be a list of strings",
            );
            self.push(issue);
        }

        match self.value("agent_limits").cloned() {
            None => {}
            Some(Value::Mapping(limits)) => {
                for key in AGENT_LIMIT_KEYS {
                    let Some(value) = limits.get(key).filter(|v| !v.is_null()) else {
                        continue;
                    };
                    let positive = value
                        .as_u64()
                        .is_some_and(|n| n > 0 && n <= u64::from(u32::MAX));
                    if !positive {
                        let field = format!("agent_limits.{key}");
                        let issue = self
                            .error(
                                IssueCode::TicketAgentLimitValueInvalid,
                                &field,
                                format!("{field} must be a positive integer"),
                            )
                            .with_proposal(RepairProposal::set_front_matter_field(&field));
                        self.push(issue);
                    }
                }
            }
            Some(_) => {
                let issue = self.error(
                    IssueCode::TicketAgentLimitsInvalid,
                    "agent_limits",
                    "agent_limits must be a mapping",
                );
                self.push(issue);
            }
        }

        let verification_ok = match self.value("verification") {
            None => true,
            Some(Value::Mapping(verification)) => verification
                .get("commands")
                .filter(|v| !v.is_null())
                .is_none_or(is_string_list),
            Some(_) => false,
        };
        if !verification_ok {
            let issue = self.error(
                IssueCode::TicketVerificationInvalid,
                "verification",
                "verification must be a mapping whose 'commands' is a list of strings",
            );
            self.push(issue);
        }
    }

    fn vocabulary<V: Vocabulary>(&mut self, field: &str, value: Option<&Value>, code: IssueCode) {
        let Some(value) = value else {
            return;
        };
        let issue = match value.as_str() {
            Some(raw) if V::parse_exact(raw).is_some() => return,
            Some(raw) => match V::normalize(raw) {
                Some(canonical) => self
                    .error(
                        code,
                        field,
                        format!("{field} '{raw}' must be written '{}'", canonical.as_str()),
                    )
                    .with_proposal(RepairProposal::normalize_enum(field, canonical.as_str())),
                None => self
                    .error(
                        code,
                        field,
                        format!("{field} '{raw}' is not one of {}", V::choices()),
                    )
                    .with_proposal(RepairProposal::set_front_matter_field(field)),
            },
            None => self
                .error(code, field, format!("{field} must be one of {}", V::choices()))
                .with_proposal(RepairProposal::set_front_matter_field(field)),
        };
        self.push(issue);
    }

    fn relationships(&mut self, self_id: Option<&str>) {
        let self_id =
            self_id.map(|id| canonicalize_uuid(id).unwrap_or_else(|| id.trim().to_string()));
        for kind in RelationKind::ALL {
            let field = kind.as_str();
            let Some(value) = self.value(field).cloned() else {
                continue;
            };
            let (entries, bare) = match &value {
                Value::String(s) => (vec![s.as_str()], true),
                Value::Sequence(items) if items.iter().all(Value::is_string) => {
                    (items.iter().filter_map(Value::as_str).collect(), false)
                }
                _ => {
                    let issue = self.error(
                        IssueCode::TicketRelationshipInvalid,
                        field,
                        format!("{field} must be a list of ticket ids"),
                    );
                    self.push(issue);
                    continue;
                }
            };
            let scan = RelationScan::scan(&entries, self_id.as_deref(), self.graph);
            let normalize =
                RepairProposal::normalize_relationship_list(field, scan.normalized.clone());

            if bare {
                let issue = self
                    .error(
                        IssueCode::TicketRelationshipInvalid,
                        field,
                        format!("{field} must be a list, not a single string"),
                    )
                    .with_proposal(normalize.clone());
                self.push(issue);
            }
            if scan.empty > 0 {
                let issue = self
                    .error(
                        IssueCode::TicketRelationshipEntryEmpty,
                        field,
                        format!(
                            "{field} contains {} empty entr{}",
                            scan.empty,
                            plural_y(scan.empty)
                        ),
                    )
                    .with_proposal(normalize.clone());
                self.push(issue);
            }
            if !scan.fixable.is_empty() || !scan.unfixable.is_empty() {
                let mut bad = scan.fixable.clone();
                bad.extend(scan.unfixable.iter().cloned());
                let mut issue = self
                    .error(
                        IssueCode::TicketRelationshipIdInvalid,
                        field,
                        format!(
                            "{field} entries are not lowercase canonical UUIDs: {}",
                            bad.join(", ")
                        ),
                    )
                    .with_details(json!({ "entries": bad }));
                if scan.unfixable.is_empty() {
                    issue = issue.with_proposal(normalize.clone());
                }
                self.push(issue);
            }
            if !scan.duplicates.is_empty() {
                let issue = Issue::warning(
                    IssueCode::TicketRelationshipDuplicate,
                    self.path(),
                    format!("{field} lists {} more than once", scan.duplicates.join(", ")),
                )
                .with_field(field)
                .with_details(json!({ "entries": scan.duplicates }))
                .with_proposal(normalize.clone());
                self.push(issue);
            }
            if let Some(own) = scan.self_reference {
                let issue = self
                    .error(
                        IssueCode::TicketRelationshipSelf,
                        field,
                        format!("{field} must not reference the ticket itself"),
                    )
                    .with_proposal(RepairProposal::remove_relationship_entries(field, vec![own]));
                self.push(issue);
            }
            if !scan.unknown.is_empty() {
                let issue = self
                    .error(
                        IssueCode::TicketRelationshipUnknown,
                        field,
                        format!("{field} references unknown tickets: {}", scan.unknown.join(", ")),
                    )
                    .with_details(json!({ "entries": scan.unknown }));
                self.push(issue);
            }
        }
    }

    fn forbidden_keys(&mut self) {
        for key in RELATIONSHIP_LIKE_FIELDS {
            if self.parsed.field(key).is_some() {
                let issue = self
                    .error(
                        IssueCode::TicketRelationshipFieldForbidden,
                        key,
                        format!("'{key}' is derived from other tickets and must not be stored"),
                    )
                    .with_proposal(RepairProposal::remove_front_matter_field(key));
                self.push(issue);
            }
        }
    }

    fn sections(&mut self) {
        for section in self.parsed.missing_sections() {
            let issue = Issue::error(
                IssueCode::TicketSectionMissing,
                self.path(),
                format!("missing required section '{section}'"),
            )
            .with_details(json!({ "section": section }))
            .with_proposal(RepairProposal::add_section(section));
            self.push(issue);
        }
    }
}

/// What one relationship list contains, and what its normalised form is.
#[derive(Debug, Default)]
struct RelationScan {
    normalized: Vec<String>,
    empty: usize,
    /// UUIDs spelled non-canonically.
    fixable: Vec<String>,
    /// Entries that are not UUIDs at all.
    unfixable: Vec<String>,
    duplicates: Vec<String>,
    self_reference: Option<String>,
    unknown: Vec<String>,
}

impl RelationScan {
    fn scan(entries: &[&str], self_id: Option<&str>, graph: &TicketGraph) -> Self {
        let mut scan = Self::default();
        let mut seen = HashSet::new();
        for raw in entries {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                scan.empty += 1;
                continue;
            }
            let canonical = canonicalize_uuid(trimmed);
            let entry = match &canonical {
                Some(c) => {
                    if c != raw {
                        scan.fixable.push((*raw).to_string());
                    }
                    c.clone()
                }
                None => {
                    scan.unfixable.push((*raw).to_string());
                    trimmed.to_string()
                }
            };
            if !seen.insert(entry.clone()) {
                if !scan.duplicates.contains(&entry) {
                    scan.duplicates.push(entry);
                }
                continue;
            }
            if canonical.is_some() {
                if self_id == Some(entry.as_str()) {
                    scan.self_reference = Some(entry.clone());
                } else if !graph.contains(&entry) {
                    scan.unknown.push(entry.clone());
                }
            }
            scan.normalized.push(entry);
        }
        scan
    }
}

fn is_string_list(value: &Value) -> bool {
    value
        .as_sequence()
        .is_some_and(|items| items.iter().all(Value::is_string))
}

fn plural_y(n: usize) -> &'static str {
    if n == 1 { "y" } else { "ies" }
}

// ============================================================================
// Run logs
// ============================================================================

/// Which rule set an entry is held to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strictness {
    /// Machine-marked entries, or every entry when strict logs are
    /// configured. Rule failures are errors.
    Strict,
    /// Hand-written entries. Rule failures are warnings.
    BestEffort,
}

impl Strictness {
    pub fn for_entry(entry: &Map<String, Json>, strict_default: bool) -> Self {
        if strict_default || is_machine_marked(entry) {
            Self::Strict
        } else {
            Self::BestEffort
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::Strict => Severity::Error,
            Self::BestEffort => Severity::Warning,
        }
    }
}

/// A log-entry rule violation before a severity is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub code: IssueCode,
    pub field: String,
    pub message: String,
}

impl RuleFailure {
    fn new(code: IssueCode, field: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// The single rule set for log entries. Callers pick the severity through
/// [`Strictness`].
pub fn entry_rule_failures(entry: &Map<String, Json>) -> Vec<RuleFailure> {
    let mut failures = Vec::new();

    for field in REQUIRED_LOG_FIELDS {
        let Some(value) = entry.get(field).filter(|v| !v.is_null()) else {
            failures.push(RuleFailure::new(
                IssueCode::LogRequiredFieldMissing,
                field,
                format!("required field '{field}' is missing"),
            ));
            continue;
        };
        let text = value.as_str();
        match field {
            "ts" if text.and_then(parse_timestamp).is_none() => failures.push(RuleFailure::new(
                IssueCode::LogTsInvalid,
                field,
                "ts must be an ISO-8601 UTC timestamp",
            )),
            "run_started" if text.and_then(parse_timestamp).is_none() => {
                failures.push(RuleFailure::new(
                    IssueCode::LogRunStartedInvalid,
                    field,
                    "run_started must be an ISO-8601 UTC timestamp",
                ));
            }
            "actor_type" if text.and_then(ActorType::parse_exact).is_none() => {
                failures.push(RuleFailure::new(
                    IssueCode::LogActorTypeInvalid,
                    field,
                    format!("actor_type must be one of {}", ActorType::choices()),
                ));
            }
            "actor_id" | "summary" if text.is_none_or(|s| s.trim().is_empty()) => {
                failures.push(RuleFailure::new(
                    IssueCode::LogFieldTypeInvalid,
                    field,
                    format!("{field} must be a non-empty string"),
                ));
            }
            _ => {}
        }
    }

    for field in LOG_STRING_LIST_FIELDS {
        if entry
            .get(field)
            .is_some_and(|v| !v.is_null() && !is_json_string_list(v))
        {
            failures.push(optional_invalid(field, "must be a list of strings"));
        }
    }
    if entry
        .get("created_from")
        .is_some_and(|v| !v.is_null() && !v.is_string())
    {
        failures.push(optional_invalid("created_from", "must be a string"));
    }
    match entry.get("changes") {
        None | Some(Json::Null) => {}
        Some(Json::Object(changes)) => {
            if changes.get("files").is_some_and(|v| !is_json_string_list(v)) {
                failures.push(optional_invalid("changes.files", "must be a list of strings"));
            }
        }
        Some(_) => failures.push(optional_invalid("changes", "must be an object")),
    }
    match entry.get("verification") {
        None | Some(Json::Null) => {}
        Some(Json::Object(verification)) => {
            if verification
                .get("commands")
                .is_some_and(|v| !is_json_string_list(v))
            {
                failures.push(optional_invalid(
                    "verification.commands",
                    "must be a list of strings",
                ));
            }
            if verification
                .get("results")
                .is_some_and(|v| !v.is_null() && !v.is_string())
            {
                failures.push(optional_invalid("verification.results", "must be a string"));
            }
        }
        Some(_) => failures.push(optional_invalid("verification", "must be an object")),
    }

    failures
}

fn optional_invalid(field: &str, what: &str) -> RuleFailure {
    RuleFailure::new(IssueCode::LogOptionalFieldInvalid, field, format!("{field} {what}"))
}

fn is_json_string_list(value: &Json) -> bool {
    value
        .as_array()
        .is_some_and(|items| items.iter().all(Json::is_string))
}

/// Validate every line of one run-log file.
///
/// `ticket_path` is the owning ticket, used as the issue's `ticket_path`.
pub fn validate_log_file(
    ticket_path: &str,
    parsed: &ParsedLogFile,
    strict_default: bool,
) -> Vec<Issue> {
    let mut issues = Vec::new();
    let log_path = parsed.path.as_str();

    if parsed.file_name.is_none() {
        issues.push(
            Issue::warning(
                IssueCode::LogFilenameInvalid,
                ticket_path,
                "log file name is not '<run_started>-<run_id>.jsonl'",
            )
            .with_log(log_path, None),
        );
    }

    let mut reference: Option<String> = None;
    for line in &parsed.lines {
        let entry = match &line.record {
            Ok(entry) => entry,
            Err(failure) => {
                issues.push(
                    Issue::error(IssueCode::LogLineInvalid, ticket_path, failure.reason.clone())
                        .with_log(log_path, Some(line.line))
                        .with_location(Some(line.line), failure.column),
                );
                continue;
            }
        };

        let strictness = Strictness::for_entry(entry, strict_default);
        for failure in entry_rule_failures(entry) {
            issues.push(
                Issue::new(strictness.severity(), failure.code, ticket_path, failure.message)
                    .with_field(failure.field)
                    .with_log(log_path, Some(line.line)),
            );
        }

        let marker_ok = entry.get("written_by").is_none_or(Json::is_string)
            && entry.get("machine").is_none_or(Json::is_boolean);
        if !marker_ok {
            issues.push(
                Issue::warning(
                    IssueCode::LogMachineMarkerInvalid,
                    ticket_path,
                    "machine marker must be 'written_by: <string>' or 'machine: <bool>'",
                )
                .with_log(log_path, Some(line.line)),
            );
        }

        let Some(run_started) = entry.get("run_started").and_then(Json::as_str) else {
            continue;
        };
        match &reference {
            None => reference = Some(run_started.to_string()),
            Some(first) if first != run_started && !same_instant(first, run_started) => {
                issues.push(
                    Issue::error(
                        IssueCode::LogRunStartedMismatch,
                        ticket_path,
                        format!(
                            "run_started '{run_started}' differs from '{first}' earlier in the file"
                        ),
                    )
                    .with_field("run_started")
                    .with_log(log_path, Some(line.line)),
                );
            }
            Some(_) => {}
        }

        let filename_mismatch = parsed.file_name.as_ref().filter(|name| {
            parse_timestamp(run_started).is_some() && !same_instant(&name.run_started, run_started)
        });
        if let Some(name) = filename_mismatch {
            let severity = if is_machine_marked(entry) {
                Severity::Error
            } else {
                Severity::Warning
            };
            issues.push(
                Issue::new(
                    severity,
                    IssueCode::LogRunStartedFilenameMismatch,
                    ticket_path,
                    format!(
                        "run_started '{run_started}' does not match file name '{}'",
                        name.run_started
                    ),
                )
                .with_field("run_started")
                .with_log(log_path, Some(line.line)),
            );
        }
    }

    tracing::debug!(log_path, issues = issues.len(), "validated run log");
    issues
}
