//! Validation findings and the repair each one proposes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Issue severity. Only errors fail a validation pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Stable machine-readable finding codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    TicketFrontMatterInvalid,
    TicketRequiredFieldMissing,
    TicketFieldTypeInvalid,
    TicketTitleEmpty,
    TicketIdInvalid,
    TicketIdDuplicate,
    TicketCreatedAtInvalid,
    TicketCreatedAtNoncanonical,
    TicketStatusInvalid,
    TicketPriorityInvalid,
    TicketAssignmentInvalid,
    TicketAssignmentModeInvalid,
    TicketAssignmentOwnerInvalid,
    TicketLabelsInvalid,
    TicketAgentLimitsInvalid,
    TicketAgentLimitValueInvalid,
    TicketVerificationInvalid,
    TicketRelationshipInvalid,
    TicketRelationshipEntryEmpty,
    TicketRelationshipIdInvalid,
    TicketRelationshipDuplicate,
    TicketRelationshipSelf,
    TicketRelationshipUnknown,
    TicketRelationshipFieldForbidden,
    TicketSectionMissing,
    LogLineInvalid,
    LogRequiredFieldMissing,
    LogFieldTypeInvalid,
    LogTsInvalid,
    LogRunStartedInvalid,
    LogActorTypeInvalid,
    LogOptionalFieldInvalid,
    LogRunStartedMismatch,
    LogRunStartedFilenameMismatch,
    LogFilenameInvalid,
    LogMachineMarkerInvalid,
}

impl IssueCode {
    /// Every code, in declaration order.
    pub const ALL: &'static [Self] = &[
        Self::TicketFrontMatterInvalid,
        Self::TicketRequiredFieldMissing,
        Self::TicketFieldTypeInvalid,
        Self::TicketTitleEmpty,
        Self::TicketIdInvalid,
        Self::TicketIdDuplicate,
        Self::TicketCreatedAtInvalid,
        Self::TicketCreatedAtNoncanonical,
        Self::TicketStatusInvalid,
        Self::TicketPriorityInvalid,
        Self::TicketAssignmentInvalid,
        Self::TicketAssignmentModeInvalid,
        Self::TicketAssignmentOwnerInvalid,
        Self::TicketLabelsInvalid,
        Self::TicketAgentLimitsInvalid,
        Self::TicketAgentLimitValueInvalid,
        Self::TicketVerificationInvalid,
        Self::TicketRelationshipInvalid,
        Self::TicketRelationshipEntryEmpty,
        Self::TicketRelationshipIdInvalid,
        Self::TicketRelationshipDuplicate,
        Self::TicketRelationshipSelf,
        Self::TicketRelationshipUnknown,
        Self::TicketRelationshipFieldForbidden,
        Self::TicketSectionMissing,
        Self::LogLineInvalid,
        Self::LogRequiredFieldMissing,
        Self::LogFieldTypeInvalid,
        Self::LogTsInvalid,
        Self::LogRunStartedInvalid,
        Self::LogActorTypeInvalid,
        Self::LogOptionalFieldInvalid,
        Self::LogRunStartedMismatch,
        Self::LogRunStartedFilenameMismatch,
        Self::LogFilenameInvalid,
        Self::LogMachineMarkerInvalid,
    ];

    /// Wire spelling; identical to the serde form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TicketFrontMatterInvalid => "TICKET_FRONT_MATTER_INVALID",
            Self::TicketRequiredFieldMissing => "TICKET_REQUIRED_FIELD_MISSING",
            Self::TicketFieldTypeInvalid => "TICKET_FIELD_TYPE_INVALID",
            Self::TicketTitleEmpty => "TICKET_TITLE_EMPTY",
            Self::TicketIdInvalid => "TICKET_ID_INVALID",
            Self::TicketIdDuplicate => "TICKET_ID_DUPLICATE",
            Self::TicketCreatedAtInvalid => "TICKET_CREATED_AT_INVALID",
            Self::TicketCreatedAtNoncanonical => "TICKET_CREATED_AT_NONCANONICAL",
            Self::TicketStatusInvalid => "TICKET_STATUS_INVALID",
            Self::TicketPriorityInvalid => "TICKET_PRIORITY_INVALID",
            Self::TicketAssignmentInvalid => "TICKET_ASSIGNMENT_INVALID",
            Self::TicketAssignmentModeInvalid => "TICKET_ASSIGNMENT_MODE_INVALID",
            Self::TicketAssignmentOwnerInvalid => "TICKET_ASSIGNMENT_OWNER_INVALID",
            Self::TicketLabelsInvalid => "TICKET_LABELS_INVALID",
            Self::TicketAgentLimitsInvalid => "TICKET_AGENT_LIMITS_INVALID",
            Self::TicketAgentLimitValueInvalid => "TICKET_AGENT_LIMIT_VALUE_INVALID",
            Self::TicketVerificationInvalid => "TICKET_VERIFICATION_INVALID",
            Self::TicketRelationshipInvalid => "TICKET_RELATIONSHIP_INVALID",
            Self::TicketRelationshipEntryEmpty => "TICKET_RELATIONSHIP_ENTRY_EMPTY",
            Self::TicketRelationshipIdInvalid => "TICKET_RELATIONSHIP_ID_INVALID",
            Self::TicketRelationshipDuplicate => "TICKET_RELATIONSHIP_DUPLICATE",
            Self::TicketRelationshipSelf => "TICKET_RELATIONSHIP_SELF",
            Self::TicketRelationshipUnknown => "TICKET_RELATIONSHIP_UNKNOWN",
            Self::TicketRelationshipFieldForbidden => "TICKET_RELATIONSHIP_FIELD_FORBIDDEN",
            Self::TicketSectionMissing => "TICKET_SECTION_MISSING",
            Self::LogLineInvalid => "LOG_LINE_INVALID",
            Self::LogRequiredFieldMissing => "LOG_REQUIRED_FIELD_MISSING",
            Self::LogFieldTypeInvalid => "LOG_FIELD_TYPE_INVALID",
            Self::LogTsInvalid => "LOG_TS_INVALID",
            Self::LogRunStartedInvalid => "LOG_RUN_STARTED_INVALID",
            Self::LogActorTypeInvalid => "LOG_ACTOR_TYPE_INVALID",
            Self::LogOptionalFieldInvalid => "LOG_OPTIONAL_FIELD_INVALID",
            Self::LogRunStartedMismatch => "LOG_RUN_STARTED_MISMATCH",
            Self::LogRunStartedFilenameMismatch => "LOG_RUN_STARTED_FILENAME_MISMATCH",
            Self::LogFilenameInvalid => "LOG_FILENAME_INVALID",
            Self::LogMachineMarkerInvalid => "LOG_MACHINE_MARKER_INVALID",
        }
    }
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position inside a file (1-based).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

/// One validation finding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// `I0001`-style id, assigned when the report is built.
    #[serde(default)]
    pub id: String,
    pub severity: Severity,
    pub code: IssueCode,
    pub message: String,
    pub ticket_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Candidate fix; turned into a `Repair` by the report generator.
    #[serde(skip)]
    pub proposal: Option<RepairProposal>,
}

impl Issue {
    pub fn new(
        severity: Severity,
        code: IssueCode,
        ticket_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            severity,
            code,
            message: message.into(),
            ticket_path: ticket_path.into(),
            field: None,
            log_path: None,
            location: None,
            details: None,
            proposal: None,
        }
    }

    pub fn error(
        code: IssueCode,
        ticket_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Error, code, ticket_path, message)
    }

    pub fn warning(
        code: IssueCode,
        ticket_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Warning, code, ticket_path, message)
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_log(mut self, log_path: impl Into<String>, line: Option<usize>) -> Self {
        self.log_path = Some(log_path.into());
        self.location = line.map(|line| Location { line, column: None });
        self
    }

    pub fn with_location(mut self, line: Option<usize>, column: Option<usize>) -> Self {
        self.location = line.map(|line| Location { line, column });
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_proposal(mut self, proposal: RepairProposal) -> Self {
        self.proposal = Some(proposal);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

// ============================================================================
// Repair proposals
// ============================================================================

/// What a repair does to a ticket file.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    /// Append a missing required heading with placeholder text.
    AddSection,
    /// Rewrite an enum value to its canonical lowercase spelling.
    NormalizeEnum,
    /// Rewrite `created_at` to the canonical extended form.
    NormalizeCreatedAt,
    /// Coerce to list, drop empty entries, canonicalise ids, dedupe.
    NormalizeRelationshipList,
    /// Remove specific entries from a relationship list.
    RemoveRelationshipEntries,
    /// Delete a front-matter key.
    RemoveFrontMatterField,
    /// Set a front-matter key to a decided value.
    SetFrontMatterField,
    /// Give the ticket a new id, optionally rewriting references to it.
    ReplaceId,
}

impl RepairAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddSection => "add_section",
            Self::NormalizeEnum => "normalize_enum",
            Self::NormalizeCreatedAt => "normalize_created_at",
            Self::NormalizeRelationshipList => "normalize_relationship_list",
            Self::RemoveRelationshipEntries => "remove_relationship_entries",
            Self::RemoveFrontMatterField => "remove_front_matter_field",
            Self::SetFrontMatterField => "set_front_matter_field",
            Self::ReplaceId => "replace_id",
        }
    }
}

/// A candidate repair before it is numbered into a plan.
#[derive(Clone, Debug, PartialEq)]
pub struct RepairProposal {
    pub action: RepairAction,
    pub safe: bool,
    pub params: BTreeMap<String, Value>,
}

impl RepairProposal {
    fn new(action: RepairAction, safe: bool) -> Self {
        Self {
            action,
            safe,
            params: BTreeMap::new(),
        }
    }

    fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn add_section(heading: &str) -> Self {
        Self::new(RepairAction::AddSection, true).param("heading", heading)
    }

    pub fn normalize_enum(field: &str, value: &str) -> Self {
        Self::new(RepairAction::NormalizeEnum, true)
            .param("field", field)
            .param("value", value)
    }

    pub fn normalize_created_at(value: &str) -> Self {
        Self::new(RepairAction::NormalizeCreatedAt, true).param("value", value)
    }

    pub fn normalize_relationship_list(field: &str, value: Vec<String>) -> Self {
        Self::new(RepairAction::NormalizeRelationshipList, true)
            .param("field", field)
            .param("value", value)
    }

    pub fn remove_relationship_entries(field: &str, entries: Vec<String>) -> Self {
        Self::new(RepairAction::RemoveRelationshipEntries, false)
            .param("field", field)
            .param("entries", entries)
    }

    pub fn remove_front_matter_field(field: &str) -> Self {
        Self::new(RepairAction::RemoveFrontMatterField, false).param("field", field)
    }

    /// Disruptive: `value` is left `null` for a human to decide.
    pub fn set_front_matter_field(field: &str) -> Self {
        Self::new(RepairAction::SetFrontMatterField, false)
            .param("field", field)
            .param("value", Value::Null)
    }

    /// Disruptive id replacement. `value`, `generate_uuidv7` and
    /// `update_references` are explicit decisions.
    pub fn replace_id(
        old_id: Option<&str>,
        value: Option<String>,
        update_references: Option<bool>,
    ) -> Self {
        Self::new(RepairAction::ReplaceId, false)
            .param("old_id", old_id.map_or(Value::Null, Value::from))
            .param("value", value.map_or(Value::Null, Value::from))
            .param("generate_uuidv7", false)
            .param("update_references", update_references.map_or(Value::Null, Value::from))
    }

    /// No `null` placeholders left.
    pub fn is_resolved(&self) -> bool {
        !self
            .params
            .iter()
            .any(|(key, value)| value.is_null() && is_decision_param(self.action, key))
    }
}

/// Parameters a human must fill before a repair can run. Informational
/// params (`old_id`) may stay `null`.
pub fn is_decision_param(action: RepairAction, key: &str) -> bool {
    match action {
        RepairAction::ReplaceId => matches!(key, "value" | "update_references"),
        _ => true,
    }
}
