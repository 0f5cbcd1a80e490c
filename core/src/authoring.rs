//! New tickets and status changes.
//!
//! Both go through the typed [`Ticket`] model, so anything written here
//! already satisfies the schema the validator enforces.

use chrono::{DateTime, Utc};
use serde_yaml::Mapping;

use crate::error::{Result, TicketsError};
use crate::log_writer::LogAppend;
use crate::model::{
    AgentLimits, Assignment, Priority, REQUIRED_SECTIONS, RelationKind, Status, Ticket,
    TicketFrontMatter, Verification, Vocabulary, dedup_in_place,
};
use crate::timestamp::to_millis;
use crate::uuid7::canonicalize_uuid;

/// `actor_id` of the entry logged for a status change.
pub const STATUS_CHANGE_ACTOR: &str = "status-change";

/// Caller-supplied content of a new ticket. The id and, unless given,
/// `created_at` are filled in by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTicket {
    pub title: String,
    /// Defaults to `todo`.
    pub status: Option<Status>,
    pub created_at: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub labels: Vec<String>,
    pub assignment: Option<Assignment>,
    pub dependencies: Vec<String>,
    pub blocks: Vec<String>,
    pub related: Vec<String>,
    pub agent_limits: Option<AgentLimits>,
    pub verification_commands: Vec<String>,
}

impl NewTicket {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Typed ticket for `id`, with the standard section skeleton as body.
    pub fn into_ticket(self, id: String, now: DateTime<Utc>, placeholder: &str) -> Result<Ticket> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(invalid("title must not be empty"));
        }

        let mut labels = Vec::with_capacity(self.labels.len());
        for label in self.labels {
            let label = label.trim();
            if label.is_empty() {
                return Err(invalid("labels must not be empty strings"));
            }
            labels.push(label.to_string());
        }
        dedup_in_place(&mut labels);

        if let Some(owner) = self.assignment.as_ref().and_then(|a| a.owner.as_deref())
            && owner.trim().is_empty()
        {
            return Err(invalid("assignment owner must not be empty"));
        }
        if let Some(limits) = &self.agent_limits {
            let values = [
                limits.iteration_timebox_minutes,
                limits.max_iterations,
                limits.max_tool_calls,
                limits.checkpoint_every_minutes,
            ];
            if values.contains(&Some(0)) {
                return Err(invalid("agent limits must be positive integers"));
            }
        }

        let mut front_matter = TicketFrontMatter {
            id,
            title,
            status: self.status.unwrap_or(Status::Todo),
            created_at: to_millis(self.created_at.unwrap_or(now)),
            assignment: self.assignment,
            priority: self.priority,
            labels,
            dependencies: Vec::new(),
            blocks: Vec::new(),
            related: Vec::new(),
            agent_limits: self.agent_limits,
            verification: (!self.verification_commands.is_empty()).then(|| Verification {
                commands: self.verification_commands,
                extra: Mapping::new(),
            }),
            extra: Mapping::new(),
        };
        let lists = [
            (RelationKind::Dependencies, self.dependencies),
            (RelationKind::Blocks, self.blocks),
            (RelationKind::Related, self.related),
        ];
        for (kind, entries) in lists {
            let target = front_matter.relations_mut(kind);
            for entry in entries {
                let id = canonicalize_uuid(&entry).ok_or_else(|| {
                    invalid(format!("{} entry '{entry}' is not a UUID", kind.as_str()))
                })?;
                target.push(id);
            }
            dedup_in_place(target);
        }

        Ok(Ticket {
            front_matter,
            body: template_body(placeholder),
        })
    }
}

/// Body of a new ticket: every required section, in order, each but the
/// title heading carrying `placeholder`.
pub fn template_body(placeholder: &str) -> String {
    let mut body = String::new();
    for (idx, heading) in REQUIRED_SECTIONS.iter().enumerate() {
        if idx > 0 {
            body.push('\n');
        }
        body.push_str(heading);
        body.push('\n');
        if idx > 0 && !placeholder.is_empty() {
            body.push('\n');
            body.push_str(placeholder);
            body.push('\n');
        }
    }
    body
}

/// Run to log a status change under. `Default` starts a new run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRun {
    pub run_id: Option<String>,
    pub run_started: Option<String>,
}

/// What a status change did.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    /// Repository-relative path of the ticket file.
    pub path: String,
    /// Status before the change, as written.
    pub previous: Option<String>,
    pub status: Status,
    /// The file was rewritten. False when the ticket already had `status`.
    pub written: bool,
    pub log: Option<LogAppend>,
}

pub(crate) fn invalid(reason: impl Into<String>) -> TicketsError {
    TicketsError::InvalidTicket(reason.into())
}
