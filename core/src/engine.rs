//! Engine facade: the three operations an outer command layer drives.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_yaml::Value;

use crate::TICKET_FILENAME;
use crate::authoring::{LogRun, NewTicket, STATUS_CHANGE_ACTOR, StatusChange, invalid};
use crate::clock::{Clock, SystemClock};
use crate::config::TicketsConfig;
use crate::error::{Result, TicketsError};
use crate::graph::TicketRelations;
use crate::issue::Issue;
use crate::log_writer::{LogAppend, LogWriter, NewLogEntry};
use crate::model::{ActorType, LogEntry, Status, Ticket, Vocabulary, last_updated};
use crate::parser::{parse_log_file, render_ticket};
use crate::repair::{RepairEngine, RepairOutcome};
use crate::report::{IssuesReport, Repair, ValidationOutcome};
use crate::snapshot::{RepoSnapshot, Target, TicketEntry, load_logs};
use crate::store::{FsStore, TicketStore};
use crate::uuid7::{canonicalize_uuid, new_uuid7};
use crate::validate::{validate_log_file, validate_parse_failure, validate_ticket};

/// Process exit classes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitClass {
    Success,
    ValidationErrors,
    ToolingFailure,
}

impl ExitClass {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::ValidationErrors => 1,
            Self::ToolingFailure => 2,
        }
    }

    pub fn for_validation(result: &Result<ValidationReport>) -> Self {
        match result {
            Ok(report) => report.exit_class(),
            Err(e) => Self::for_error(e),
        }
    }

    pub fn for_error(error: &TicketsError) -> Self {
        tracing::debug!(category = error.category().as_str(), "tooling failure");
        Self::ToolingFailure
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub report: IssuesReport,
    pub tickets_checked: usize,
    pub logs_checked: usize,
}

impl ValidationReport {
    pub fn exit_class(&self) -> ExitClass {
        match self.report.outcome() {
            ValidationOutcome::Clean => ExitClass::Success,
            ValidationOutcome::Errors => ExitClass::ValidationErrors,
        }
    }
}

pub struct TicketEngine<S: TicketStore, C: Clock> {
    store: S,
    clock: C,
    config: TicketsConfig,
}

impl TicketEngine<FsStore, SystemClock> {
    /// Engine over the repository at `root`, with its configuration.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = TicketsConfig::load(&root)?;
        Ok(Self::new(FsStore::new(root), SystemClock, config))
    }
}

impl<S: TicketStore, C: Clock> TicketEngine<S, C> {
    pub fn new(store: S, clock: C, config: TicketsConfig) -> Self {
        Self { store, clock, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &TicketsConfig {
        &self.config
    }

    fn snapshot(&self) -> Result<RepoSnapshot> {
        RepoSnapshot::load(&self.store, self.config.tickets_root())
    }

    /// Validate the target tickets and their run logs.
    pub fn validate(&self, target: &Target) -> Result<ValidationReport> {
        let snapshot = self.snapshot()?;
        self.validate_snapshot(&snapshot, target)
    }

    fn validate_snapshot(
        &self,
        snapshot: &RepoSnapshot,
        target: &Target,
    ) -> Result<ValidationReport> {
        let root = self.config.tickets_root();
        let graph = snapshot.graph();
        let entries = snapshot.resolve(target, root)?;

        let mut issues: Vec<Issue> = Vec::new();
        let mut logs_checked = 0;
        for entry in &entries {
            match &entry.parsed {
                Ok(parsed) => issues.extend(validate_ticket(parsed, &graph)),
                Err(failure) => issues.push(validate_parse_failure(&entry.path, failure)),
            }
            for (path, bytes) in load_logs(&self.store, entry)? {
                let parsed = parse_log_file(&path, &bytes);
                issues.extend(validate_log_file(&entry.path, &parsed, self.config.strict_logs));
                logs_checked += 1;
            }
        }

        let targets = entries.iter().map(|e| e.path.clone()).collect();
        let report = IssuesReport::build(self.clock.now(), targets, issues);
        let summary = report.summary();
        tracing::info!(
            target = target.label(),
            tickets = entries.len(),
            logs = logs_checked,
            errors = summary.errors,
            warnings = summary.warnings,
            "validation finished"
        );
        Ok(ValidationReport {
            report,
            tickets_checked: entries.len(),
            logs_checked,
        })
    }

    /// Without a plan: validate and apply every safe repair. With a plan:
    /// apply its enabled repairs that fall inside `target`.
    pub fn repair(&self, target: &Target, plan: Option<&IssuesReport>) -> Result<RepairOutcome> {
        let snapshot = self.snapshot()?;
        let engine = RepairEngine::new(&self.store, &self.clock, &self.config);
        match plan {
            Some(plan) => {
                let in_scope: Vec<String> = snapshot
                    .resolve(target, self.config.tickets_root())?
                    .iter()
                    .map(|e| e.path.clone())
                    .collect();
                let repairs: Vec<&Repair> = plan
                    .enabled_repairs()
                    .filter(|r| {
                        matches!(target, Target::All) || in_scope.contains(&r.ticket_path)
                    })
                    .collect();
                engine.apply(&snapshot, &repairs)
            }
            None => {
                let validation = self.validate_snapshot(&snapshot, target)?;
                let repairs: Vec<&Repair> = validation
                    .report
                    .repairs
                    .iter()
                    .filter(|r| r.safe && r.enabled)
                    .collect();
                engine.apply(&snapshot, &repairs)
            }
        }
    }

    /// Serialise a report in the configured `report_format`.
    pub fn render_report(&self, report: &IssuesReport) -> Result<String> {
        report.render(self.config.report_format)
    }

    /// Write a new ticket under a fresh UUIDv7 id, at
    /// `<tickets_dir>/<id>/ticket.md`. Relationship entries must name
    /// existing tickets.
    pub fn create_ticket(&self, new: NewTicket) -> Result<Ticket> {
        let root = self.config.tickets_root();
        let snapshot = self.snapshot()?;
        let graph = snapshot.graph();
        let unknown: Vec<String> = [&new.dependencies, &new.blocks, &new.related]
            .into_iter()
            .flatten()
            .filter(|entry| {
                canonicalize_uuid(entry).is_some_and(|id| !graph.contains(&id))
            })
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(invalid(format!(
                "relationships reference unknown tickets: {}",
                unknown.join(", ")
            )));
        }

        let id = new_uuid7(&self.clock);
        let ticket = new.into_ticket(id, self.clock.now(), &self.config.section_placeholder)?;
        let path = format!("{root}/{}/{TICKET_FILENAME}", ticket.id());
        if self.store.exists(&path) {
            return Err(invalid(format!("{path} already exists")));
        }
        self.store.write_atomic(&path, ticket.render()?.as_bytes())?;
        tracing::info!(path = %path, id = ticket.id(), "created ticket");
        Ok(ticket)
    }

    /// Set a ticket's `status`, keeping every other key and the body as
    /// written. With `log`, a machine-marked entry records the change.
    pub fn set_status(
        &self,
        ticket: &str,
        status: Status,
        log: Option<LogRun>,
    ) -> Result<StatusChange> {
        let snapshot = self.snapshot()?;
        let entry = self.find(&snapshot, ticket)?;
        let parsed = entry.parsed.as_ref().map_err(|failure| {
            invalid(format!("{} cannot be parsed: {}", entry.path, failure.reason))
        })?;

        let previous = parsed.field("status").and_then(Value::as_str).map(str::to_string);
        let written = previous.as_deref() != Some(status.as_str());
        if written {
            let mut front = parsed.front_matter.clone();
            front.insert(Value::from("status"), Value::from(status.as_str()));
            let text = render_ticket(&front, &parsed.body)?;
            self.store.write_atomic(&entry.path, text.as_bytes())?;
        }
        tracing::info!(
            path = %entry.path,
            previous = previous.as_deref().unwrap_or("missing"),
            status = status.as_str(),
            written,
            "status set"
        );

        let log = match log {
            Some(run) => {
                let summary = format!("Status set to {}", status.as_str());
                let record = NewLogEntry::new(ActorType::Human, STATUS_CHANGE_ACTOR, summary)
                    .with_changed_files(vec![entry.path.clone()])
                    .machine();
                Some(self.append_log_at(
                    &entry.dir,
                    record,
                    run.run_id.as_deref(),
                    run.run_started.as_deref(),
                )?)
            }
            None => None,
        };

        Ok(StatusChange {
            path: entry.path.clone(),
            previous,
            status,
            written,
            log,
        })
    }

    /// Greatest valid `ts` across a ticket's run logs. Lines that do not
    /// decode as log entries do not count.
    pub fn last_updated(&self, ticket: &str) -> Result<Option<DateTime<Utc>>> {
        let snapshot = self.snapshot()?;
        let entry = self.find(&snapshot, ticket)?;
        let mut entries: Vec<LogEntry> = Vec::new();
        for (path, bytes) in load_logs(&self.store, entry)? {
            let parsed = parse_log_file(&path, &bytes);
            entries.extend(parsed.records().filter_map(|(_, record)| {
                serde_json::from_value(serde_json::Value::Object(record.clone())).ok()
            }));
        }
        Ok(last_updated(&entries))
    }

    /// Stored and derived relationships of one ticket.
    pub fn relations(&self, ticket: &str) -> Result<TicketRelations> {
        let snapshot = self.snapshot()?;
        let entry = self.find(&snapshot, ticket)?;
        let id = entry
            .raw_id()
            .map(str::trim)
            .ok_or_else(|| invalid(format!("{} has no string id", entry.path)))?;
        Ok(snapshot.graph().relations(id))
    }

    fn find<'s>(&self, snapshot: &'s RepoSnapshot, ticket: &str) -> Result<&'s TicketEntry> {
        snapshot
            .find(ticket, self.config.tickets_root())
            .ok_or_else(|| TicketsError::TicketNotFound(ticket.to_string()))
    }

    /// Append one entry to a ticket's run log. Returns the run file path.
    pub fn append_log(
        &self,
        ticket: &str,
        entry: NewLogEntry,
        run_id: Option<&str>,
    ) -> Result<PathBuf> {
        self.append_log_at(ticket, entry, run_id, None)
            .map(|append| PathBuf::from(append.path))
    }

    /// [`Self::append_log`] with an explicit `run_started` for a new run.
    pub fn append_log_at(
        &self,
        ticket: &str,
        entry: NewLogEntry,
        run_id: Option<&str>,
        run_started: Option<&str>,
    ) -> Result<LogAppend> {
        LogWriter::new(&self.store, &self.clock, self.config.tickets_root())
            .append(ticket, entry, run_id, run_started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    #[test]
    fn exit_codes() {
        assert_eq!(ExitClass::Success.code(), 0);
        assert_eq!(ExitClass::ValidationErrors.code(), 1);
        assert_eq!(ExitClass::ToolingFailure.code(), 2);
        let err = TicketsError::TicketNotFound("x".into());
        assert_eq!(ExitClass::for_error(&err), ExitClass::ToolingFailure);
    }

    #[test]
    fn unknown_target_is_a_tooling_failure() {
        let clock = FixedClock::new(
            chrono::Utc
                .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
                .single()
                .expect("date"),
        );
        let engine = TicketEngine::new(MemoryStore::new(), clock, TicketsConfig::default());
        let result = engine.validate(&Target::Ticket("nope".into()));
        assert_eq!(ExitClass::for_validation(&result), ExitClass::ToolingFailure);
        let empty = engine.validate(&Target::All);
        assert_eq!(ExitClass::for_validation(&empty), ExitClass::Success);
    }
}
