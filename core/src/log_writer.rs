//! Append-only run logs.
//!
//! One file per (ticket, run): `logs/<run_started-basic>-<run_id>.jsonl`.
//! Writers that use distinct run ids never touch the same file, which is
//! what lets concurrent agents and diverging branches log without
//! coordination. Existing bytes are never rewritten.

use serde_json::{Map, Value};

use crate::clock::Clock;
use crate::error::{Result, TicketsError};
use crate::model::{ActorType, LogChanges, LogEntry, LogVerification, MACHINE_WRITER};
use crate::parser::{RunFileName, is_valid_run_id, parse_log_file};
use crate::snapshot::RepoSnapshot;
use crate::store::TicketStore;
use crate::timestamp::{format_basic, format_extended, parse_timestamp, same_instant, to_millis};
use crate::uuid7::new_uuid7;
use crate::validate::entry_rule_failures;
use crate::{LOGS_DIR, TICKET_FILENAME};

/// Caller-supplied content of a log entry. Timestamps are filled in by the
/// writer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub actor_type: ActorType,
    pub actor_id: String,
    pub summary: String,
    pub changes: Option<LogChanges>,
    pub verification: Option<LogVerification>,
    pub created_from: Option<String>,
    pub tickets_created: Vec<String>,
    pub context_carried_over: Vec<String>,
    pub decisions: Vec<String>,
    pub next_steps: Vec<String>,
    pub blockers: Vec<String>,
    /// Mark as written by this tool; such entries must satisfy the strict
    /// schema.
    pub machine: bool,
    pub extra: Map<String, Value>,
}

impl NewLogEntry {
    pub fn new(
        actor_type: ActorType,
        actor_id: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            summary: summary.into(),
            changes: None,
            verification: None,
            created_from: None,
            tickets_created: Vec::new(),
            context_carried_over: Vec::new(),
            decisions: Vec::new(),
            next_steps: Vec::new(),
            blockers: Vec::new(),
            machine: false,
            extra: Map::new(),
        }
    }

    pub fn machine(mut self) -> Self {
        self.machine = true;
        self
    }

    pub fn with_changed_files(mut self, files: Vec<String>) -> Self {
        self.changes = Some(LogChanges {
            files,
            extra: Map::new(),
        });
        self
    }

    pub fn with_verification(mut self, commands: Vec<String>, results: Option<String>) -> Self {
        self.verification = Some(LogVerification { commands, results });
        self
    }

    fn into_entry(self, ts: String, run_started: String) -> LogEntry {
        LogEntry {
            ts,
            run_started,
            actor_type: self.actor_type,
            actor_id: self.actor_id,
            summary: self.summary,
            changes: self.changes,
            verification: self.verification,
            created_from: self.created_from,
            tickets_created: self.tickets_created,
            context_carried_over: self.context_carried_over,
            decisions: self.decisions,
            next_steps: self.next_steps,
            blockers: self.blockers,
            written_by: self.machine.then(|| MACHINE_WRITER.to_string()),
            machine: None,
            extra: self.extra,
        }
    }
}

/// Where an entry landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogAppend {
    /// Repository-relative path of the run file.
    pub path: String,
    pub run_id: String,
    /// Basic-form `run_started` shared by every entry of the file.
    pub run_started: String,
    /// The run file did not exist before this append.
    pub created: bool,
}

pub struct LogWriter<'a> {
    store: &'a dyn TicketStore,
    clock: &'a dyn Clock,
    tickets_root: &'a str,
}

impl<'a> LogWriter<'a> {
    pub fn new(store: &'a dyn TicketStore, clock: &'a dyn Clock, tickets_root: &'a str) -> Self {
        Self {
            store,
            clock,
            tickets_root,
        }
    }

    /// Append one entry to the ticket's run file for `run_id`.
    ///
    /// Without `run_id` a fresh UUIDv7 starts a new run. An existing run
    /// file fixes `run_started`; a conflicting `run_started`, or existing
    /// entries that disagree with the file name, are refused.
    pub fn append(
        &self,
        ticket_ref: &str,
        entry: NewLogEntry,
        run_id: Option<&str>,
        run_started: Option<&str>,
    ) -> Result<LogAppend> {
        let ticket_dir = self.resolve_ticket_dir(ticket_ref)?;
        let run_id = match run_id {
            Some(id) if is_valid_run_id(id) => id.to_string(),
            Some(id) => return Err(TicketsError::InvalidRunId(id.to_string())),
            None => new_uuid7(self.clock),
        };
        let logs_dir = format!("{ticket_dir}/{LOGS_DIR}");

        let (path, run_started, created) = match self.find_run_file(&logs_dir, &run_id)? {
            Some(name) => {
                let path = format!("{logs_dir}/{}", name.file_name());
                if let Some(requested) = run_started
                    && !same_instant(requested, &name.run_started)
                {
                    return Err(TicketsError::RunStartedConflict {
                        run_id,
                        path: path.into(),
                        expected: name.run_started,
                        found: requested.to_string(),
                    });
                }
                self.check_existing_entries(&path, &run_id, &name)?;
                (path, name.run_started, false)
            }
            None => {
                let started = match run_started {
                    Some(raw) => parse_timestamp(raw).ok_or_else(|| {
                        TicketsError::InvalidLogEntry(format!(
                            "run_started '{raw}' is not an ISO-8601 UTC timestamp"
                        ))
                    })?,
                    None => self.clock.now(),
                };
                let name = RunFileName {
                    run_started: format_basic(started),
                    run_id: run_id.clone(),
                };
                (format!("{logs_dir}/{}", name.file_name()), name.run_started, true)
            }
        };

        let machine = entry.machine;
        let ts = format_extended(to_millis(self.clock.now()));
        let record = match serde_json::to_value(entry.into_entry(ts, run_started.clone()))? {
            Value::Object(map) => map,
            _ => return Err(TicketsError::InvalidLogEntry("entry is not an object".to_string())),
        };
        let failures = entry_rule_failures(&record);
        if !failures.is_empty() {
            let reasons: Vec<String> = failures.iter().map(|f| f.message.clone()).collect();
            if machine {
                return Err(TicketsError::InvalidLogEntry(reasons.join("; ")));
            }
            tracing::warn!(
                path = %path,
                problems = %reasons.join("; "),
                "appending log entry with schema problems"
            );
        }

        let line = serde_json::to_string(&record)?;
        self.store.append_line(&path, &line)?;
        tracing::info!(path = %path, run_id = %run_id, created, "appended log entry");

        Ok(LogAppend {
            path,
            run_id,
            run_started,
            created,
        })
    }

    /// Ticket directory for a path, directory, directory name or id. The
    /// result is always a direct child of the tickets root.
    fn resolve_ticket_dir(&self, ticket_ref: &str) -> Result<String> {
        let cleaned = ticket_ref
            .trim()
            .trim_start_matches("./")
            .trim_end_matches('/');
        let escapes = cleaned.starts_with('/')
            || cleaned.split(['/', '\\']).any(|part| part == ".." || part == ".");
        if cleaned.is_empty() || escapes {
            return Err(TicketsError::TicketNotFound(ticket_ref.to_string()));
        }

        let root = self.tickets_root;
        let is_ticket_dir = |dir: &str| {
            dir.strip_prefix(root)
                .and_then(|rest| rest.strip_prefix('/'))
                .is_some_and(|name| !name.is_empty() && !name.contains('/'))
                && self.store.exists(&format!("{dir}/{TICKET_FILENAME}"))
        };
        let by_location = [
            cleaned.strip_suffix(&format!("/{TICKET_FILENAME}")).map(str::to_string),
            Some(cleaned.to_string()),
            Some(format!("{root}/{cleaned}")),
        ];
        let found = by_location
            .into_iter()
            .flatten()
            .find(|dir| is_ticket_dir(dir.as_str()));
        if let Some(dir) = found {
            return Ok(dir);
        }

        let snapshot = RepoSnapshot::load(self.store, root)?;
        snapshot
            .find(cleaned, root)
            .map(|entry| entry.dir.clone())
            .ok_or_else(|| TicketsError::TicketNotFound(ticket_ref.to_string()))
    }

    fn find_run_file(&self, logs_dir: &str, run_id: &str) -> Result<Option<RunFileName>> {
        let mut matches: Vec<RunFileName> = self
            .store
            .list_dir(logs_dir)?
            .into_iter()
            .filter(|e| !e.is_dir)
            .filter_map(|e| RunFileName::parse(&e.name))
            .filter(|name| name.run_id == run_id)
            .collect();
        if matches.len() > 1 {
            tracing::warn!(
                logs_dir,
                run_id,
                files = matches.len(),
                "several files for one run id, using the earliest"
            );
        }
        matches.sort_by(|a, b| a.run_started.cmp(&b.run_started));
        Ok(matches.into_iter().next())
    }

    fn check_existing_entries(&self, path: &str, run_id: &str, name: &RunFileName) -> Result<()> {
        let parsed = parse_log_file(path, &self.store.read(path)?);
        for (_, record) in parsed.records() {
            let Some(found) = record.get("run_started").and_then(Value::as_str) else {
                continue;
            };
            if !same_instant(found, &name.run_started) {
                return Err(TicketsError::RunStartedConflict {
                    run_id: run_id.to_string(),
                    path: path.into(),
                    expected: name.run_started.clone(),
                    found: found.to_string(),
                });
            }
        }
        Ok(())
    }
}
