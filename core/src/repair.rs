//! Repair engine.
//!
//! Two phases. First every enabled repair is resolved into a typed [`Step`];
//! a `null` decision or malformed parameter fails the whole invocation
//! before anything is touched. Then the steps run against in-memory copies
//! of every ticket, and the changed files are committed in one staged
//! transaction. Run logs are never rewritten.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as Json;
use serde_yaml::{Mapping, Value};

use crate::clock::Clock;
use crate::config::TicketsConfig;
use crate::error::{Result, TicketsError};
use crate::issue::RepairAction;
use crate::log_writer::{LogWriter, NewLogEntry};
use crate::model::{ActorType, REQUIRED_SECTIONS, RelationKind, Vocabulary};
use crate::parser::{body_headings, find_section, render_ticket};
use crate::report::Repair;
use crate::snapshot::RepoSnapshot;
use crate::store::TicketStore;
use crate::timestamp::{format_extended, parse_timestamp, to_millis};
use crate::uuid7::{canonicalize_uuid, is_uuid7, new_uuid7};

/// What a repair invocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairOutcome {
    pub applied: Vec<String>,
    /// Repairs that could not run, with the reason. Others still applied.
    pub failed: Vec<(String, String)>,
    /// Ticket files rewritten.
    pub written: Vec<String>,
    /// Run-log files that received a repair summary entry.
    pub logs: Vec<String>,
}

impl RepairOutcome {
    pub fn is_noop(&self) -> bool {
        self.written.is_empty()
    }
}

/// A repair with every parameter decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    AddSection { heading: String },
    NormalizeEnum { field: String, value: String },
    NormalizeCreatedAt { value: String },
    NormalizeRelationshipList { field: String, value: Vec<String> },
    RemoveRelationshipEntries { field: String, entries: Vec<String> },
    RemoveFrontMatterField { field: String },
    SetFrontMatterField { field: String, value: Value },
    ReplaceId {
        old_id: Option<String>,
        new_id: String,
        update_references: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRepair {
    pub id: String,
    pub ticket_path: String,
    pub step: Step,
}

// ============================================================================
// Resolution
// ============================================================================

struct Params<'r> {
    repair: &'r Repair,
}

impl Params<'_> {
    fn precondition(&self, param: &str, reason: impl Into<String>) -> TicketsError {
        TicketsError::RepairPrecondition {
            repair_id: self.repair.id.clone(),
            param: param.to_string(),
            reason: reason.into(),
        }
    }

    fn present(&self, param: &str) -> Result<&Json> {
        match self.repair.params.get(param) {
            None => Err(self.precondition(param, "is missing")),
            Some(Json::Null) => Err(self.precondition(param, "is null; a decision is required")),
            Some(value) => Ok(value),
        }
    }

    fn string(&self, param: &str) -> Result<String> {
        self.present(param)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.precondition(param, "must be a string"))
    }

    fn optional_string(&self, param: &str) -> Result<Option<String>> {
        match self.repair.params.get(param) {
            None | Some(Json::Null) => Ok(None),
            Some(Json::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.precondition(param, "must be a string or null")),
        }
    }

    fn bool(&self, param: &str) -> Result<bool> {
        self.present(param)?
            .as_bool()
            .ok_or_else(|| self.precondition(param, "must be true or false"))
    }

    fn string_list(&self, param: &str) -> Result<Vec<String>> {
        let value = self.present(param)?;
        let items = value
            .as_array()
            .ok_or_else(|| self.precondition(param, "must be a list of strings"))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.precondition(param, "must be a list of strings"))
            })
            .collect()
    }

    fn field(&self) -> Result<String> {
        let field = self.string("field")?;
        let depth = field.split('.').count();
        if field.is_empty() || depth > 2 || field.split('.').any(str::is_empty) {
            return Err(self.precondition("field", "must be a key or a 'parent.child' path"));
        }
        Ok(field)
    }
}

/// Turn one plan entry into a step. Generates the new id for
/// `generate_uuidv7: true`.
pub fn resolve(repair: &Repair, clock: &dyn Clock) -> Result<ResolvedRepair> {
    let params = Params { repair };
    let step = match repair.action {
        RepairAction::AddSection => Step::AddSection {
            heading: params.string("heading")?,
        },
        RepairAction::NormalizeEnum => Step::NormalizeEnum {
            field: params.field()?,
            value: params.string("value")?,
        },
        RepairAction::NormalizeCreatedAt => {
            let raw = params.string("value")?;
            let parsed = parse_timestamp(&raw)
                .ok_or_else(|| params.precondition("value", "must be an ISO-8601 UTC timestamp"))?;
            Step::NormalizeCreatedAt {
                value: format_extended(parsed),
            }
        }
        RepairAction::NormalizeRelationshipList => Step::NormalizeRelationshipList {
            field: relation_field(&params)?,
            value: params.string_list("value")?,
        },
        RepairAction::RemoveRelationshipEntries => Step::RemoveRelationshipEntries {
            field: relation_field(&params)?,
            entries: params.string_list("entries")?,
        },
        RepairAction::RemoveFrontMatterField => Step::RemoveFrontMatterField {
            field: params.field()?,
        },
        RepairAction::SetFrontMatterField => {
            let field = params.field()?;
            let value = serde_yaml::to_value(params.present("value")?)
                .map_err(|e| params.precondition("value", e.to_string()))?;
            Step::SetFrontMatterField { field, value }
        }
        RepairAction::ReplaceId => {
            let generate = match repair.params.get("generate_uuidv7") {
                None | Some(Json::Null) => false,
                Some(_) => params.bool("generate_uuidv7")?,
            };
            let new_id = match params.optional_string("value")? {
                Some(value) if is_uuid7(&value) => value,
                Some(_) => {
                    return Err(
                        params.precondition("value", "must be a lowercase canonical UUIDv7")
                    );
                }
                None if generate => new_uuid7(clock),
                None => {
                    return Err(params.precondition(
                        "value",
                        "is null; set a UUIDv7 or generate_uuidv7: true",
                    ));
                }
            };
            Step::ReplaceId {
                old_id: params.optional_string("old_id")?,
                new_id,
                update_references: params.bool("update_references")?,
            }
        }
    };
    Ok(ResolvedRepair {
        id: repair.id.clone(),
        ticket_path: repair.ticket_path.clone(),
        step,
    })
}

fn relation_field(params: &Params<'_>) -> Result<String> {
    let field = params.string("field")?;
    if RelationKind::parse_exact(&field).is_none() {
        return Err(params.precondition(
            "field",
            format!("must be one of {}", RelationKind::choices()),
        ));
    }
    Ok(field)
}

// ============================================================================
// Application
// ============================================================================

/// In-memory working copy of one ticket.
#[derive(Debug, Clone)]
struct Doc {
    dir: String,
    front: Mapping,
    body: String,
    loaded: (Mapping, String),
    repairs: Vec<String>,
}

impl Doc {
    /// Rendered text when an edit changed the content. Untouched tickets are
    /// never rewritten, even if rendering would reformat them.
    fn changed(&self) -> Result<Option<String>> {
        if self.front == self.loaded.0 && self.body == self.loaded.1 {
            return Ok(None);
        }
        Ok(Some(render_ticket(&self.front, &self.body)?))
    }
}

pub struct RepairEngine<'a> {
    store: &'a dyn TicketStore,
    clock: &'a dyn Clock,
    config: &'a TicketsConfig,
}

impl<'a> RepairEngine<'a> {
    pub fn new(
        store: &'a dyn TicketStore,
        clock: &'a dyn Clock,
        config: &'a TicketsConfig,
    ) -> Self {
        Self { store, clock, config }
    }

    /// Apply `repairs` in order. Preconditions are checked for every repair
    /// before any file is written.
    pub fn apply(&self, snapshot: &RepoSnapshot, repairs: &[&Repair]) -> Result<RepairOutcome> {
        let resolved = repairs
            .iter()
            .map(|repair| resolve(repair, self.clock))
            .collect::<Result<Vec<_>>>()?;

        let mut docs: BTreeMap<String, Doc> = snapshot
            .tickets
            .iter()
            .filter_map(|entry| {
                let parsed = entry.parsed.as_ref().ok()?;
                Some((
                    entry.path.clone(),
                    Doc {
                        dir: entry.dir.clone(),
                        front: parsed.front_matter.clone(),
                        body: parsed.body.clone(),
                        loaded: (parsed.front_matter.clone(), parsed.body.clone()),
                        repairs: Vec::new(),
                    },
                ))
            })
            .collect();

        let mut outcome = RepairOutcome::default();
        for repair in &resolved {
            match self.apply_one(snapshot, &mut docs, repair) {
                Ok(()) => {
                    if let Some(doc) = docs.get_mut(&repair.ticket_path) {
                        doc.repairs.push(repair.id.clone());
                    }
                    outcome.applied.push(repair.id.clone());
                }
                Err(reason) => {
                    tracing::warn!(
                        repair_id = %repair.id,
                        ticket = %repair.ticket_path,
                        %reason,
                        "repair skipped"
                    );
                    outcome.failed.push((repair.id.clone(), reason));
                }
            }
        }

        let mut files = BTreeMap::new();
        for (path, doc) in &docs {
            if let Some(text) = doc.changed()? {
                files.insert(path.clone(), text.into_bytes());
            }
        }
        if !files.is_empty() {
            self.store.commit(&files)?;
        }
        outcome.written = files.keys().cloned().collect();
        tracing::info!(
            applied = outcome.applied.len(),
            failed = outcome.failed.len(),
            written = outcome.written.len(),
            "repairs applied"
        );

        if self.config.log_repairs && !outcome.written.is_empty() {
            outcome.logs = self.log_repairs(&docs, &outcome.written);
        }
        Ok(outcome)
    }

    fn apply_one(
        &self,
        snapshot: &RepoSnapshot,
        docs: &mut BTreeMap<String, Doc>,
        repair: &ResolvedRepair,
    ) -> std::result::Result<(), String> {
        let path = repair.ticket_path.as_str();
        if let Step::ReplaceId {
            old_id: Some(old),
            update_references: true,
            ..
        } = &repair.step
            && let Some(other) = other_owner(docs, path, old)
        {
            return Err(format!(
                "id {old} is also claimed by {other}; references cannot be moved to one owner"
            ));
        }
        let Some(doc) = docs.get_mut(path) else {
            return Err(match snapshot.get(path).map(|entry| &entry.parsed) {
                Some(Err(failure)) => format!("ticket {path} cannot be parsed: {}", failure.reason),
                _ => format!("ticket {path} not found"),
            });
        };

        match &repair.step {
            Step::AddSection { heading } => {
                doc.body = insert_section(&doc.body, heading, &self.config.section_placeholder);
            }
            Step::NormalizeEnum { field, value } => {
                set_field(&mut doc.front, field, Value::from(value.as_str()));
            }
            Step::NormalizeCreatedAt { value } => {
                set_field(&mut doc.front, "created_at", Value::from(value.as_str()));
            }
            Step::NormalizeRelationshipList { field, value } => {
                write_relations(&mut doc.front, field, value.clone());
            }
            Step::RemoveRelationshipEntries { field, entries } => {
                let drop: BTreeSet<String> = entries.iter().map(|e| canonical_ref(e)).collect();
                if let Some(current) = relation_entries(doc.front.get(field.as_str())) {
                    let kept = current
                        .into_iter()
                        .filter(|e| !drop.contains(&canonical_ref(e)))
                        .collect();
                    write_relations(&mut doc.front, field, kept);
                }
            }
            Step::RemoveFrontMatterField { field } => remove_field(&mut doc.front, field),
            Step::SetFrontMatterField { field, value } => {
                set_field(&mut doc.front, field, value.clone());
            }
            Step::ReplaceId {
                old_id,
                new_id,
                update_references,
            } => {
                let current = doc.front.get("id").and_then(Value::as_str).map(str::to_string);
                if let Some(old) = old_id
                    && current.as_deref() != Some(old.as_str())
                {
                    return Err(format!(
                        "ticket {path} id is now {}, not {old}",
                        current.as_deref().unwrap_or("missing")
                    ));
                }
                set_field(&mut doc.front, "id", Value::from(new_id.as_str()));
                if *update_references && let Some(old) = old_id {
                    let rewritten = rewrite_references(docs, path, old, new_id, &repair.id);
                    tracing::info!(
                        old_id = %old,
                        new_id = %new_id,
                        tickets = rewritten,
                        "rewrote references"
                    );
                }
            }
        }
        Ok(())
    }

    /// One machine-marked entry per rewritten ticket, all under one run.
    fn log_repairs(&self, docs: &BTreeMap<String, Doc>, written: &[String]) -> Vec<String> {
        let run_id = new_uuid7(self.clock);
        let run_started = format_extended(to_millis(self.clock.now()));
        let writer = LogWriter::new(self.store, self.clock, self.config.tickets_root());
        let mut logs = Vec::new();
        for path in written {
            let Some(doc) = docs.get(path) else {
                continue;
            };
            if !doc.front.get("id").and_then(Value::as_str).is_some_and(is_uuid7) {
                continue;
            }
            let summary = format!("Applied repairs {}", doc.repairs.join(", "));
            let actor = self.config.repair_actor_id.clone();
            let entry = NewLogEntry::new(ActorType::Agent, actor, summary)
                .with_changed_files(vec![path.clone()])
                .machine();
            let run = Some(run_id.as_str());
            match writer.append(&doc.dir, entry, run, Some(run_started.as_str())) {
                Ok(append) => logs.push(append.path),
                Err(e) => tracing::warn!(ticket = %path, error = %e, "could not log repair"),
            }
        }
        logs
    }
}

// ============================================================================
// Document edits
// ============================================================================

/// Insert `heading` with placeholder text, before the next required section
/// already present so the canonical order holds; append otherwise. A body
/// that already has the section is returned unchanged.
pub fn insert_section(body: &str, heading: &str, placeholder: &str) -> String {
    let headings = body_headings(body);
    if find_section(&headings, heading).is_some() {
        return body.to_string();
    }
    let mut block = format!("{heading}\n\n");
    if !placeholder.is_empty() {
        block.push_str(placeholder);
        block.push_str("\n\n");
    }

    let before_line = REQUIRED_SECTIONS
        .iter()
        .skip_while(|s| **s != heading)
        .skip(1)
        .find_map(|later| find_section(&headings, later))
        .map(|h| h.line - 1);

    match before_line {
        Some(target) => {
            let mut out = String::with_capacity(body.len() + block.len());
            for (idx, line) in body.split_inclusive('\n').enumerate() {
                if idx == target {
                    out.push_str(&block);
                }
                out.push_str(line);
            }
            out
        }
        None => {
            let mut out = body.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            if !out.is_empty() && !out.ends_with("\n\n") {
                out.push('\n');
            }
            out.push_str(block.trim_end_matches('\n'));
            out.push('\n');
            out
        }
    }
}

fn set_field(front: &mut Mapping, field: &str, value: Value) {
    match field.split_once('.') {
        None => {
            front.insert(Value::from(field), value);
        }
        Some((parent, child)) => {
            if !matches!(front.get(parent), Some(Value::Mapping(_))) {
                front.insert(Value::from(parent), Value::Mapping(Mapping::new()));
            }
            if let Some(Value::Mapping(nested)) = front.get_mut(parent) {
                nested.insert(Value::from(child), value);
            }
        }
    }
}

fn remove_field(front: &mut Mapping, field: &str) {
    match field.split_once('.') {
        None => {
            front.shift_remove(field);
        }
        Some((parent, child)) => {
            if let Some(Value::Mapping(nested)) = front.get_mut(parent) {
                nested.shift_remove(child);
            }
        }
    }
}

/// A relationship value as strings: a bare string or a list of strings.
fn relation_entries(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Sequence(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

/// Store a relationship list; an empty list removes the key.
fn write_relations(front: &mut Mapping, field: &str, entries: Vec<String>) {
    if entries.is_empty() {
        front.shift_remove(field);
        return;
    }
    let items = entries.into_iter().map(Value::String).collect();
    front.insert(Value::from(field), Value::Sequence(items));
}

fn canonical_ref(entry: &str) -> String {
    canonicalize_uuid(entry).unwrap_or_else(|| entry.trim().to_string())
}

/// Another working copy whose id is still `id`, other than `skip`.
fn other_owner<'d>(docs: &'d BTreeMap<String, Doc>, skip: &str, id: &str) -> Option<&'d str> {
    let wanted = canonical_ref(id);
    docs.iter()
        .filter(|(path, _)| path.as_str() != skip)
        .find(|(_, doc)| {
            doc.front
                .get("id")
                .and_then(Value::as_str)
                .is_some_and(|current| canonical_ref(current) == wanted)
        })
        .map(|(path, _)| path.as_str())
}

/// Point every other ticket's relationship entries for `old` at `new`,
/// crediting `repair_id` on each ticket changed. Returns how many changed.
fn rewrite_references(
    docs: &mut BTreeMap<String, Doc>,
    skip: &str,
    old: &str,
    new: &str,
    repair_id: &str,
) -> usize {
    let old = canonical_ref(old);
    let mut changed = 0;
    for (path, doc) in docs.iter_mut() {
        if path == skip {
            continue;
        }
        let mut touched = false;
        for kind in RelationKind::ALL {
            let Some(entries) = relation_entries(doc.front.get(kind.as_str())) else {
                continue;
            };
            if !entries.iter().any(|e| canonical_ref(e) == old) {
                continue;
            }
            let mut seen = BTreeSet::new();
            let rewritten = entries
                .into_iter()
                .map(|e| if canonical_ref(&e) == old { new.to_string() } else { e })
                .filter(|e| seen.insert(e.clone()))
                .collect();
            write_relations(&mut doc.front, kind.as_str(), rewritten);
            touched = true;
        }
        if touched {
            doc.repairs.push(repair_id.to_string());
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn clock() -> FixedClock {
        FixedClock::new(chrono::Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).single().expect("date"))
    }

    fn repair(action: RepairAction, params: Json) -> Repair {
        let params = match params {
            Json::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        Repair {
            id: "R0001".to_string(),
            enabled: true,
            safe: false,
            issue_ids: vec!["I0001".to_string()],
            action,
            ticket_path: ".tickets/a/ticket.md".to_string(),
            params,
        }
    }

    const SHARED: &str = "0190f5a2-7c3b-7d4e-8f00-000000000001";
    const FRESH: &str = "0190f5a2-7c3b-7d4e-8f00-000000000009";
    const CREATED: &str = "2026-01-01T00:00:00Z";

    fn ticket(id: &str, extra: &str) -> String {
        format!(
            "---\nid: {id}\ntitle: T\nstatus: todo\ncreated_at: {CREATED}\n{extra}---\n# Ticket\n"
        )
    }

    fn planned(id: &str, path: &str, action: RepairAction, params: Json) -> Repair {
        Repair {
            id: id.to_string(),
            ticket_path: path.to_string(),
            ..repair(action, params)
        }
    }

    #[test]
    fn shared_id_references_are_not_moved_to_one_owner() {
        let dependent = ticket(FRESH, &format!("dependencies:\n- {SHARED}\n"));
        let store = MemoryStore::with_files([
            (".tickets/a/ticket.md".to_string(), ticket(SHARED, "")),
            (".tickets/b/ticket.md".to_string(), ticket(SHARED, "")),
            (".tickets/c/ticket.md".to_string(), dependent.clone()),
        ]);
        let before = store.snapshot();
        let snapshot = RepoSnapshot::load(&store, ".tickets").expect("snapshot");
        let clock = clock();
        let config = TicketsConfig::default();
        let engine = RepairEngine::new(&store, &clock, &config);

        let moved = planned(
            "R0001",
            ".tickets/b/ticket.md",
            RepairAction::ReplaceId,
            serde_json::json!({
                "old_id": SHARED,
                "value": null,
                "generate_uuidv7": true,
                "update_references": true,
            }),
        );
        let outcome = engine.apply(&snapshot, &[&moved]).expect("apply");
        assert_eq!(outcome.applied, Vec::<String>::new());
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].1.contains(".tickets/a/ticket.md"), "{:?}", outcome.failed);
        assert!(outcome.is_noop());
        assert_eq!(store.snapshot(), before);

        let kept = planned(
            "R0001",
            ".tickets/b/ticket.md",
            RepairAction::ReplaceId,
            serde_json::json!({
                "old_id": SHARED,
                "value": null,
                "generate_uuidv7": true,
                "update_references": false,
            }),
        );
        let outcome = engine.apply(&snapshot, &[&kept]).expect("apply");
        assert_eq!(outcome.written, vec![".tickets/b/ticket.md".to_string()]);
        let after = store.read(".tickets/c/ticket.md").expect("read c");
        assert_eq!(String::from_utf8(after).expect("utf8"), dependent);
    }

    #[test]
    fn repair_log_names_only_applied_repairs() {
        let path = format!(".tickets/{FRESH}/ticket.md");
        let store = MemoryStore::with_files([(path.clone(), ticket(FRESH, "priority: HIGH\n"))]);
        let snapshot = RepoSnapshot::load(&store, ".tickets").expect("snapshot");
        let clock = clock();
        let config = TicketsConfig::default();
        let engine = RepairEngine::new(&store, &clock, &config);

        let normalize = planned(
            "R0001",
            &path,
            RepairAction::NormalizeEnum,
            serde_json::json!({"field": "priority", "value": "high"}),
        );
        let stale = planned(
            "R0002",
            &path,
            RepairAction::ReplaceId,
            serde_json::json!({"old_id": SHARED, "value": FRESH, "update_references": false}),
        );
        let outcome = engine.apply(&snapshot, &[&normalize, &stale]).expect("apply");
        assert_eq!(outcome.applied, vec!["R0001".to_string()]);
        assert_eq!(outcome.failed.iter().map(|f| f.0.as_str()).collect::<Vec<_>>(), vec!["R0002"]);
        assert_eq!(outcome.logs.len(), 1);

        let log = store.read(&outcome.logs[0]).expect("read log");
        let record: serde_json::Map<String, Json> = serde_json::from_slice(&log).expect("json");
        assert_eq!(record.get("summary"), Some(&Json::from("Applied repairs R0001")));
    }

    #[test]
    fn tickets_with_moved_references_log_the_repair_that_moved_them() {
        let old = "0190f5a2-7c3b-7d4e-8f00-000000000002";
        let owner = format!(".tickets/{FRESH}/ticket.md");
        let dependent = format!(".tickets/{SHARED}/ticket.md");
        let store = MemoryStore::with_files([
            (owner.clone(), ticket(old, "")),
            (dependent.clone(), ticket(SHARED, &format!("related:\n- {old}\n"))),
        ]);
        let snapshot = RepoSnapshot::load(&store, ".tickets").expect("snapshot");
        let clock = clock();
        let config = TicketsConfig::default();
        let engine = RepairEngine::new(&store, &clock, &config);

        let moved = planned(
            "R0003",
            &owner,
            RepairAction::ReplaceId,
            serde_json::json!({"old_id": old, "value": FRESH, "update_references": true}),
        );
        let outcome = engine.apply(&snapshot, &[&moved]).expect("apply");
        assert_eq!(outcome.written.len(), 2);
        assert_eq!(outcome.logs.len(), 2);
        for log in &outcome.logs {
            let text = store.read(log).expect("read log");
            let record: serde_json::Map<String, Json> =
                serde_json::from_slice(&text).expect("json");
            assert_eq!(record.get("summary"), Some(&Json::from("Applied repairs R0003")));
        }
    }

    #[test]
    fn null_decision_is_a_precondition_failure() {
        let err = resolve(
            &repair(
                RepairAction::SetFrontMatterField,
                serde_json::json!({"field": "status", "value": null}),
            ),
            &clock(),
        )
        .expect_err("null");
        assert_eq!(
            err.to_string(),
            "Repair R0001 cannot be applied: parameter 'value' is null; a decision is required"
        );
    }

    #[test]
    fn replace_id_needs_value_or_generation() {
        let base = serde_json::json!({
            "old_id": null,
            "value": null,
            "generate_uuidv7": false,
            "update_references": false,
        });
        assert!(resolve(&repair(RepairAction::ReplaceId, base), &clock()).is_err());

        let generated = serde_json::json!({
            "old_id": null,
            "value": null,
            "generate_uuidv7": true,
            "update_references": false,
        });
        let resolved =
            resolve(&repair(RepairAction::ReplaceId, generated), &clock()).expect("generate");
        match resolved.step {
            Step::ReplaceId { new_id, .. } => assert!(is_uuid7(&new_id)),
            other => panic!("unexpected step {other:?}"),
        }

        let undecided = serde_json::json!({
            "old_id": "x",
            "value": "0190f5a2-7c3b-7d4e-8f00-112233445566",
            "generate_uuidv7": false,
            "update_references": null,
        });
        let err = resolve(&repair(RepairAction::ReplaceId, undecided), &clock()).expect_err("refs");
        assert!(matches!(
            err,
            TicketsError::RepairPrecondition { ref param, .. } if param == "update_references"
        ));
    }

    #[test]
    fn relation_field_must_be_a_stored_kind() {
        let err = resolve(
            &repair(
                RepairAction::NormalizeRelationshipList,
                serde_json::json!({"field": "blocked_by", "value": []}),
            ),
            &clock(),
        )
        .expect_err("field");
        assert!(matches!(err, TicketsError::RepairPrecondition { .. }));
    }

    #[test]
    fn sections_are_inserted_in_canonical_order() {
        let body = "# Ticket\n\n## Description\nx\n\n## Verification\n- run\n";
        let out = insert_section(body, "## Acceptance Criteria", "(fill in)");
        assert_eq!(
            out,
            concat!(
                "# Ticket\n\n## Description\nx\n\n",
                "## Acceptance Criteria\n\n(fill in)\n\n",
                "## Verification\n- run\n",
            )
        );
        assert_eq!(insert_section(&out, "## Acceptance Criteria", "(fill in)"), out);
    }

    #[test]
    fn missing_trailing_section_is_appended() {
        let out = insert_section("# Ticket\ntext", "## Verification", "(fill in)");
        assert_eq!(out, "# Ticket\ntext\n\n## Verification\n\n(fill in)\n");
    }

    #[test]
    fn nested_fields_are_set_and_removed_in_place() {
        let mut front: Mapping =
            serde_yaml::from_str("id: x\nassignment:\n  mode: Mixed\ntitle: t\n").expect("yaml");
        set_field(&mut front, "assignment.mode", Value::from("mixed"));
        remove_field(&mut front, "id");
        let yaml = serde_yaml::to_string(&front).expect("yaml");
        assert_eq!(yaml, "assignment:\n  mode: mixed\ntitle: t\n");
    }
}
