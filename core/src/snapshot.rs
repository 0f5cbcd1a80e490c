//! Repository snapshot: every ticket file read and parsed once, plus target
//! resolution (`all`, a path, a directory name, or a ticket id).

use std::collections::BTreeMap;

use serde_yaml::Value;

use crate::error::{Result, TicketsError};
use crate::graph::TicketGraph;
use crate::parser::{ParseFailure, ParsedTicket, RunFileName, parse_ticket};
use crate::store::TicketStore;
use crate::uuid7::canonicalize_uuid;
use crate::{LOGS_DIR, TICKET_FILENAME};

/// What an operation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    /// Ticket path, ticket directory, directory name or id.
    Ticket(String),
}

impl Target {
    pub fn label(&self) -> &str {
        match self {
            Self::All => "all",
            Self::Ticket(reference) => reference,
        }
    }
}

/// One ticket file as found on disk.
#[derive(Debug, Clone)]
pub struct TicketEntry {
    /// `.tickets/<dir>`
    pub dir: String,
    /// `.tickets/<dir>/ticket.md`
    pub path: String,
    pub parsed: std::result::Result<ParsedTicket, ParseFailure>,
}

impl TicketEntry {
    /// Front-matter `id` as written, when it is a string.
    pub fn raw_id(&self) -> Option<&str> {
        self.parsed
            .as_ref()
            .ok()
            .and_then(|p| p.field("id"))
            .and_then(Value::as_str)
    }

    pub fn logs_dir(&self) -> String {
        format!("{}/{LOGS_DIR}", self.dir)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepoSnapshot {
    /// Sorted by path.
    pub tickets: Vec<TicketEntry>,
}

impl RepoSnapshot {
    /// Read and parse every `<tickets_root>/<dir>/ticket.md`.
    pub fn load(store: &dyn TicketStore, tickets_root: &str) -> Result<Self> {
        let mut tickets = Vec::new();
        for entry in store.list_dir(tickets_root)? {
            if !entry.is_dir {
                continue;
            }
            let dir = format!("{tickets_root}/{}", entry.name);
            let path = format!("{dir}/{TICKET_FILENAME}");
            if !store.exists(&path) {
                continue;
            }
            let bytes = store.read(&path)?;
            let parsed = parse_ticket(&path, &bytes);
            tickets.push(TicketEntry { dir, path, parsed });
        }
        tickets.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!(tickets_root, tickets = tickets.len(), "loaded repository snapshot");
        Ok(Self { tickets })
    }

    pub fn parsed(&self) -> impl Iterator<Item = &ParsedTicket> {
        self.tickets.iter().filter_map(|t| t.parsed.as_ref().ok())
    }

    pub fn graph(&self) -> TicketGraph {
        TicketGraph::from_parsed(self.parsed())
    }

    pub fn get(&self, path: &str) -> Option<&TicketEntry> {
        self.tickets.iter().find(|t| t.path == path)
    }

    /// Tickets a target covers, in path order.
    pub fn resolve(&self, target: &Target, tickets_root: &str) -> Result<Vec<&TicketEntry>> {
        match target {
            Target::All => Ok(self.tickets.iter().collect()),
            Target::Ticket(reference) => self
                .find(reference, tickets_root)
                .map(|entry| vec![entry])
                .ok_or_else(|| TicketsError::TicketNotFound(reference.clone())),
        }
    }

    /// Look a ticket up by path, directory, directory name, then id.
    pub fn find(&self, reference: &str, tickets_root: &str) -> Option<&TicketEntry> {
        let cleaned = reference
            .trim()
            .trim_start_matches("./")
            .trim_end_matches('/');
        if cleaned.is_empty() {
            return None;
        }
        let by_location = self.tickets.iter().find(|t| {
            t.path == cleaned || t.dir == cleaned || t.dir == format!("{tickets_root}/{cleaned}")
        });
        if by_location.is_some() {
            return by_location;
        }
        let wanted = canonicalize_uuid(cleaned).unwrap_or_else(|| cleaned.to_string());
        self.tickets
            .iter()
            .find(|t| t.raw_id().is_some_and(|id| id.trim() == wanted))
    }
}

/// Every `*.jsonl` file under a ticket's `logs/` directory.
pub fn load_logs(
    store: &dyn TicketStore,
    entry: &TicketEntry,
) -> Result<BTreeMap<String, Vec<u8>>> {
    let logs_dir = entry.logs_dir();
    let mut logs = BTreeMap::new();
    for file in store.list_dir(&logs_dir)? {
        if file.is_dir || !file.name.ends_with(RunFileName::EXTENSION) {
            continue;
        }
        let path = format!("{logs_dir}/{}", file.name);
        let bytes = store.read(&path)?;
        logs.insert(path, bytes);
    }
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    const ID: &str = "0190f5a2-7c3b-7d4e-8f00-112233445566";

    fn store() -> MemoryStore {
        MemoryStore::with_files([
            (format!(".tickets/{ID}/ticket.md"), format!("---\nid: {ID}\n---\n# Ticket\n")),
            (".tickets/named/ticket.md".to_string(), "no front matter".to_string()),
            (".tickets/named/logs/20260101T000000.000Z-r.jsonl".to_string(), "{}\n".to_string()),
            (".tickets/named/logs/readme.txt".to_string(), "x".to_string()),
            (".tickets/orphan/logs/a.jsonl".to_string(), "{}\n".to_string()),
            (".tickets/config.toml".to_string(), String::new()),
        ])
    }

    #[test]
    fn loads_every_ticket_directory_with_a_ticket_file() {
        let snapshot = RepoSnapshot::load(&store(), ".tickets").expect("load");
        let paths: Vec<_> = snapshot.tickets.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                ".tickets/0190f5a2-7c3b-7d4e-8f00-112233445566/ticket.md",
                ".tickets/named/ticket.md",
            ]
        );
        assert!(snapshot.tickets[1].parsed.is_err());
        assert_eq!(snapshot.graph().len(), 1);
    }

    #[test]
    fn resolves_by_path_dir_name_and_id() {
        let snapshot = RepoSnapshot::load(&store(), ".tickets").expect("load");
        for reference in [
            ".tickets/named/ticket.md",
            "./.tickets/named/",
            "named",
        ] {
            let found = snapshot.find(reference, ".tickets").map(|t| t.path.as_str());
            assert_eq!(found, Some(".tickets/named/ticket.md"), "{reference}");
        }
        let by_id = snapshot.find(&ID.to_uppercase(), ".tickets").map(|t| t.dir.as_str());
        assert_eq!(by_id, Some(".tickets/0190f5a2-7c3b-7d4e-8f00-112233445566"));
        let err = snapshot
            .resolve(&Target::Ticket("missing".into()), ".tickets")
            .expect_err("missing");
        assert!(err.is_not_found());
    }

    #[test]
    fn only_jsonl_files_are_logs() {
        let store = store();
        let snapshot = RepoSnapshot::load(&store, ".tickets").expect("load");
        let logs = load_logs(&store, &snapshot.tickets[1]).expect("logs");
        assert_eq!(
            logs.keys().collect::<Vec<_>>(),
            vec![".tickets/named/logs/20260101T000000.000Z-r.jsonl"]
        );
    }
}
