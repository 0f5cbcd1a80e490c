//! Ticket relationship graph.
//!
//! Tickets are stored in an id-keyed arena; edges are adjacency maps per
//! relation kind keyed by id. Nothing holds references into other nodes,
//! so a graph is cheap to rebuild after every repair.

use std::collections::{BTreeMap, BTreeSet};

use serde_yaml::Value;

use crate::model::{RelationKind, Vocabulary};
use crate::parser::ParsedTicket;
use crate::uuid7::canonicalize_uuid;

/// Arena entry for one ticket file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketNode {
    pub id: String,
    pub path: String,
    pub title: Option<String>,
    pub status: Option<String>,
}

/// One ticket's relationships. `blocked_by` and `dependents` are computed
/// from other tickets and never stored.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TicketRelations {
    pub dependencies: BTreeSet<String>,
    pub blocks: BTreeSet<String>,
    pub related: BTreeSet<String>,
    pub blocked_by: BTreeSet<String>,
    pub dependents: BTreeSet<String>,
}

#[derive(Debug, Default, Clone)]
pub struct TicketGraph {
    /// First ticket (by path order) claiming each id.
    nodes: BTreeMap<String, TicketNode>,
    /// Every path claiming each id, sorted.
    paths_by_id: BTreeMap<String, Vec<String>>,
    edges: BTreeMap<RelationKind, BTreeMap<String, BTreeSet<String>>>,
}

impl TicketGraph {
    /// Build from parsed tickets. Tickets without a string id are left out;
    /// relationship entries are taken in canonical spelling when they are
    /// UUIDs at all.
    pub fn from_parsed<'a>(tickets: impl IntoIterator<Item = &'a ParsedTicket>) -> Self {
        let mut sorted: Vec<&ParsedTicket> = tickets.into_iter().collect();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));

        let mut graph = Self::default();
        for ticket in sorted {
            let Some(id) = ticket.field("id").and_then(Value::as_str) else {
                continue;
            };
            let id = id.trim().to_string();
            graph
                .paths_by_id
                .entry(id.clone())
                .or_default()
                .push(ticket.path.clone());
            if graph.nodes.contains_key(&id) {
                continue;
            }
            graph.nodes.insert(
                id.clone(),
                TicketNode {
                    id: id.clone(),
                    path: ticket.path.clone(),
                    title: ticket.field("title").and_then(Value::as_str).map(str::to_string),
                    status: ticket.field("status").and_then(Value::as_str).map(str::to_string),
                },
            );
            for kind in RelationKind::ALL {
                let targets = relation_targets(ticket.field(kind.as_str()));
                if !targets.is_empty() {
                    graph
                        .edges
                        .entry(*kind)
                        .or_default()
                        .insert(id.clone(), targets);
                }
            }
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&TicketNode> {
        self.nodes.get(id)
    }

    /// Path of the ticket that owns `id`.
    pub fn path_of(&self, id: &str) -> Option<&str> {
        self.nodes.get(id).map(|n| n.path.as_str())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Every path that claims `id`, in path order.
    pub fn paths_for(&self, id: &str) -> &[String] {
        self.paths_by_id.get(id).map_or(&[], Vec::as_slice)
    }

    /// True when `path` claims `id` but is not its first owner.
    pub fn is_duplicate(&self, id: &str, path: &str) -> bool {
        self.path_of(id).is_some_and(|owner| owner != path)
            && self.paths_for(id).iter().any(|p| p == path)
    }

    /// Outgoing edges of one kind.
    pub fn targets(&self, kind: RelationKind, id: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(&kind)
            .and_then(|by_source| by_source.get(id))
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Derived `blocked_by`: tickets whose `blocks` lists `id`.
    pub fn blocked_by(&self, id: &str) -> BTreeSet<String> {
        self.incoming(RelationKind::Blocks, id)
    }

    /// Tickets whose `dependencies` lists `id`.
    pub fn dependents(&self, id: &str) -> BTreeSet<String> {
        self.incoming(RelationKind::Dependencies, id)
    }

    /// Stored and derived relationships of `id`.
    pub fn relations(&self, id: &str) -> TicketRelations {
        let outgoing = |kind: RelationKind| -> BTreeSet<String> {
            self.targets(kind, id).map(str::to_string).collect()
        };
        TicketRelations {
            dependencies: outgoing(RelationKind::Dependencies),
            blocks: outgoing(RelationKind::Blocks),
            related: outgoing(RelationKind::Related),
            blocked_by: self.blocked_by(id),
            dependents: self.dependents(id),
        }
    }

    fn incoming(&self, kind: RelationKind, id: &str) -> BTreeSet<String> {
        self.edges
            .get(&kind)
            .map(|by_source| {
                by_source
                    .iter()
                    .filter(|(_, targets)| targets.contains(id))
                    .map(|(source, _)| source.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn relation_targets(value: Option<&Value>) -> BTreeSet<String> {
    let entries: Vec<&str> = match value {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Sequence(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    entries
        .into_iter()
        .filter_map(|raw| {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(canonicalize_uuid(trimmed).unwrap_or_else(|| trimmed.to_string()))
            }
        })
        .collect()
}
