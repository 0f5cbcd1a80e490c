//! Repo-native ticket engine
//!
//! Tickets live in the repository as `.tickets/<id>/ticket.md` (YAML front
//! matter plus a Markdown body) with append-only JSONL run logs under
//! `.tickets/<id>/logs/`. This crate parses and validates both, produces a
//! machine-readable issues report with a repair plan, applies safe or
//! human-decided repairs, and appends run-log entries so that concurrent
//! writers never collide.
//!
//! Command-line parsing and rendering live outside this crate; it exposes
//! [`TicketEngine`] for them to drive.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod authoring;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod issue;
pub mod log_writer;
pub mod model;
pub mod parser;
pub mod repair;
pub mod report;
pub mod snapshot;
pub mod store;
pub mod timestamp;
pub mod uuid7;
pub mod validate;

pub use authoring::{LogRun, NewTicket, StatusChange};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::TicketsConfig;
pub use engine::{ExitClass, TicketEngine, ValidationReport};
pub use error::{ErrorCategory, Result, TicketsError};
pub use graph::TicketRelations;
pub use issue::{Issue, IssueCode, RepairAction, Severity};
pub use log_writer::{LogAppend, NewLogEntry};
pub use model::{ActorType, LogEntry, Ticket};
pub use repair::RepairOutcome;
pub use report::{IssuesReport, Repair, ReportFormat, ValidationOutcome};
pub use snapshot::Target;
pub use store::{FsStore, MemoryStore, TicketStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `tool` field of issues reports
pub const TOOL_NAME: &str = "tickets";

/// Ticket document name inside a ticket directory
pub const TICKET_FILENAME: &str = "ticket.md";

/// Run-log directory name inside a ticket directory
pub const LOGS_DIR: &str = "logs";
