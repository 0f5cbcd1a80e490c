//! Issues report: the machine-readable output of a validation pass and the
//! repair plan a human can edit and replay.
//!
//! Ordering is fully deterministic so two runs over unchanged content with
//! the same clock produce byte-identical reports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{Result, TicketsError};
use crate::issue::{Issue, RepairAction, RepairProposal, Severity, is_decision_param};

pub const SCHEMA_VERSION: u32 = 1;

/// One entry of the repair plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Repair {
    pub id: String,
    pub enabled: bool,
    pub safe: bool,
    pub issue_ids: Vec<String>,
    pub action: RepairAction,
    pub ticket_path: String,
    #[serde(default)]
    pub params: BTreeMap<String, Json>,
}

impl Repair {
    /// Decision parameters still set to `null`.
    pub fn unresolved_params(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|(key, value)| value.is_null() && is_decision_param(self.action, key))
            .map(|(key, _)| key.as_str())
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssuesReport {
    pub schema_version: u32,
    #[serde(with = "crate::timestamp::extended")]
    pub generated_at: DateTime<Utc>,
    pub tool: String,
    pub targets: Vec<String>,
    pub issues: Vec<Issue>,
    pub repairs: Vec<Repair>,
}

/// Serialisation format of a report.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Yaml,
    Json,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = TicketsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            other => Err(TicketsError::Config(format!(
                "unknown report format '{other}' (expected yaml or json)"
            ))),
        }
    }
}

/// Pass/fail classification of a report.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationOutcome {
    /// No errors (warnings allowed).
    Clean,
    Errors,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReportSummary {
    pub errors: usize,
    pub warnings: usize,
    pub repairs: usize,
    pub safe_repairs: usize,
}

impl IssuesReport {
    /// Sort issues, number them, and derive the repair plan.
    ///
    /// Identical proposals for the same ticket collapse into one repair that
    /// lists every issue it addresses.
    pub fn build(
        generated_at: DateTime<Utc>,
        mut targets: Vec<String>,
        mut issues: Vec<Issue>,
    ) -> Self {
        targets.sort();
        targets.dedup();
        issues.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

        let mut repairs: Vec<Repair> = Vec::new();
        for (idx, issue) in issues.iter_mut().enumerate() {
            issue.id = format!("I{:04}", idx + 1);
            let Some(proposal) = issue.proposal.as_ref() else {
                continue;
            };
            let existing = repairs.iter_mut().find(|r| {
                r.ticket_path == issue.ticket_path
                    && r.action == proposal.action
                    && r.params == proposal.params
            });
            match existing {
                Some(repair) => repair.issue_ids.push(issue.id.clone()),
                None => repairs.push(Repair {
                    id: format!("R{:04}", repairs.len() + 1),
                    enabled: default_enabled(proposal),
                    safe: proposal.safe,
                    issue_ids: vec![issue.id.clone()],
                    action: proposal.action,
                    ticket_path: issue.ticket_path.clone(),
                    params: proposal.params.clone(),
                }),
            }
        }

        Self {
            schema_version: SCHEMA_VERSION,
            generated_at: crate::timestamp::to_millis(generated_at),
            tool: crate::TOOL_NAME.to_string(),
            targets,
            issues,
            repairs,
        }
    }

    pub fn render(&self, format: ReportFormat) -> Result<String> {
        Ok(match format {
            ReportFormat::Yaml => serde_yaml::to_string(self)?,
            ReportFormat::Json => {
                let mut out = serde_json::to_string_pretty(self)?;
                out.push('\n');
                out
            }
        })
    }

    /// Read a report back in either format (YAML is a superset of JSON).
    pub fn parse(text: &str) -> Result<Self> {
        let report: Self = serde_yaml::from_str(text)
            .map_err(|e| TicketsError::PlanInvalid(e.to_string()))?;
        report.check()?;
        Ok(report)
    }

    fn check(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(TicketsError::PlanInvalid(format!(
                "unsupported schema_version {} (expected {SCHEMA_VERSION})",
                self.schema_version
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for repair in &self.repairs {
            if !seen.insert(repair.id.as_str()) {
                return Err(TicketsError::PlanInvalid(format!(
                    "duplicate repair id {}",
                    repair.id
                )));
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            errors: self.count(Severity::Error),
            warnings: self.count(Severity::Warning),
            repairs: self.repairs.len(),
            safe_repairs: self.repairs.iter().filter(|r| r.safe).count(),
        }
    }

    pub fn outcome(&self) -> ValidationOutcome {
        if self.count(Severity::Error) > 0 {
            ValidationOutcome::Errors
        } else {
            ValidationOutcome::Clean
        }
    }

    pub fn enabled_repairs(&self) -> impl Iterator<Item = &Repair> {
        self.repairs.iter().filter(|r| r.enabled)
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

fn default_enabled(proposal: &RepairProposal) -> bool {
    proposal.safe && proposal.is_resolved()
}

type SortKey<'a> = (
    &'a str,
    &'static str,
    Option<&'a str>,
    Option<&'a str>,
    Option<usize>,
    &'a str,
);

fn sort_key(issue: &Issue) -> SortKey<'_> {
    (
        issue.ticket_path.as_str(),
        issue.code.as_str(),
        issue.field.as_deref(),
        issue.log_path.as_deref(),
        issue.location.as_ref().map(|l| l.line),
        issue.message.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueCode;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).single().expect("date")
    }

    fn related_fix() -> RepairProposal {
        RepairProposal::normalize_relationship_list("related", vec!["x".into()])
    }

    fn sample_issues() -> Vec<Issue> {
        vec![
            Issue::error(
                IssueCode::TicketSectionMissing,
                "b/ticket.md",
                "missing '## Verification'",
            )
            .with_proposal(RepairProposal::add_section("## Verification")),
            Issue::error(IssueCode::TicketStatusInvalid, "a/ticket.md", "status 'x'")
                .with_field("status")
                .with_proposal(RepairProposal::set_front_matter_field("status")),
            Issue::warning(IssueCode::TicketRelationshipDuplicate, "a/ticket.md", "dup")
                .with_field("related")
                .with_proposal(related_fix()),
            Issue::error(IssueCode::TicketRelationshipEntryEmpty, "a/ticket.md", "empty")
                .with_field("related")
                .with_proposal(related_fix()),
        ]
    }

    #[test]
    fn build_orders_numbers_and_merges() {
        let report = IssuesReport::build(at(), vec!["b".into(), "a".into()], sample_issues());
        let order: Vec<_> = report
            .issues
            .iter()
            .map(|i| (i.id.as_str(), i.ticket_path.as_str(), i.code.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("I0001", "a/ticket.md", "TICKET_RELATIONSHIP_DUPLICATE"),
                ("I0002", "a/ticket.md", "TICKET_RELATIONSHIP_ENTRY_EMPTY"),
                ("I0003", "a/ticket.md", "TICKET_STATUS_INVALID"),
                ("I0004", "b/ticket.md", "TICKET_SECTION_MISSING"),
            ]
        );
        assert_eq!(report.repairs.len(), 3);
        assert_eq!(report.repairs[0].issue_ids, vec!["I0001", "I0002"]);
        assert!(report.repairs[0].enabled);
        assert!(!report.repairs[1].enabled);
        assert_eq!(report.repairs[1].unresolved_params(), vec!["value"]);
        assert_eq!(report.targets, vec!["a", "b"]);
        assert_eq!(report.outcome(), ValidationOutcome::Errors);
        assert_eq!(
            report.summary(),
            ReportSummary {
                errors: 3,
                warnings: 1,
                repairs: 3,
                safe_repairs: 2,
            }
        );
    }

    #[test]
    fn yaml_and_json_read_back() {
        let report = IssuesReport::build(at(), vec!["a".into()], sample_issues());
        for format in [ReportFormat::Yaml, ReportFormat::Json] {
            let text = report.render(format).expect("render");
            let back = IssuesReport::parse(&text).expect("parse");
            assert_eq!(back.repairs, report.repairs);
            assert_eq!(back.generated_at, report.generated_at);
            assert_eq!(back.issues.len(), 4);
        }
    }

    #[test]
    fn render_is_deterministic() {
        let a = IssuesReport::build(at(), vec![], sample_issues());
        let b = IssuesReport::build(at(), vec![], sample_issues().into_iter().rev().collect());
        assert_eq!(
            a.render(ReportFormat::Yaml).expect("yaml"),
            b.render(ReportFormat::Yaml).expect("yaml")
        );
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let text = concat!(
            "schema_version: 9\ngenerated_at: 2026-01-01T00:00:00Z\ntool: tickets\n",
            "targets: []\nissues: []\nrepairs: []\n",
        );
        let err = IssuesReport::parse(text).expect_err("version");
        assert!(matches!(err, TicketsError::PlanInvalid(_)));
    }

    #[test]
    fn format_from_str() {
        assert_eq!("JSON".parse::<ReportFormat>().expect("json"), ReportFormat::Json);
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
