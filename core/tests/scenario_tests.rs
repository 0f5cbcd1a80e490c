//! End-to-end validate / repair scenarios over a real directory tree.

use std::path::Path;

use chrono::TimeZone;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tickets_core::{
    ExitClass, FixedClock, FsStore, IssueCode, IssuesReport, RepairAction, ReportFormat, Severity,
    Target, TicketEngine, TicketsConfig, TicketsError,
};

const ID_A: &str = "0190f5a2-7c3b-7d4e-8f00-0000000000aa";
const ID_B: &str = "0190f5a2-7c3b-7d4e-8f00-0000000000bb";

const BODY: &str = concat!(
    "# Ticket\n\n## Description\nSomething to do.\n\n",
    "## Acceptance Criteria\n- it works\n\n## Verification\n- cargo test\n",
);

fn clock() -> FixedClock {
    FixedClock::new(
        chrono::Utc
            .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("date"),
    )
}

fn engine(dir: &TempDir) -> TicketEngine<FsStore, FixedClock> {
    TicketEngine::new(FsStore::new(dir.path()), clock(), TicketsConfig::default())
}

fn front(id: &str, status: &str, extra: &str) -> String {
    format!("id: {id}\ntitle: Example\nstatus: {status}\ncreated_at: 2026-01-01T00:00:00Z\n{extra}")
}

fn write_ticket(root: &Path, dir: &str, front: &str, body: &str) {
    let ticket_dir = root.join(".tickets").join(dir);
    std::fs::create_dir_all(&ticket_dir).expect("create ticket dir");
    std::fs::write(ticket_dir.join("ticket.md"), format!("---\n{front}---\n{body}"))
        .expect("write ticket");
}

fn logs_dir(root: &Path, dir: &str) -> std::path::PathBuf {
    root.join(".tickets").join(dir).join("logs")
}

fn read_ticket(root: &Path, dir: &str) -> String {
    std::fs::read_to_string(root.join(".tickets").join(dir).join("ticket.md")).expect("read ticket")
}

#[test]
fn minimal_ticket_is_clean() {
    let dir = TempDir::new().expect("temp dir");
    write_ticket(dir.path(), ID_A, &front(ID_A, "todo", ""), BODY);

    let result = engine(&dir).validate(&Target::All);
    assert_eq!(ExitClass::for_validation(&result), ExitClass::Success);
    let validation = result.expect("validate");
    assert_eq!(validation.tickets_checked, 1);
    assert!(validation.report.issues.is_empty());
    assert!(validation.report.repairs.is_empty());
}

#[test]
fn uppercase_status_is_one_safe_repair_away_from_clean() {
    let dir = TempDir::new().expect("temp dir");
    write_ticket(dir.path(), ID_A, &front(ID_A, "TODO", ""), BODY);
    let engine = engine(&dir);

    let validation = engine.validate(&Target::All).expect("validate");
    assert_eq!(validation.exit_class(), ExitClass::ValidationErrors);
    let report = &validation.report;
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].code, IssueCode::TicketStatusInvalid);
    assert_eq!(report.issues[0].severity, Severity::Error);
    assert_eq!(report.repairs.len(), 1);
    assert!(report.repairs[0].safe && report.repairs[0].enabled);
    assert_eq!(report.repairs[0].action, RepairAction::NormalizeEnum);

    let outcome = engine.repair(&Target::All, None).expect("repair");
    assert_eq!(outcome.applied, vec!["R0001"]);
    assert_eq!(outcome.written, vec![format!(".tickets/{ID_A}/ticket.md")]);
    assert_eq!(outcome.logs.len(), 1);
    assert!(read_ticket(dir.path(), ID_A).contains("status: todo"));

    let again = engine.validate(&Target::All).expect("revalidate");
    assert_eq!(again.exit_class(), ExitClass::Success);
    assert_eq!(again.logs_checked, 1);
    assert!(again.report.issues.is_empty(), "{:?}", again.report.issues);
}

#[test]
fn safe_repair_is_idempotent() {
    let dir = TempDir::new().expect("temp dir");
    let messy = front(ID_A, "Doing", &format!("related: {ID_B}\n"));
    write_ticket(dir.path(), ID_A, &messy, "# Ticket\n");
    write_ticket(dir.path(), ID_B, &front(ID_B, "todo", ""), BODY);
    let engine = engine(&dir);

    let first = engine.repair(&Target::All, None).expect("first repair");
    assert_eq!(first.written.len(), 1);
    let after_first = read_ticket(dir.path(), ID_A);

    let second = engine.repair(&Target::All, None).expect("second repair");
    assert!(second.is_noop());
    assert_eq!(read_ticket(dir.path(), ID_A), after_first);
}

#[test]
fn missing_verification_gets_a_placeholder_section() {
    let dir = TempDir::new().expect("temp dir");
    let body = "# Ticket\n\n## Description\nx\n\n## Acceptance Criteria\n- y\n";
    write_ticket(dir.path(), ID_A, &front(ID_A, "todo", ""), body);
    let engine = engine(&dir);

    let report = engine.validate(&Target::All).expect("validate").report;
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].code, IssueCode::TicketSectionMissing);
    assert_eq!(report.repairs[0].action, RepairAction::AddSection);

    engine.repair(&Target::All, None).expect("repair");
    assert!(read_ticket(dir.path(), ID_A).ends_with("- y\n\n## Verification\n\n(fill in)\n"));
}

#[test]
fn unchanged_input_gives_identical_reports() {
    let dir = TempDir::new().expect("temp dir");
    write_ticket(dir.path(), ID_A, &front(ID_A, "wip", "blocked_by: [x]\n"), "no sections\n");
    write_ticket(dir.path(), "broken", "title: [unterminated\n", BODY);
    let engine = engine(&dir);

    let first = engine.validate(&Target::All).expect("first").report;
    let second = engine.validate(&Target::All).expect("second").report;
    for format in [ReportFormat::Yaml, ReportFormat::Json] {
        assert_eq!(
            first.render(format).expect("render"),
            second.render(format).expect("render")
        );
    }
    let broken: Vec<_> = first
        .issues
        .iter()
        .filter(|i| i.ticket_path == ".tickets/broken/ticket.md")
        .map(|i| i.code)
        .collect();
    assert_eq!(broken, vec![IssueCode::TicketFrontMatterInvalid]);
}

#[test]
fn unresolved_plan_decision_fails_before_any_write() {
    let dir = TempDir::new().expect("temp dir");
    write_ticket(dir.path(), ID_A, &front(ID_A, "someday", ""), "# Ticket\n");
    let engine = engine(&dir);
    let before = read_ticket(dir.path(), ID_A);

    let report = engine.validate(&Target::All).expect("validate").report;
    let text = report.render(ReportFormat::Yaml).expect("render");
    let mut plan = IssuesReport::parse(&text).expect("parse plan");
    let status_fix = plan
        .repairs
        .iter_mut()
        .find(|r| r.action == RepairAction::SetFrontMatterField)
        .expect("status repair");
    assert!(!status_fix.enabled);
    status_fix.enabled = true;

    let err = engine.repair(&Target::All, Some(&plan)).expect_err("null decision");
    assert!(matches!(err, TicketsError::RepairPrecondition { .. }));
    assert_eq!(read_ticket(dir.path(), ID_A), before);
    assert!(!dir.path().join(".tickets").join(ID_A).join("logs").exists());

    for repair in plan.repairs.iter_mut() {
        if repair.action == RepairAction::SetFrontMatterField {
            repair.params.insert("value".to_string(), serde_json::json!("doing"));
        }
    }
    let outcome = engine.repair(&Target::All, Some(&plan)).expect("decided plan");
    assert!(outcome.failed.is_empty());
    let repaired = read_ticket(dir.path(), ID_A);
    assert!(repaired.contains("status: doing"));
    assert!(repaired.contains("## Verification\n\n(fill in)"));
}

#[test]
fn id_replacement_rewrites_references() {
    let dir = TempDir::new().expect("temp dir");
    let upper = ID_A.to_uppercase();
    write_ticket(dir.path(), "a", &front(&upper, "todo", ""), BODY);
    write_ticket(
        dir.path(),
        "b",
        &front(ID_B, "todo", &format!("dependencies: [\"{upper}\"]\n")),
        BODY,
    );
    let engine = engine(&dir);

    let mut plan = engine.validate(&Target::All).expect("validate").report;
    let replace = plan
        .repairs
        .iter_mut()
        .find(|r| r.action == RepairAction::ReplaceId)
        .expect("replace_id repair");
    assert!(!replace.safe);
    assert_eq!(replace.params.get("value"), Some(&serde_json::json!(ID_A)));
    assert_eq!(replace.unresolved_params(), vec!["update_references"]);
    replace.params.insert("update_references".to_string(), serde_json::json!(true));
    replace.enabled = true;

    let outcome = engine.repair(&Target::All, Some(&plan)).expect("repair");
    assert!(outcome.failed.is_empty(), "{:?}", outcome.failed);
    assert_eq!(outcome.written.len(), 2);
    assert!(read_ticket(dir.path(), "a").contains(&format!("id: {ID_A}")));
    assert!(read_ticket(dir.path(), "b").contains(&format!("- {ID_A}")));

    let again = engine.validate(&Target::All).expect("revalidate");
    assert!(again.report.issues.is_empty(), "{:?}", again.report.issues);
}

#[test]
fn single_ticket_target_by_id() {
    let dir = TempDir::new().expect("temp dir");
    write_ticket(dir.path(), "first", &front(ID_A, "TODO", ""), BODY);
    write_ticket(dir.path(), "second", &front(ID_B, "TODO", ""), BODY);
    let engine = engine(&dir);

    let report = engine
        .validate(&Target::Ticket(ID_B.to_string()))
        .expect("validate")
        .report;
    assert_eq!(report.targets, vec![".tickets/second/ticket.md"]);
    assert_eq!(report.issues.len(), 1);

    let outcome = engine
        .repair(&Target::Ticket("second".to_string()), None)
        .expect("repair");
    assert_eq!(outcome.written, vec![".tickets/second/ticket.md"]);
    assert!(read_ticket(dir.path(), "first").contains("status: TODO"));
}

#[test]
fn duplicate_id_is_reported_against_the_later_path() {
    let dir = TempDir::new().expect("temp dir");
    write_ticket(dir.path(), "a", &front(ID_A, "todo", ""), BODY);
    write_ticket(dir.path(), "b", &front(ID_A, "todo", ""), BODY);
    write_ticket(
        dir.path(),
        "c",
        &front(ID_B, "todo", &format!("dependencies: [{ID_A}]\n")),
        BODY,
    );
    let engine = engine(&dir);

    let validation = engine.validate(&Target::All).expect("validate");
    assert_eq!(validation.exit_class(), ExitClass::ValidationErrors);
    let report = &validation.report;
    assert_eq!(report.issues.len(), 1, "{:?}", report.issues);
    let issue = &report.issues[0];
    assert_eq!(issue.code, IssueCode::TicketIdDuplicate);
    assert_eq!(issue.severity, Severity::Error);
    assert_eq!(issue.ticket_path, ".tickets/b/ticket.md");
    assert_eq!(
        issue.details,
        Some(serde_json::json!({"first_path": ".tickets/a/ticket.md"}))
    );

    let mut plan = report.clone();
    let replace = plan
        .repairs
        .iter_mut()
        .find(|r| r.action == RepairAction::ReplaceId)
        .expect("replace_id repair");
    assert!(!replace.enabled);
    assert_eq!(replace.unresolved_params(), vec!["update_references", "value"]);
    replace.params.insert("generate_uuidv7".to_string(), serde_json::json!(true));
    replace.params.insert("update_references".to_string(), serde_json::json!(true));
    replace.enabled = true;

    let refused = engine.repair(&Target::All, Some(&plan)).expect("repair");
    assert_eq!(refused.failed.len(), 1);
    assert!(refused.is_noop());
    assert!(read_ticket(dir.path(), "c").contains(ID_A));

    for repair in plan.repairs.iter_mut() {
        repair.params.insert("update_references".to_string(), serde_json::json!(false));
    }
    let outcome = engine.repair(&Target::All, Some(&plan)).expect("repair");
    assert!(outcome.failed.is_empty(), "{:?}", outcome.failed);
    assert_eq!(outcome.written, vec![".tickets/b/ticket.md"]);
    assert!(read_ticket(dir.path(), "a").contains(ID_A));
    assert!(!read_ticket(dir.path(), "b").contains(ID_A));
    assert!(read_ticket(dir.path(), "c").contains(ID_A));

    let again = engine.validate(&Target::All).expect("revalidate");
    assert!(again.report.issues.is_empty(), "{:?}", again.report.issues);
}

#[test]
fn repair_leaves_existing_run_logs_byte_identical() {
    let dir = TempDir::new().expect("temp dir");
    write_ticket(dir.path(), ID_A, &front(ID_A, "TODO", ""), BODY);
    let logs = logs_dir(dir.path(), ID_A);
    std::fs::create_dir_all(&logs).expect("create logs dir");
    let name = "20260101T000000.000Z-manual.jsonl";
    let existing = concat!(
        r#"{"ts":"2026-01-01T00:00:01Z","run_started":"20260101T000000.000Z","#,
        r#""actor_type":"human","actor_id":"me","summary":"started"}"#,
        "\n",
    );
    std::fs::write(logs.join(name), existing).expect("write log");

    let outcome = engine(&dir).repair(&Target::All, None).expect("repair");
    assert_eq!(outcome.written.len(), 1);
    assert_eq!(outcome.logs.len(), 1);
    assert!(!outcome.logs[0].ends_with(name));

    assert_eq!(
        std::fs::read(logs.join(name)).expect("read log"),
        existing.as_bytes()
    );
    let files = std::fs::read_dir(&logs).expect("list logs").count();
    assert_eq!(files, 2);
}

#[test]
fn one_undecided_repair_blocks_every_ticket_in_the_plan() {
    let dir = TempDir::new().expect("temp dir");
    write_ticket(dir.path(), "a", &front(ID_A, "TODO", ""), BODY);
    write_ticket(dir.path(), "b", &front(ID_B, "someday", ""), BODY);
    let engine = engine(&dir);
    let before = (read_ticket(dir.path(), "a"), read_ticket(dir.path(), "b"));

    let mut plan = engine.validate(&Target::All).expect("validate").report;
    assert_eq!(plan.repairs.len(), 2);
    for repair in plan.repairs.iter_mut() {
        repair.enabled = true;
    }
    let undecided = plan
        .repairs
        .iter()
        .find(|r| r.ticket_path == ".tickets/b/ticket.md")
        .map(|r| r.id.clone())
        .expect("status repair");

    let err = engine.repair(&Target::All, Some(&plan)).expect_err("undecided");
    match err {
        TicketsError::RepairPrecondition { repair_id, param, .. } => {
            assert_eq!(repair_id, undecided);
            assert_eq!(param, "value");
        }
        other => panic!("unexpected error {other}"),
    }
    let after = (read_ticket(dir.path(), "a"), read_ticket(dir.path(), "b"));
    assert_eq!(after, before);
    assert!(!logs_dir(dir.path(), "a").exists());
    assert!(!logs_dir(dir.path(), "b").exists());
}
