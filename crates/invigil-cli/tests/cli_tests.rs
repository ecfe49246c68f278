//! CLI integration tests using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;

fn invigil() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("invigil").unwrap()
}

#[test]
fn help_lists_subcommands() {
    invigil()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("simulate"));
}

#[test]
fn simulate_runs_to_submission() {
    invigil()
        .args(["simulate", "--questions", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("submitted"))
        .stdout(predicate::str::contains("answered: 3/3"));
}

#[test]
fn simulate_reports_partial_answers() {
    invigil()
        .args(["simulate", "--questions", "5", "--unanswered", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("answered: 3/5"));
}

#[test]
fn run_rejects_missing_exam_file() {
    invigil()
        .args([
            "run",
            "--exam",
            "/nonexistent/exam.toml",
            "--student",
            "stu-1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read exam"));
}
