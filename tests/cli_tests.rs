//! CLI smoke tests for the routerctl binary

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("routerctl")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("up")
                .and(predicate::str::contains("clean"))
                .and(predicate::str::contains("--host")),
        );
}

#[test]
fn test_up_help_shows_ap_options() {
    Command::cargo_bin("routerctl")
        .unwrap()
        .args(["up", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--channel")
                .and(predicate::str::contains("--psk"))
                .and(predicate::str::contains("--json")),
        );
}

#[test]
fn test_version_flag() {
    Command::cargo_bin("routerctl")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("routerctl"));
}

#[test]
fn test_rejects_unknown_subcommand() {
    Command::cargo_bin("routerctl")
        .unwrap()
        .arg("frobnicate")
        .assert()
        .failure();
}
