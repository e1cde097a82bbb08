use predicates::prelude::*;

#[test]
fn test_help_includes_required_options() {
    let mut cmd = assert_cmd::Command::cargo_bin("udmon").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--command"))
        .stdout(predicate::str::contains("--privileged"))
        .stdout(predicate::str::contains("--filter"))
        .stdout(predicate::str::contains("--json"))
        .stdout(predicate::str::contains("--restart"))
        .stdout(predicate::str::contains("--list-on-exit"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn test_help_mentions_udisksctl() {
    let mut cmd = assert_cmd::Command::cargo_bin("udmon").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("udisksctl monitor"));
}

#[test]
fn test_unknown_log_level_rejected_by_parser() {
    let mut cmd = assert_cmd::Command::cargo_bin("udmon").unwrap();
    cmd.args(["--log-level", "chatty"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("chatty"));
}
