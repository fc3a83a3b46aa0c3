//! Tests for the `netdiag` binary
//!
//! These run the built executable and only cover paths that stop before a
//! cluster is contacted.

use std::process::Command;

fn netdiag() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_netdiag"));
    // A scratch working directory keeps a stray .env out of the picture
    cmd.current_dir(std::env::temp_dir()).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_bad_config_reported_on_stderr() {
    let output = netdiag()
        .env("NETDIAG_PROBE_TIMEOUT_SECS", "not-a-number")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to load configuration"),
        "stderr was: {stderr}"
    );
    assert!(output.stdout.is_empty());
}

#[test]
fn test_list_tests_needs_no_cluster() {
    let output = netdiag().arg("--list-tests").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Tests:"));
    assert!(stdout.contains("Groups:"));
}
