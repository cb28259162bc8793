use std::process::Command;

#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_wdb-cli"))
        .arg("--help")
        .output()
        .expect("Failed to run wdb-cli");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: wdb-cli"));
    assert!(stdout.contains("set-mode"));
}

#[test]
fn test_daemon_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_wdb-agent"))
        .arg("--help")
        .output()
        .expect("Failed to run wdb-agent");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: wdb-agent"));
    assert!(stdout.contains("--event-interval-ms"));
}
