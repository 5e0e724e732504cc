#![cfg(unix)]

mod common;

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use common::FAKE_CLI;

fn write_script(name: &str, body: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("nodectl-{}-{name}.script", std::process::id()));
    fs::write(&path, body).expect("Failed to write test script");
    path
}

fn run_nodectl(script: &PathBuf) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_nodectl"))
        .arg("--script")
        .arg(script)
        .arg("--command")
        .arg("sh")
        .arg("--pipe")
        .arg("--")
        .arg("-c")
        .arg(FAKE_CLI)
        .output()
        .expect("Failed to execute nodectl")
}

#[test]
fn test_script_against_piped_cli() {
    let script = write_script(
        "basic",
        r#"
# bring the interface up, then check the role
send "ifconfig up"
send "state"   # prints leader
expect "lead.*"
advance 100ms
poll "state" "leader|router" within 2s every 100ms
"#,
    );

    let output = run_nodectl(&script);
    assert!(
        output.status.success(),
        "nodectl failed with stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("leader").count(), 2, "got: {stdout}");

    let _ = fs::remove_file(script);
}

#[test]
fn test_device_error_fails_the_run() {
    let script = write_script("error", "send \"frobnicate\"\n");

    let output = run_nodectl(&script);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("InvalidCommand"), "got: {stderr}");

    let _ = fs::remove_file(script);
}

#[test]
fn test_unknown_step_is_rejected_before_launch() {
    let script = write_script("unknown", "type \"state\"\n");

    let output = run_nodectl(&script);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse script file"), "got: {stderr}");

    let _ = fs::remove_file(script);
}
