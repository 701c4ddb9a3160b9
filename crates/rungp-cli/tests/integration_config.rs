//! Integration tests for `rungp version` and `rungp config`.

use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn rungp(home: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_rungp"))
        .args(args)
        .current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RUNGP_CONFIG_PATH")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute rungp")
}

#[test]
fn test_version_prints_package_version() {
    let temp_dir = TempDir::new().expect("temp dir");

    let output = rungp(temp_dir.path(), &["version"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with(env!("CARGO_PKG_VERSION")), "stdout: {stdout}");
    assert!(stdout.contains("commit:"));
}

#[test]
fn test_config_set_then_path() {
    let temp_dir = TempDir::new().expect("temp dir");
    let home = temp_dir.path();

    let output = rungp(home, &["config", "set", "autoUpdate.enabled", "true"]);
    assert!(
        output.status.success(),
        "config set failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let output = rungp(home, &["config", "path"]);
    assert!(output.status.success());
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    assert!(path.ends_with("config.yaml"), "path: {path}");

    let content = std::fs::read_to_string(&path).expect("config written");
    assert!(content.contains("autoUpdate"), "content: {content}");
    assert!(content.contains("enabled: true"), "content: {content}");
}

#[test]
fn test_config_set_unknown_key_fails() {
    let temp_dir = TempDir::new().expect("temp dir");

    let output = rungp(temp_dir.path(), &["config", "set", "nope", "1"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown config key"), "stderr: {stderr}");
}

#[test]
fn test_config_set_invalid_value_fails() {
    let temp_dir = TempDir::new().expect("temp dir");

    let output = rungp(temp_dir.path(), &["config", "set", "idePort", "not-a-port"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid value"), "stderr: {stderr}");
}
