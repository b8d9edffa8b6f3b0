use std::io::Write;
use std::process::Command;

fn bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_mermaid-validator")
}

fn command_with_script(script: &tempfile::NamedTempFile) -> Command {
    let mut command = Command::new(bin_path());
    command
        .env("MERMAID_VALIDATOR_SCRIPT_PATH", script.path())
        .env_remove("MERMAID_VALIDATOR_ENABLED")
        .env_remove("MERMAID_VALIDATOR_PORT")
        .env_remove("RUST_LOG");
    command
}

#[test]
fn config_subcommand_prints_resolved_json() {
    let script = tempfile::NamedTempFile::new().unwrap();
    let output = command_with_script(&script)
        .env("MERMAID_VALIDATOR_PORT", "4555")
        .args(["config", "--compact"])
        .output()
        .expect("failed to run mermaid-validator config");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["port"], 4555);
    assert_eq!(config["enabled"], true);
}

#[test]
fn invalid_configuration_exits_with_error() {
    let output = Command::new(bin_path())
        .env("MERMAID_VALIDATOR_SCRIPT_PATH", "/nonexistent/server.js")
        .arg("config")
        .output()
        .expect("failed to run mermaid-validator config");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("Error:"), "unexpected stderr: {stderr}");
}

#[test]
fn check_with_validation_disabled_reports_skip() {
    let script = tempfile::NamedTempFile::new().unwrap();
    let mut diagram = tempfile::NamedTempFile::new().unwrap();
    writeln!(diagram, "graph TD\n  A-->B").unwrap();

    let output = command_with_script(&script)
        .env("MERMAID_VALIDATOR_ENABLED", "false")
        .arg("check")
        .arg(diagram.path())
        .output()
        .expect("failed to run mermaid-validator check");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["valid"], true);
    assert_eq!(result["skipped"], true);
}
