//! CLI smoke tests for modpack.
//!
//! These tests verify that every command runs without panicking and
//! returns the expected exit code.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Get a Command for the modpack binary.
fn modpack_cmd() -> Command {
  let mut cmd = cargo_bin_cmd!("modpack");
  cmd.env_remove("MODPACK_ROOT");
  cmd
}

/// Create a temp directory holding `modpack.toml`.
fn temp_config(content: &str) -> TempDir {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("modpack.toml"), content).unwrap();
  temp
}

/// Only creates the environment's directories.
const PREP_CONFIG: &str = r#"
root = "env"

[pipelines]
dev = ["prep"]
"#;

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  modpack_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  modpack_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("modpack"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["build", "exec", "steps"] {
    modpack_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// steps
// =============================================================================

#[test]
fn steps_lists_every_kind() {
  let output = modpack_cmd().arg("steps").output().unwrap();
  assert!(output.status.success());
  let stdout = String::from_utf8_lossy(&output.stdout);
  for name in ["prep", "clean", "sources", "build", "sign", "deploy"] {
    assert!(stdout.contains(name), "missing {name} in {stdout}");
  }
}

#[test]
fn steps_json_is_parseable() {
  let output = modpack_cmd().args(["steps", "--json"]).output().unwrap();
  assert!(output.status.success());
  let steps: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(steps.as_array().unwrap().len(), 6);
}

// =============================================================================
// exec
// =============================================================================

#[test]
#[cfg(unix)]
fn exec_prints_tagged_output() {
  modpack_cmd()
    .args(["exec", "sh", "-c", "echo hello; echo oops >&2"])
    .assert()
    .success()
    .stdout(predicate::str::contains("out hello"))
    .stdout(predicate::str::contains("err oops"))
    .stdout(predicate::str::contains("Process exited with code 0"));
}

#[test]
#[cfg(unix)]
fn exec_returns_process_exit_code() {
  modpack_cmd().args(["exec", "sh", "-c", "exit 3"]).assert().code(3);
}

#[test]
#[cfg(unix)]
fn exec_timeout_exits_124() {
  modpack_cmd()
    .args(["exec", "--timeout", "200ms", "sleep", "30"])
    .assert()
    .code(124)
    .stdout(predicate::str::contains("timed out"));
}

#[test]
#[cfg(unix)]
fn exec_honours_cwd() {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("marker.txt"), "").unwrap();

  modpack_cmd()
    .arg("exec")
    .arg("--cwd")
    .arg(temp.path())
    .arg("ls")
    .assert()
    .success()
    .stdout(predicate::str::contains("marker.txt"));
}

#[test]
fn exec_missing_executable_fails() {
  modpack_cmd()
    .args(["exec", "definitely-not-a-real-binary-1234"])
    .assert()
    .failure();
}

// =============================================================================
// build
// =============================================================================

#[test]
#[serial]
fn build_runs_configured_pipeline() {
  let temp = temp_config(PREP_CONFIG);

  modpack_cmd()
    .arg("build")
    .arg("--config")
    .arg(temp.path().join("modpack.toml"))
    .args(["--environment", "dev", "--version", "1.2.3"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Starting prep"))
    .stdout(predicate::str::contains("1.2.3.1 (dev)"));

  assert!(temp.path().join("env/build/dev").is_dir());
  let records = std::fs::read_dir(temp.path().join("env/builds")).unwrap().count();
  assert_eq!(records, 1);
}

#[test]
#[serial]
fn build_numbers_increase() {
  let temp = temp_config(PREP_CONFIG);
  let config = temp.path().join("modpack.toml");

  for expected in ["\"build_number\": 1", "\"build_number\": 2"] {
    modpack_cmd()
      .arg("build")
      .arg("--config")
      .arg(&config)
      .args(["--environment", "dev", "--version", "1.2.3", "--json"])
      .assert()
      .success()
      .stdout(predicate::str::contains(expected));
  }
}

#[test]
#[serial]
#[cfg(unix)]
fn build_with_failing_tool_fails() {
  let temp = temp_config(
    r#"
root = "env"

[variables]
BUILD_TOOL = "sh"
BUILD_TOOL_ARGS = "-c 'exit 3'"

[pipelines]
dev = ["prep", "build", "deploy"]
"#,
  );
  std::fs::create_dir_all(temp.path().join("env/source")).unwrap();

  modpack_cmd()
    .arg("build")
    .arg("--config")
    .arg(temp.path().join("modpack.toml"))
    .args(["--environment", "dev", "--version", "1.0.0", "--build-number", "9"])
    .assert()
    .failure()
    .stdout(predicate::str::contains("1.0.0.9 (dev)"));
}

#[test]
fn build_with_unknown_step_fails() {
  let temp = temp_config(
    r#"
[pipelines]
dev = ["prep", "compile"]
"#,
  );

  modpack_cmd()
    .arg("build")
    .arg("--config")
    .arg(temp.path().join("modpack.toml"))
    .args(["--environment", "dev", "--version", "1.0.0"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown step 'compile'"));
}

#[test]
fn build_with_missing_config_fails() {
  modpack_cmd()
    .args([
      "build",
      "--config",
      "/nonexistent/modpack.toml",
      "--environment",
      "dev",
      "--version",
      "1.0.0",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn build_with_unknown_environment_fails() {
  modpack_cmd()
    .args(["build", "--environment", "staging", "--version", "1.0.0"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown environment"));
}
