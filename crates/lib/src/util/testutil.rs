//! Test utilities for modpack-lib.
//!
//! Cross-platform helpers for tests that run shell commands, plus a fixture
//! for running a single step against a temporary build environment.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::build::{Environment, StepRecord};
use crate::config::MemoryVariables;
use crate::platform::BuildPaths;
use crate::process::ProcessCommand;
use crate::step::{BuildInfo, BuildState, BuildStep, StepContext, StepLogger, StepServices, StepState, run_step};

/// A command running `script` through the platform shell in the temp directory.
pub fn sh(script: &str) -> ProcessCommand {
  ProcessCommand::shell(std::env::temp_dir(), script)
}

/// A command running `script` through the platform shell in `dir`.
pub fn shell_in(dir: &Path, script: &str) -> ProcessCommand {
  ProcessCommand::shell(dir, script)
}

/// Write `content` to `relative` under `root`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, content: &str) {
  let path = root.join(relative);
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, content).unwrap();
}

/// Write an executable shell script and return its path.
#[cfg(unix)]
pub fn write_script(root: &Path, name: &str, body: &str) -> std::path::PathBuf {
  use std::os::unix::fs::PermissionsExt;

  let path = root.join(name);
  std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
  std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  path
}

/// One build's worth of step inputs rooted in a temp directory.
pub struct StepFixture {
  pub temp: TempDir,
  pub build: BuildInfo,
  pub state: BuildState,
  pub services: StepServices,
  pub cancel: CancellationToken,
}

impl StepFixture {
  pub fn new(environment: Environment, variables: MemoryVariables) -> Self {
    Self::new_in(environment, variables, ".")
  }

  /// Like [`new`](Self::new) with the build root at `subdir` of the temp directory.
  pub fn new_in(environment: Environment, variables: MemoryVariables, subdir: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join(subdir);
    std::fs::create_dir_all(&root).unwrap();
    let paths = BuildPaths::new(root);
    Self {
      temp,
      build: BuildInfo {
        id: "build-1".to_string(),
        environment,
        version: "5.2.0".to_string(),
        build_number: 7,
      },
      state: BuildState::default(),
      services: StepServices::new(Arc::new(variables), paths),
      cancel: CancellationToken::new(),
    }
  }

  pub fn paths(&self) -> &BuildPaths {
    &self.services.paths
  }

  pub async fn run(&mut self, step: &mut dyn BuildStep) -> (StepState, StepRecord) {
    let mut logger = StepLogger::new(StepRecord::new(step.name(), 0), Arc::new(|_: &StepRecord| {}));
    let capabilities = step.capabilities();
    let mut ctx = StepContext::new(
      &self.build,
      &mut self.state,
      &mut logger,
      &self.services,
      self.cancel.clone(),
      capabilities,
    );
    let state = run_step(step, &mut ctx).await;
    (state, logger.into_record())
  }
}
