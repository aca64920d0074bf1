use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::files::{DEFAULT_WORKERS, FileOps};
use super::git::Git;
use super::{Capability, StepError, StepLogger};
use crate::build::{Build, Environment};
use crate::config::Variables;
use crate::platform::BuildPaths;
use crate::process::{OutputKind, ProcessCommand, ProcessError, ProcessOutput, ProcessTracker};

/// Identity of the build a step belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
  pub id: String,
  pub environment: Environment,
  pub version: String,
  pub build_number: u32,
}

impl From<&Build> for BuildInfo {
  fn from(build: &Build) -> Self {
    Self {
      id: build.id.clone(),
      environment: build.environment,
      version: build.version.clone(),
      build_number: build.build_number,
    }
  }
}

impl BuildInfo {
  /// `5.2.0.7`
  pub fn full_version(&self) -> String {
    format!("{}.{}", self.version, self.build_number)
  }
}

/// Values earlier steps publish to later ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildState {
  /// Revision checked out by the sources step.
  pub commit: Option<String>,
  /// `None` when no sources step ran.
  pub sources_changed: Option<bool>,
  /// Signing key created for this build.
  pub key_name: Option<String>,
}

/// Shared services, the same for every step of every build.
#[derive(Clone)]
pub struct StepServices {
  pub variables: Arc<dyn Variables>,
  pub paths: BuildPaths,
  pub tracker: Option<Arc<dyn ProcessTracker>>,
  pub workers: usize,
}

impl StepServices {
  pub fn new(variables: Arc<dyn Variables>, paths: BuildPaths) -> Self {
    Self {
      variables,
      paths,
      tracker: None,
      workers: DEFAULT_WORKERS,
    }
  }

  pub fn tracker(mut self, tracker: Arc<dyn ProcessTracker>) -> Self {
    self.tracker = Some(tracker);
    self
  }

  pub fn workers(mut self, workers: usize) -> Self {
    self.workers = workers;
    self
  }
}

impl std::fmt::Debug for StepServices {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StepServices")
      .field("paths", &self.paths)
      .field("tracked", &self.tracker.is_some())
      .field("workers", &self.workers)
      .finish_non_exhaustive()
  }
}

/// How a command's stderr lines are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrPolicy {
  /// Logged as errors; the command fails once it completes.
  Fatal,
  /// Logged as warnings; the step ends as Warning.
  Warn,
  /// Logged as plain lines.
  Log,
}

/// Everything a hook can see and touch while its step is active.
pub struct StepContext<'a> {
  pub build: &'a BuildInfo,
  pub state: &'a mut BuildState,
  pub log: &'a mut StepLogger,
  pub services: &'a StepServices,
  cancel: CancellationToken,
  capabilities: &'static [Capability],
}

impl<'a> StepContext<'a> {
  pub fn new(
    build: &'a BuildInfo,
    state: &'a mut BuildState,
    log: &'a mut StepLogger,
    services: &'a StepServices,
    cancel: CancellationToken,
    capabilities: &'static [Capability],
  ) -> Self {
    Self {
      build,
      state,
      log,
      services,
      cancel,
      capabilities,
    }
  }

  pub fn environment(&self) -> Environment {
    self.build.environment
  }

  pub fn variables(&self) -> &dyn Variables {
    self.services.variables.as_ref()
  }

  pub fn paths(&self) -> &BuildPaths {
    &self.services.paths
  }

  pub fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  pub fn check_cancelled(&self) -> Result<(), StepError> {
    if self.is_cancelled() {
      return Err(StepError::Cancelled);
    }
    Ok(())
  }

  fn require(&self, capability: Capability) -> Result<(), StepError> {
    if self.capabilities.contains(&capability) {
      Ok(())
    } else {
      Err(StepError::MissingCapability(capability))
    }
  }

  pub fn files(&self) -> Result<FileOps, StepError> {
    self.require(Capability::Files)?;
    Ok(FileOps::new(self.services.workers, self.cancel.clone()))
  }

  /// Git client; the executable is `GIT_TOOL`, default `git`.
  pub fn git(&self) -> Result<Git, StepError> {
    self.require(Capability::Git)?;
    let executable = self.variables().string_or("GIT_TOOL", "git")?;
    let mut git = Git::new(executable, self.cancel.clone());
    if let Some(tracker) = &self.services.tracker {
      git = git.tracker(tracker.clone(), self.build.id.clone());
    }
    Ok(git)
  }

  /// Label `command` with the step name and track it for this build.
  pub fn track(&self, command: ProcessCommand) -> ProcessCommand {
    let command = command.process_id(self.log.record().name.clone());
    match &self.services.tracker {
      Some(tracker) => command.tracker(tracker.clone(), self.build.id.clone()),
      None => command,
    }
  }

  /// Run `command`, streaming its output into the step log.
  ///
  /// A timeout or a non-zero exit fails the step. Stderr is handled per
  /// `stderr`.
  pub async fn run(&mut self, command: ProcessCommand, stderr: StderrPolicy) -> Result<(), StepError> {
    let command_line = command.display();
    let output = command.execute(self.cancel.clone());
    self.follow(command_line, output, stderr).await
  }

  async fn follow(
    &mut self,
    command_line: String,
    mut output: ProcessOutput,
    stderr: StderrPolicy,
  ) -> Result<(), StepError> {
    let mut first_stderr: Option<String> = None;

    while let Some(line) = output.next().await {
      let line = line?;
      match line.kind {
        OutputKind::Output => self.log.log(&line.content),
        OutputKind::Error if line.is_timeout() => {
          self.log.log_error(&line.content);
          return Err(StepError::Timeout {
            command: command_line,
            message: line.content,
          });
        }
        OutputKind::Error => match stderr {
          StderrPolicy::Fatal => {
            self.log.log_error(&line.content);
            if first_stderr.is_none() {
              first_stderr = Some(line.content);
            }
          }
          StderrPolicy::Warn => self.log.log_warning(&line.content),
          StderrPolicy::Log => self.log.log(&line.content),
        },
        OutputKind::ProcessCompleted => {
          let code = line.exit_code.unwrap_or(-1);
          if code != 0 {
            return Err(StepError::ExitCode { command: command_line, code });
          }
          if let Some(message) = first_stderr {
            return Err(StepError::Stderr {
              command: command_line,
              message,
            });
          }
          return Ok(());
        }
      }
    }
    Err(ProcessError::Unfinished { command: command_line }.into())
  }
}
