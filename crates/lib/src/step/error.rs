use std::path::PathBuf;

use thiserror::Error;

use super::Capability;
use super::files::BatchError;
use super::git::GitError;
use crate::config::ConfigError;
use crate::process::ProcessError;

/// Fault carried by a step that did not succeed.
#[derive(Debug, Error)]
pub enum StepError {
  #[error("cancelled")]
  Cancelled,

  #[error(transparent)]
  Process(#[from] ProcessError),

  #[error("'{command}' exited with code {code}")]
  ExitCode { command: String, code: i32 },

  #[error("{message}")]
  Timeout { command: String, message: String },

  #[error("'{command}' wrote to stderr: {message}")]
  Stderr { command: String, message: String },

  #[error(transparent)]
  Batch(#[from] BatchError),

  #[error(transparent)]
  Git(#[from] GitError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("step did not declare the {0} capability")]
  MissingCapability(Capability),

  #[error("no step named '{0}' is registered")]
  UnknownStep(String),

  #[error("{path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("{0}")]
  Other(String),
}

impl StepError {
  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    StepError::Io {
      path: path.into(),
      source,
    }
  }

  /// True when the fault is a cancellation, however deeply wrapped.
  pub fn is_cancelled(&self) -> bool {
    match self {
      StepError::Cancelled => true,
      StepError::Process(e) => e.is_cancelled(),
      StepError::Batch(e) => e.is_cancelled(),
      StepError::Git(e) => e.is_cancelled(),
      _ => false,
    }
  }
}
