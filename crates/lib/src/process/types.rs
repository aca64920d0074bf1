//! Types produced by the process execution engine.
//!
//! A running command is observed as a sequence of [`OutputLine`]s. Each line
//! is tagged with an [`OutputKind`]; error lines carry a [`Fault`] describing
//! what went wrong.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag for a single streamed unit of process output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
  /// A line written to stdout.
  Output,
  /// A line written to stderr, or an engine-raised fault such as a timeout.
  Error,
  /// The process exited; always the last line of a completed run.
  ProcessCompleted,
}

/// Classification of a [`Fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
  /// The process exceeded its configured timeout and was killed.
  Timeout,
  /// Anything else, including stderr content.
  Other,
}

/// A typed error value attached to an output line.
///
/// Faults are data, not control flow: the engine hands them to the caller
/// and lets the call site decide whether they are fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
  pub kind: FaultKind,
  pub message: String,
}

impl Fault {
  pub fn timeout(message: impl Into<String>) -> Self {
    Self {
      kind: FaultKind::Timeout,
      message: message.into(),
    }
  }

  pub fn other(message: impl Into<String>) -> Self {
    Self {
      kind: FaultKind::Other,
      message: message.into(),
    }
  }

  pub fn is_timeout(&self) -> bool {
    self.kind == FaultKind::Timeout
  }
}

impl fmt::Display for Fault {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.kind {
      FaultKind::Timeout => write!(f, "timeout: {}", self.message),
      FaultKind::Other => write!(f, "{}", self.message),
    }
  }
}

/// One streamed unit of process output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
  pub kind: OutputKind,
  pub content: String,
  /// Set only for [`OutputKind::ProcessCompleted`].
  pub exit_code: Option<i32>,
  /// Set for every [`OutputKind::Error`] line.
  pub fault: Option<Fault>,
}

impl OutputLine {
  pub fn output(content: impl Into<String>) -> Self {
    Self {
      kind: OutputKind::Output,
      content: content.into(),
      exit_code: None,
      fault: None,
    }
  }

  /// An error line for a line of stderr. The fault message is the line itself.
  pub fn stderr(content: impl Into<String>) -> Self {
    let content = content.into();
    Self {
      kind: OutputKind::Error,
      fault: Some(Fault::other(content.clone())),
      content,
      exit_code: None,
    }
  }

  pub fn timed_out(command: &str, timeout_secs: f64) -> Self {
    let content = format!("Process timed out after {timeout_secs}s: {command}");
    Self {
      kind: OutputKind::Error,
      fault: Some(Fault::timeout(content.clone())),
      content,
      exit_code: None,
    }
  }

  pub fn completed(exit_code: i32) -> Self {
    Self {
      kind: OutputKind::ProcessCompleted,
      content: format!("Process exited with code {exit_code}"),
      exit_code: Some(exit_code),
      fault: None,
    }
  }

  pub fn is_output(&self) -> bool {
    self.kind == OutputKind::Output
  }

  pub fn is_error(&self) -> bool {
    self.kind == OutputKind::Error
  }

  pub fn is_completed(&self) -> bool {
    self.kind == OutputKind::ProcessCompleted
  }

  pub fn is_timeout(&self) -> bool {
    self.fault.as_ref().is_some_and(Fault::is_timeout)
  }
}

/// Errors that end a process run without a `ProcessCompleted` line.
#[derive(Debug, Error)]
pub enum ProcessError {
  /// The caller's cancellation signal fired; the process was killed.
  #[error("process cancelled: {command}")]
  Cancelled { command: String },

  /// The executable could not be started.
  #[error("failed to start '{command}' in {working_dir}: {source}")]
  Spawn {
    command: String,
    working_dir: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// Waiting on the child failed after it was started.
  #[error("failed waiting for '{command}': {source}")]
  Wait {
    command: String,
    #[source]
    source: std::io::Error,
  },

  /// The output ended without a `ProcessCompleted` line.
  #[error("'{command}' ended without reporting an exit code")]
  Unfinished { command: String },

  /// The argument string could not be split into arguments.
  #[error("invalid argument string: {0}")]
  InvalidArgs(String),
}

impl ProcessError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, ProcessError::Cancelled { .. })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stderr_line_carries_fault_with_line_text() {
    let line = OutputLine::stderr("warning: missing file");
    assert!(line.is_error());
    let fault = line.fault.unwrap();
    assert_eq!(fault.kind, FaultKind::Other);
    assert_eq!(fault.message, "warning: missing file");
  }

  #[test]
  fn completed_line_mentions_exit_code() {
    let line = OutputLine::completed(42);
    assert_eq!(line.exit_code, Some(42));
    assert_eq!(line.content, "Process exited with code 42");
    assert!(line.fault.is_none());
  }

  #[test]
  fn timed_out_line_is_timeout_fault() {
    let line = OutputLine::timed_out("sleep 10", 0.5);
    assert!(line.is_error());
    assert!(line.is_timeout());
    assert!(line.content.contains("timed out"));
  }

  #[test]
  fn output_kind_serializes_snake_case() {
    let json = serde_json::to_string(&OutputKind::ProcessCompleted).unwrap();
    assert_eq!(json, "\"process_completed\"");
  }
}
