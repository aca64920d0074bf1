use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Deployment target of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
  Dev,
  Rc,
  Release,
}

impl Environment {
  pub const ALL: [Environment; 3] = [Environment::Dev, Environment::Rc, Environment::Release];

  pub fn as_str(&self) -> &'static str {
    match self {
      Environment::Dev => "dev",
      Environment::Rc => "rc",
      Environment::Release => "release",
    }
  }

  /// Release candidates and releases share release-only behaviour.
  pub fn is_release(&self) -> bool {
    matches!(self, Environment::Rc | Environment::Release)
  }
}

impl fmt::Display for Environment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
#[error("unknown environment '{0}' (expected dev, rc or release)")]
pub struct UnknownEnvironment(pub String);

impl FromStr for Environment {
  type Err = UnknownEnvironment;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "dev" => Ok(Environment::Dev),
      "rc" => Ok(Environment::Rc),
      "release" => Ok(Environment::Release),
      _ => Err(UnknownEnvironment(s.to_string())),
    }
  }
}

/// Outcome of a build or one of its steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildResult {
  #[default]
  Pending,
  Running,
  Success,
  Warning,
  Failed,
  Cancelled,
  /// Steps only: the step's guard declined to run it.
  Skipped,
}

impl BuildResult {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, BuildResult::Pending | BuildResult::Running)
  }

  /// Success, Warning and Skipped all let the build continue.
  pub fn is_ok(&self) -> bool {
    matches!(self, BuildResult::Success | BuildResult::Warning | BuildResult::Skipped)
  }
}

impl fmt::Display for BuildResult {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      BuildResult::Pending => "pending",
      BuildResult::Running => "running",
      BuildResult::Success => "success",
      BuildResult::Warning => "warning",
      BuildResult::Failed => "failed",
      BuildResult::Cancelled => "cancelled",
      BuildResult::Skipped => "skipped",
    };
    f.write_str(s)
  }
}

/// Display tag of a step log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTag {
  #[default]
  Plain,
  Info,
  Success,
  Warning,
  Error,
  Muted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
  pub text: String,
  #[serde(default)]
  pub tag: LogTag,
}

impl LogEntry {
  pub fn new(text: impl Into<String>, tag: LogTag) -> Self {
    Self {
      text: text.into(),
      tag,
    }
  }
}

/// Persisted shape of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
  pub name: String,
  pub index: usize,
  pub result: BuildResult,
  #[serde(default)]
  pub logs: Vec<LogEntry>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
}

impl StepRecord {
  pub fn new(name: impl Into<String>, index: usize) -> Self {
    Self {
      name: name.into(),
      index,
      result: BuildResult::Pending,
      logs: Vec::new(),
      started_at: None,
      finished_at: None,
    }
  }

  pub fn log_text(&self) -> Vec<&str> {
    self.logs.iter().map(|l| l.text.as_str()).collect()
  }
}

/// One pipeline run producing a deployable package for one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
  pub id: String,
  pub environment: Environment,
  pub version: String,
  pub build_number: u32,
  /// Source revision the build was produced from, once known.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub commit: Option<String>,
  pub result: BuildResult,
  pub steps: Vec<StepRecord>,
  pub queued_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
}

impl Build {
  /// Create a pending build whose steps are `step_names`, in order.
  pub fn new<S: AsRef<str>>(environment: Environment, version: &str, build_number: u32, step_names: &[S]) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      environment,
      version: version.to_string(),
      build_number,
      commit: None,
      result: BuildResult::Pending,
      steps: step_names
        .iter()
        .enumerate()
        .map(|(index, name)| StepRecord::new(name.as_ref(), index))
        .collect(),
      queued_at: Utc::now(),
      started_at: None,
      finished_at: None,
    }
  }

  /// e.g. `5.2.0.14 (rc)`
  pub fn display_name(&self) -> String {
    format!("{}.{} ({})", self.version, self.build_number, self.environment)
  }

  pub fn step(&self, name: &str) -> Option<&StepRecord> {
    self.steps.iter().find(|s| s.name == name)
  }

  pub fn is_finished(&self) -> bool {
    self.result.is_terminal()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_build_has_ordered_pending_steps() {
    let build = Build::new(Environment::Dev, "5.2.0", 7, &["prep", "sources", "build"]);

    assert_eq!(build.result, BuildResult::Pending);
    assert_eq!(build.steps.len(), 3);
    for (i, step) in build.steps.iter().enumerate() {
      assert_eq!(step.index, i);
      assert_eq!(step.result, BuildResult::Pending);
    }
    assert_eq!(build.steps[1].name, "sources");
    assert_eq!(build.display_name(), "5.2.0.7 (dev)");
  }

  #[test]
  fn build_ids_are_unique() {
    let a = Build::new(Environment::Dev, "1.0.0", 1, &["prep"]);
    let b = Build::new(Environment::Dev, "1.0.0", 1, &["prep"]);
    assert_ne!(a.id, b.id);
  }

  #[test]
  fn environment_parses_case_insensitively() {
    assert_eq!("RC".parse::<Environment>().unwrap(), Environment::Rc);
    assert_eq!("release".parse::<Environment>().unwrap(), Environment::Release);
    assert!("staging".parse::<Environment>().is_err());
    assert!(Environment::Rc.is_release());
    assert!(!Environment::Dev.is_release());
  }

  #[test]
  fn result_terminal_states() {
    assert!(!BuildResult::Pending.is_terminal());
    assert!(!BuildResult::Running.is_terminal());
    assert!(BuildResult::Cancelled.is_terminal());
    assert!(BuildResult::Skipped.is_ok());
    assert!(!BuildResult::Failed.is_ok());
  }

  #[test]
  fn step_record_serializes_persisted_shape() {
    let mut step = StepRecord::new("sign", 4);
    step.logs.push(LogEntry::new("Signed 1 of 2 files", LogTag::Info));
    let value = serde_json::to_value(&step).unwrap();

    assert_eq!(value["name"], "sign");
    assert_eq!(value["index"], 4);
    assert_eq!(value["result"], "pending");
    assert_eq!(value["logs"][0]["tag"], "info");
    assert!(value.get("started_at").is_none());
  }
}
