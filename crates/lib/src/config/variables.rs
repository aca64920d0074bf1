//! Typed key/value configuration consumed by steps.
//!
//! Tool paths, certificate/key names and force-rebuild flags are all
//! variables. Steps read them through the [`Variables`] accessors, which turn
//! a missing key or a value of the wrong type into a [`ConfigError`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
  Bool(bool),
  Integer(i64),
  String(String),
  Path(PathBuf),
  List(Vec<VariableValue>),
}

impl VariableValue {
  fn type_name(&self) -> &'static str {
    match self {
      VariableValue::Bool(_) => "bool",
      VariableValue::Integer(_) => "integer",
      VariableValue::String(_) => "string",
      VariableValue::Path(_) => "path",
      VariableValue::List(_) => "list",
    }
  }
}

impl From<bool> for VariableValue {
  fn from(v: bool) -> Self {
    VariableValue::Bool(v)
  }
}

impl From<i64> for VariableValue {
  fn from(v: i64) -> Self {
    VariableValue::Integer(v)
  }
}

impl From<&str> for VariableValue {
  fn from(v: &str) -> Self {
    VariableValue::String(v.to_string())
  }
}

impl From<String> for VariableValue {
  fn from(v: String) -> Self {
    VariableValue::String(v)
  }
}

impl From<PathBuf> for VariableValue {
  fn from(v: PathBuf) -> Self {
    VariableValue::Path(v)
  }
}

fn wrong_type(key: &str, expected: &'static str, value: &VariableValue) -> ConfigError {
  ConfigError::WrongType {
    key: key.to_string(),
    expected,
    actual: value.type_name(),
  }
}

/// Read access to the variables store.
pub trait Variables: Send + Sync {
  fn get(&self, key: &str) -> Option<VariableValue>;

  fn string(&self, key: &str) -> Result<String, ConfigError> {
    match self.get(key) {
      Some(VariableValue::String(s)) => Ok(s),
      Some(VariableValue::Path(p)) => Ok(p.to_string_lossy().into_owned()),
      Some(other) => Err(wrong_type(key, "string", &other)),
      None => Err(ConfigError::MissingVariable(key.to_string())),
    }
  }

  fn string_or(&self, key: &str, default: &str) -> Result<String, ConfigError> {
    match self.string(key) {
      Err(ConfigError::MissingVariable(_)) => Ok(default.to_string()),
      other => other,
    }
  }

  fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
    match self.get(key) {
      Some(VariableValue::Bool(b)) => Ok(b),
      Some(other) => Err(wrong_type(key, "bool", &other)),
      None => Ok(default),
    }
  }

  fn integer_or(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
    match self.get(key) {
      Some(VariableValue::Integer(i)) => Ok(i),
      Some(other) => Err(wrong_type(key, "integer", &other)),
      None => Ok(default),
    }
  }

  fn path(&self, key: &str) -> Result<PathBuf, ConfigError> {
    match self.get(key) {
      Some(VariableValue::Path(p)) => Ok(p),
      Some(VariableValue::String(s)) => Ok(PathBuf::from(s)),
      Some(other) => Err(wrong_type(key, "path", &other)),
      None => Err(ConfigError::MissingVariable(key.to_string())),
    }
  }

  /// A non-negative integer number of seconds.
  fn duration_secs_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match self.get(key) {
      Some(VariableValue::Integer(i)) if i >= 0 => Ok(Duration::from_secs(i as u64)),
      Some(other) => Err(wrong_type(key, "non-negative integer", &other)),
      None => Ok(default),
    }
  }
}

/// Variables held in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryVariables {
  values: BTreeMap<String, VariableValue>,
}

impl MemoryVariables {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&mut self, key: impl Into<String>, value: impl Into<VariableValue>) -> &mut Self {
    self.values.insert(key.into(), value.into());
    self
  }

  pub fn with(mut self, key: impl Into<String>, value: impl Into<VariableValue>) -> Self {
    self.set(key, value);
    self
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.values.keys().map(String::as_str)
  }
}

impl From<BTreeMap<String, VariableValue>> for MemoryVariables {
  fn from(values: BTreeMap<String, VariableValue>) -> Self {
    Self { values }
  }
}

impl Variables for MemoryVariables {
  fn get(&self, key: &str) -> Option<VariableValue> {
    self.values.get(key).cloned()
  }
}
