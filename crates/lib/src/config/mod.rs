//! Variables store and pipeline configuration.

mod pipeline;
mod variables;

use std::path::PathBuf;

use thiserror::Error;

pub use pipeline::{CONFIG_FILE, PipelineConfig};
pub use variables::{MemoryVariables, VariableValue, Variables};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("variable '{0}' is not set")]
  MissingVariable(String),

  #[error("variable '{key}' should be {expected}, found {actual}")]
  WrongType {
    key: String,
    expected: &'static str,
    actual: &'static str,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("unknown environment '{0}' in [pipelines]")]
  UnknownEnvironment(String),

  #[error("pipeline '{environment}' names unknown step '{step}'")]
  UnknownStep { environment: String, step: String },

  #[error("pipeline '{0}' has no steps")]
  EmptyPipeline(String),
}
