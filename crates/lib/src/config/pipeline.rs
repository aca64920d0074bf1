//! `modpack.toml` loading.
//!
//! ```toml
//! root = "/srv/modpack"
//! workers = 4
//!
//! [variables]
//! SOURCES_URL = "https://git.example.org/modpack.git"
//! BUILD_TOOL = "/opt/tools/build"
//! BUILD_FORCE = false
//!
//! [pipelines]
//! dev = ["prep", "sources", "build", "sign", "deploy"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use super::{ConfigError, MemoryVariables};
use crate::build::Environment;
use crate::consts::ROOT_ENV_VAR;
use crate::platform::BuildPaths;
use crate::platform::paths::build_root;
use crate::step::{StepRegistry, standard_pipeline};

/// Default configuration file name.
pub const CONFIG_FILE: &str = "modpack.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
  /// Build environment root. Relative paths are resolved against the
  /// directory of the configuration file.
  #[serde(default)]
  pub root: Option<PathBuf>,
  /// Worker count for bounded-parallel file operations.
  #[serde(default)]
  pub workers: Option<usize>,
  #[serde(default)]
  pub variables: MemoryVariables,
  #[serde(default)]
  pipelines: BTreeMap<String, Vec<String>>,
}

impl FromStr for PipelineConfig {
  type Err = toml::de::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    toml::from_str(s)
  }
}

impl PipelineConfig {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let mut config: PipelineConfig = content.parse().map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    if let Some(root) = &config.root
      && root.is_relative()
      && let Some(dir) = path.parent()
    {
      config.root = Some(dir.join(root));
    }

    debug!(path = %path.display(), pipelines = config.pipelines.len(), "loaded configuration");
    Ok(config)
  }

  /// Ordered step names for `env`; the standard pipeline when not configured.
  pub fn pipeline(&self, env: Environment) -> Vec<String> {
    match self.pipelines.get(env.as_str()) {
      Some(steps) => steps.clone(),
      None => standard_pipeline(env).iter().map(|kind| kind.name().to_string()).collect(),
    }
  }

  /// Check every configured pipeline against `registry`.
  pub fn validate(&self, registry: &StepRegistry) -> Result<(), ConfigError> {
    for (env, steps) in &self.pipelines {
      if env.parse::<Environment>().is_err() {
        return Err(ConfigError::UnknownEnvironment(env.clone()));
      }
      if steps.is_empty() {
        return Err(ConfigError::EmptyPipeline(env.clone()));
      }
      if let Some(step) = steps.iter().find(|step| !registry.contains(step)) {
        return Err(ConfigError::UnknownStep {
          environment: env.clone(),
          step: step.clone(),
        });
      }
    }
    Ok(())
  }

  /// Build environment paths. `$MODPACK_ROOT` wins over `root`.
  pub fn paths(&self) -> BuildPaths {
    if std::env::var_os(ROOT_ENV_VAR).is_none()
      && let Some(root) = &self.root
    {
      return BuildPaths::new(root);
    }
    BuildPaths::new(build_root())
  }
}
