//! Persistence of build records.
//!
//! The engine only needs create/update/get and single-step updates; the
//! storage behind them belongs to the embedding application.
//!
//! # File layout
//!
//! ```text
//! {base}/
//! └── <build id>.json
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::RwLock;

use thiserror::Error;
use tracing::debug;

use super::types::{Build, StepRecord};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("build not found: {0}")]
  NotFound(String),

  #[error("build {build_id} has no step at index {index}")]
  StepNotFound { build_id: String, index: usize },

  #[error("build already exists: {0}")]
  AlreadyExists(String),

  #[error("failed to create store directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read build record: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write build record: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse build record: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize build record: {0}")]
  Serialize(#[source] serde_json::Error),
}

/// Store of build records.
pub trait BuildStore: Send + Sync {
  fn create(&self, build: &Build) -> Result<(), StoreError>;
  fn update(&self, build: &Build) -> Result<(), StoreError>;
  fn get(&self, id: &str) -> Result<Option<Build>, StoreError>;
  /// Replace the step at `step.index` of build `build_id`.
  fn update_step(&self, build_id: &str, step: &StepRecord) -> Result<(), StoreError>;
  /// All builds, oldest first.
  fn list(&self) -> Result<Vec<Build>, StoreError>;
}

fn replace_step(build: &mut Build, step: &StepRecord) -> Result<(), StoreError> {
  let slot = build.steps.get_mut(step.index).ok_or_else(|| StoreError::StepNotFound {
    build_id: build.id.clone(),
    index: step.index,
  })?;
  *slot = step.clone();
  Ok(())
}

/// In-memory store, used by tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryBuildStore {
  builds: RwLock<HashMap<String, Build>>,
}

impl MemoryBuildStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl BuildStore for MemoryBuildStore {
  fn create(&self, build: &Build) -> Result<(), StoreError> {
    let mut builds = self.builds.write().unwrap_or_else(|p| p.into_inner());
    if builds.contains_key(&build.id) {
      return Err(StoreError::AlreadyExists(build.id.clone()));
    }
    builds.insert(build.id.clone(), build.clone());
    Ok(())
  }

  fn update(&self, build: &Build) -> Result<(), StoreError> {
    let mut builds = self.builds.write().unwrap_or_else(|p| p.into_inner());
    match builds.get_mut(&build.id) {
      Some(existing) => {
        *existing = build.clone();
        Ok(())
      }
      None => Err(StoreError::NotFound(build.id.clone())),
    }
  }

  fn get(&self, id: &str) -> Result<Option<Build>, StoreError> {
    let builds = self.builds.read().unwrap_or_else(|p| p.into_inner());
    Ok(builds.get(id).cloned())
  }

  fn update_step(&self, build_id: &str, step: &StepRecord) -> Result<(), StoreError> {
    let mut builds = self.builds.write().unwrap_or_else(|p| p.into_inner());
    let build = builds
      .get_mut(build_id)
      .ok_or_else(|| StoreError::NotFound(build_id.to_string()))?;
    replace_step(build, step)
  }

  fn list(&self) -> Result<Vec<Build>, StoreError> {
    let builds = self.builds.read().unwrap_or_else(|p| p.into_inner());
    let mut all: Vec<Build> = builds.values().cloned().collect();
    all.sort_by_key(|b| b.queued_at);
    Ok(all)
  }
}

/// One JSON file per build, written atomically.
#[derive(Debug)]
pub struct FileBuildStore {
  base_path: PathBuf,
  // Serializes read-modify-write of step updates.
  lock: std::sync::Mutex<()>,
}

impl FileBuildStore {
  pub fn new(base_path: PathBuf) -> Self {
    Self {
      base_path,
      lock: std::sync::Mutex::new(()),
    }
  }

  pub fn base_path(&self) -> &PathBuf {
    &self.base_path
  }

  fn build_path(&self, id: &str) -> PathBuf {
    self.base_path.join(format!("{}.json", id))
  }

  fn write(&self, build: &Build) -> Result<(), StoreError> {
    fs::create_dir_all(&self.base_path).map_err(StoreError::CreateDir)?;

    let path = self.build_path(&build.id);
    let temp_path = self.base_path.join(format!("{}.json.tmp", build.id));
    let content = serde_json::to_string_pretty(build).map_err(StoreError::Serialize)?;
    fs::write(&temp_path, content).map_err(StoreError::Write)?;
    fs::rename(&temp_path, &path).map_err(StoreError::Write)?;

    debug!(path = %path.display(), "saved build record");
    Ok(())
  }

  fn read(&self, id: &str) -> Result<Option<Build>, StoreError> {
    let content = match fs::read_to_string(self.build_path(id)) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(StoreError::Read(e)),
    };
    serde_json::from_str(&content).map(Some).map_err(StoreError::Parse)
  }
}

impl BuildStore for FileBuildStore {
  fn create(&self, build: &Build) -> Result<(), StoreError> {
    let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
    if self.build_path(&build.id).exists() {
      return Err(StoreError::AlreadyExists(build.id.clone()));
    }
    self.write(build)
  }

  fn update(&self, build: &Build) -> Result<(), StoreError> {
    let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
    if !self.build_path(&build.id).exists() {
      return Err(StoreError::NotFound(build.id.clone()));
    }
    self.write(build)
  }

  fn get(&self, id: &str) -> Result<Option<Build>, StoreError> {
    self.read(id)
  }

  fn update_step(&self, build_id: &str, step: &StepRecord) -> Result<(), StoreError> {
    let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
    let mut build = self
      .read(build_id)?
      .ok_or_else(|| StoreError::NotFound(build_id.to_string()))?;
    replace_step(&mut build, step)?;
    self.write(&build)
  }

  fn list(&self) -> Result<Vec<Build>, StoreError> {
    let entries = match fs::read_dir(&self.base_path) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(StoreError::Read(e)),
    };

    let mut all = Vec::new();
    for entry in entries {
      let path = entry.map_err(StoreError::Read)?.path();
      if path.extension().is_some_and(|ext| ext == "json")
        && let Some(id) = path.file_stem().and_then(|s| s.to_str())
        && let Some(build) = self.read(id)?
      {
        all.push(build);
      }
    }
    all.sort_by_key(|b| b.queued_at);
    Ok(all)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::types::{BuildResult, Environment, LogEntry, LogTag};
  use tempfile::TempDir;

  fn sample() -> Build {
    Build::new(Environment::Dev, "1.0.0", 3, &["prep", "build"])
  }

  fn exercise(store: &dyn BuildStore) {
    let mut build = sample();
    store.create(&build).unwrap();
    assert!(matches!(store.create(&build), Err(StoreError::AlreadyExists(_))));

    build.result = BuildResult::Running;
    store.update(&build).unwrap();

    let mut step = build.steps[1].clone();
    step.result = BuildResult::Success;
    step.logs.push(LogEntry::new("done", LogTag::Success));
    store.update_step(&build.id, &step).unwrap();

    let loaded = store.get(&build.id).unwrap().unwrap();
    assert_eq!(loaded.result, BuildResult::Running);
    assert_eq!(loaded.steps[1].result, BuildResult::Success);
    assert_eq!(loaded.steps[1].log_text(), vec!["done"]);
    assert_eq!(loaded.steps[0].result, BuildResult::Pending);

    let bad = crate::build::types::StepRecord::new("ghost", 9);
    assert!(matches!(
      store.update_step(&build.id, &bad),
      Err(StoreError::StepNotFound { index: 9, .. })
    ));
    assert!(matches!(store.update_step("missing", &step), Err(StoreError::NotFound(_))));
    assert!(store.get("missing").unwrap().is_none());
    assert_eq!(store.list().unwrap().len(), 1);
  }

  #[test]
  fn memory_store_round_trip() {
    exercise(&MemoryBuildStore::new());
  }

  #[test]
  fn file_store_round_trip() {
    let temp = TempDir::new().unwrap();
    let store = FileBuildStore::new(temp.path().join("builds"));
    exercise(&store);
    assert!(!store.base_path().join("x.json.tmp").exists());
  }

  #[test]
  fn file_store_update_requires_existing() {
    let temp = TempDir::new().unwrap();
    let store = FileBuildStore::new(temp.path().to_path_buf());
    assert!(matches!(store.update(&sample()), Err(StoreError::NotFound(_))));
  }

  #[test]
  fn file_store_list_empty_when_missing_dir() {
    let temp = TempDir::new().unwrap();
    let store = FileBuildStore::new(temp.path().join("nope"));
    assert!(store.list().unwrap().is_empty());
  }
}
