//! Build processor: runs one build's steps in order.
//!
//! The processor's only observable effects are the persisted build and the
//! step logs flushed while it runs. Store failures are logged, never raised.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::build::{Build, BuildResult, BuildStore, LogEntry, LogTag, StepRecord, StoreError};
use crate::step::{BuildInfo, BuildState, StepContext, StepLogger, StepRegistry, StepServices, StepState, StepUpdate, run_step};

pub struct BuildProcessor {
  store: Arc<dyn BuildStore>,
  registry: Arc<StepRegistry>,
  services: StepServices,
  observer: Option<StepUpdate>,
}

impl std::fmt::Debug for BuildProcessor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildProcessor")
      .field("registry", &self.registry)
      .field("services", &self.services)
      .finish_non_exhaustive()
  }
}

impl BuildProcessor {
  pub fn new(store: Arc<dyn BuildStore>, registry: Arc<StepRegistry>, services: StepServices) -> Self {
    Self {
      store,
      registry,
      services,
      observer: None,
    }
  }

  /// Also send every step flush to `observer`, after it is persisted.
  pub fn observer(mut self, observer: StepUpdate) -> Self {
    self.observer = Some(observer);
    self
  }

  pub fn store(&self) -> &Arc<dyn BuildStore> {
    &self.store
  }

  pub fn registry(&self) -> &StepRegistry {
    &self.registry
  }

  fn persist(&self, build: &Build) {
    let result = match self.store.update(build) {
      Err(StoreError::NotFound(_)) => self.store.create(build),
      other => other,
    };
    if let Err(e) = result {
      error!(build_id = %build.id, error = %e, "failed to persist build");
    }
  }

  fn step_update(&self, build_id: &str) -> StepUpdate {
    let store = self.store.clone();
    let observer = self.observer.clone();
    let build_id = build_id.to_string();
    Arc::new(move |record: &StepRecord| {
      if let Err(e) = store.update_step(&build_id, record) {
        warn!(build_id = %build_id, step = %record.name, error = %e, "failed to persist step");
      }
      if let Some(observer) = &observer {
        observer(record);
      }
    })
  }

  /// Run `build` to a terminal result.
  ///
  /// Steps run strictly in index order. The first step that fails or is
  /// cancelled decides the build's result and later steps never start.
  pub async fn process_build(&self, mut build: Build, cancel: CancellationToken) {
    info!(build = %build.display_name(), build_id = %build.id, steps = build.steps.len(), "build started");
    build.result = BuildResult::Running;
    build.started_at = Some(Utc::now());
    self.persist(&build);

    let info = BuildInfo::from(&build);
    let mut state = BuildState::default();
    let update = self.step_update(&build.id);
    let mut warned = false;
    let mut outcome = None;

    for index in 0..build.steps.len() {
      let record = build.steps[index].clone();
      let mut logger = StepLogger::new(record, update.clone());

      let step_state = match self.registry.create(&build.steps[index].name) {
        Ok(mut step) => {
          let capabilities = step.capabilities();
          let mut ctx = StepContext::new(
            &info,
            &mut state,
            &mut logger,
            &self.services,
            cancel.clone(),
            capabilities,
          );
          run_step(step.as_mut(), &mut ctx).await
        }
        Err(e) => {
          logger.start();
          logger.fail(&e);
          StepState::Failed
        }
      };

      build.steps[index] = logger.into_record();
      if state.commit.is_some() {
        build.commit = state.commit.clone();
      }

      match step_state {
        StepState::Failed => {
          outcome = Some(BuildResult::Failed);
          break;
        }
        StepState::Cancelled => {
          outcome = Some(BuildResult::Cancelled);
          break;
        }
        StepState::Warning => warned = true,
        _ => {}
      }
    }

    build.result = match outcome {
      Some(result) => result,
      None if warned => BuildResult::Warning,
      None => BuildResult::Success,
    };
    build.finished_at = Some(Utc::now());
    self.persist(&build);
    info!(build = %build.display_name(), build_id = %build.id, result = %build.result, "build finished");
  }

  /// Fail a build whose run ended without reaching a result, e.g. because a
  /// step panicked. The step that was running records `reason`.
  pub fn abort_build(&self, build_id: &str, reason: &str) {
    let mut build = match self.store.get(build_id) {
      Ok(Some(build)) => build,
      Ok(None) => {
        error!(build_id = %build_id, "aborted build is not in the store");
        return;
      }
      Err(e) => {
        error!(build_id = %build_id, error = %e, "failed to load aborted build");
        return;
      }
    };

    let now = Utc::now();
    if let Some(step) = build.steps.iter_mut().find(|s| s.result == BuildResult::Running) {
      step.logs.push(LogEntry::new(reason, LogTag::Error));
      step.result = BuildResult::Failed;
      step.finished_at = Some(now);
    }
    build.result = BuildResult::Failed;
    build.finished_at = Some(now);
    self.persist(&build);
    warn!(build = %build.display_name(), build_id = %build.id, reason, "build aborted");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::{Environment, MemoryBuildStore};
  use crate::config::MemoryVariables;
  use crate::platform::BuildPaths;
  use crate::step::{BuildStep, StepError};
  use async_trait::async_trait;
  use std::sync::Mutex;

  struct Fixed {
    name: &'static str,
    outcome: fn() -> Result<(), StepError>,
  }

  #[async_trait]
  impl BuildStep for Fixed {
    fn name(&self) -> &str {
      self.name
    }

    async fn process(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
      ctx.log.log("working");
      (self.outcome)()
    }
  }

  fn registry() -> Arc<StepRegistry> {
    let mut registry = StepRegistry::new();
    registry.register("ok", || Box::new(Fixed { name: "ok", outcome: || Ok(()) }));
    registry.register("boom", || {
      Box::new(Fixed {
        name: "boom",
        outcome: || Err(StepError::Other("boom".into())),
      })
    });
    Arc::new(registry)
  }

  fn processor(store: Arc<MemoryBuildStore>) -> BuildProcessor {
    let temp = std::env::temp_dir();
    let services = StepServices::new(Arc::new(MemoryVariables::new()), BuildPaths::new(temp));
    BuildProcessor::new(store, registry(), services)
  }

  async fn run(steps: &[&str], cancel: CancellationToken) -> Build {
    let store = Arc::new(MemoryBuildStore::new());
    let build = Build::new(Environment::Dev, "1.0.0", 1, steps);
    let id = build.id.clone();
    processor(store.clone()).process_build(build, cancel).await;
    store.get(&id).unwrap().unwrap()
  }

  #[tokio::test]
  async fn all_steps_succeed() {
    let build = run(&["ok", "ok"], CancellationToken::new()).await;
    assert_eq!(build.result, BuildResult::Success);
    assert!(build.steps.iter().all(|s| s.result == BuildResult::Success));
    assert!(build.started_at.is_some() && build.finished_at.is_some());
  }

  #[tokio::test]
  async fn failure_stops_the_build() {
    let build = run(&["ok", "boom", "ok"], CancellationToken::new()).await;

    assert_eq!(build.result, BuildResult::Failed);
    assert_eq!(build.steps[0].result, BuildResult::Success);
    assert_eq!(build.steps[1].result, BuildResult::Failed);
    assert_eq!(build.steps[2].result, BuildResult::Pending);
    assert!(build.steps[2].logs.is_empty());
  }

  #[tokio::test]
  async fn unknown_step_fails_the_build() {
    let build = run(&["ok", "compile"], CancellationToken::new()).await;
    assert_eq!(build.result, BuildResult::Failed);
    assert!(build.steps[1].log_text().iter().any(|l| l.contains("compile")));
  }

  #[tokio::test]
  async fn cancelled_token_cancels_first_step() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let build = run(&["ok", "ok"], cancel).await;

    assert_eq!(build.result, BuildResult::Cancelled);
    assert_eq!(build.steps[0].result, BuildResult::Cancelled);
    assert_eq!(build.steps[1].result, BuildResult::Pending);
  }

  #[tokio::test]
  async fn observer_sees_every_flush() {
    let store = Arc::new(MemoryBuildStore::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let processor = processor(store).observer(Arc::new(move |record: &StepRecord| {
      sink.lock().unwrap().push((record.index, record.result));
    }));

    processor
      .process_build(Build::new(Environment::Dev, "1.0.0", 1, &["ok"]), CancellationToken::new())
      .await;

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec![(0, BuildResult::Running), (0, BuildResult::Success)]);
  }
}
