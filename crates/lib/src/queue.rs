//! Single-worker FIFO build queue.
//!
//! Every queued build gets a cancellation handle kept in a registry owned by
//! the queue and removed when the build finishes. One worker drains the queue
//! and runs exactly one build at a time, so no two builds' external processes
//! ever touch the shared build environment concurrently.
//!
//! While the [`ResourceGuard`] reports a conflicting resource (e.g. a live
//! game server), the worker re-enqueues the build it dequeued and backs off.
//! This is not starvation-free: a resource that never goes away defers every
//! build forever.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::build::{Build, StoreError};
use crate::processor::BuildProcessor;

/// Delay before retrying a build deferred by the resource guard.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum QueueError {
  #[error("build {0} is already queued")]
  Duplicate(String),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// An external resource whose activity must defer builds.
pub trait ResourceGuard: Send + Sync {
  fn is_active(&self) -> bool;

  fn describe(&self) -> String {
    "external resource".to_string()
  }
}

/// Never reports a conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConflict;

impl ResourceGuard for NoConflict {
  fn is_active(&self) -> bool {
    false
  }
}

/// Active while a pid or lock file exists, e.g. one written by a running
/// game server.
#[derive(Debug, Clone)]
pub struct PidFileGuard {
  path: PathBuf,
}

impl PidFileGuard {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

impl ResourceGuard for PidFileGuard {
  fn is_active(&self) -> bool {
    self.path.exists()
  }

  fn describe(&self) -> String {
    format!("instance holding {}", self.path.display())
  }
}

#[derive(Default)]
struct QueueState {
  pending: VecDeque<Build>,
  handles: HashMap<String, CancellationToken>,
  draining: bool,
}

struct Inner {
  processor: Arc<BuildProcessor>,
  guard: Arc<dyn ResourceGuard>,
  backoff: Duration,
  state: Mutex<QueueState>,
  idle: watch::Sender<bool>,
}

impl Inner {
  fn lock(&self) -> MutexGuard<'_, QueueState> {
    self.state.lock().unwrap_or_else(|p| p.into_inner())
  }
}

#[derive(Clone)]
pub struct BuildQueue {
  inner: Arc<Inner>,
}

impl std::fmt::Debug for BuildQueue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildQueue")
      .field("pending", &self.pending())
      .field("backoff", &self.inner.backoff)
      .finish_non_exhaustive()
  }
}

impl BuildQueue {
  pub fn new(processor: Arc<BuildProcessor>) -> Self {
    Self::with_guard(processor, Arc::new(NoConflict), DEFAULT_BACKOFF)
  }

  pub fn with_guard(processor: Arc<BuildProcessor>, guard: Arc<dyn ResourceGuard>, backoff: Duration) -> Self {
    let (idle, _) = watch::channel(true);
    Self {
      inner: Arc::new(Inner {
        processor,
        guard,
        backoff,
        state: Mutex::new(QueueState::default()),
        idle,
      }),
    }
  }

  /// Append `build` and start a worker if none is draining the queue.
  ///
  /// Must be called from within a tokio runtime.
  pub fn queue_build(&self, build: Build) -> Result<String, QueueError> {
    let id = build.id.clone();
    if self.inner.lock().handles.contains_key(&id) {
      return Err(QueueError::Duplicate(id));
    }
    self.inner.processor.store().create(&build)?;

    let mut state = self.inner.lock();
    state.handles.insert(id.clone(), CancellationToken::new());
    info!(build = %build.display_name(), build_id = %id, position = state.pending.len(), "build queued");
    state.pending.push_back(build);

    if !state.draining {
      state.draining = true;
      self.inner.idle.send_replace(false);
      tokio::spawn(drain(self.inner.clone()));
    }
    Ok(id)
  }

  /// Signal the build's handle. Returns false if the build is unknown or
  /// already finished.
  pub fn cancel(&self, id: &str) -> bool {
    match self.inner.lock().handles.get(id) {
      Some(token) => {
        info!(build_id = %id, "cancelling build");
        token.cancel();
        true
      }
      None => false,
    }
  }

  /// Signal and forget every handle, queued and running.
  pub fn cancel_all(&self) {
    let mut state = self.inner.lock();
    info!(builds = state.handles.len(), "cancelling all builds");
    for token in state.handles.values() {
      token.cancel();
    }
    state.handles.clear();
  }

  /// Ids of builds waiting to run, in queue order.
  pub fn pending(&self) -> Vec<String> {
    self.inner.lock().pending.iter().map(|b| b.id.clone()).collect()
  }

  /// Resolves once the queue is empty and no worker is running.
  pub async fn wait_idle(&self) {
    let mut idle = self.inner.idle.subscribe();
    let _ = idle.wait_for(|idle| *idle).await;
  }
}

fn join_failure(e: JoinError) -> String {
  match e.try_into_panic() {
    Ok(payload) => payload
      .downcast_ref::<&str>()
      .map(|s| s.to_string())
      .or_else(|| payload.downcast_ref::<String>().cloned())
      .unwrap_or_else(|| "step panicked".to_string()),
    Err(e) => e.to_string(),
  }
}

async fn drain(inner: Arc<Inner>) {
  debug!("queue worker started");
  loop {
    let (build, cancel) = {
      let mut state = inner.lock();
      let Some(build) = state.pending.pop_front() else {
        state.draining = false;
        inner.idle.send_replace(true);
        debug!("queue worker idle");
        return;
      };
      // No handle means cancel_all cleared it while the build was queued
      let cancel = state.handles.get(&build.id).cloned().unwrap_or_else(|| {
        let token = CancellationToken::new();
        token.cancel();
        token
      });
      (build, cancel)
    };

    if !cancel.is_cancelled() && inner.guard.is_active() {
      info!(
        build_id = %build.id,
        resource = %inner.guard.describe(),
        backoff_secs = inner.backoff.as_secs_f64(),
        "resource active, deferring build"
      );
      inner.lock().pending.push_back(build);
      tokio::select! {
        _ = tokio::time::sleep(inner.backoff) => {}
        _ = cancel.cancelled() => {}
      }
      continue;
    }

    // A panicking step must not take the worker down with it
    let id = build.id.clone();
    let processor = inner.processor.clone();
    let run = tokio::spawn(async move { processor.process_build(build, cancel).await });
    if let Err(e) = run.await {
      let message = join_failure(e);
      error!(build_id = %id, error = %message, "build task failed");
      inner.processor.abort_build(&id, &format!("Build aborted: {message}"));
    }
    inner.lock().handles.remove(&id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::{BuildResult, BuildStore, Environment, MemoryBuildStore};
  use crate::config::MemoryVariables;
  use crate::platform::BuildPaths;
  use crate::step::{BuildStep, StepContext, StepError, StepRegistry, StepServices};
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  #[derive(Default)]
  struct Tally {
    order: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
  }

  struct Record(Arc<Tally>);

  #[async_trait]
  impl BuildStep for Record {
    fn name(&self) -> &str {
      "record"
    }

    async fn process(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
      let now = self.0.active.fetch_add(1, Ordering::SeqCst) + 1;
      self.0.peak.fetch_max(now, Ordering::SeqCst);
      self.0.order.lock().unwrap().push(ctx.build.version.clone());
      tokio::time::sleep(Duration::from_millis(30)).await;
      self.0.active.fetch_sub(1, Ordering::SeqCst);
      Ok(())
    }
  }

  struct Wait;

  #[async_trait]
  impl BuildStep for Wait {
    fn name(&self) -> &str {
      "wait"
    }

    async fn process(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
      let command = crate::util::testutil::sh("sleep 30");
      ctx.run(command, crate::step::StderrPolicy::Log).await
    }
  }

  struct Explode;

  #[async_trait]
  impl BuildStep for Explode {
    fn name(&self) -> &str {
      "explode"
    }

    async fn process(&mut self, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
      panic!("step exploded");
    }
  }

  struct Switch(AtomicBool);

  impl ResourceGuard for Switch {
    fn is_active(&self) -> bool {
      self.0.load(Ordering::SeqCst)
    }
  }

  fn setup(guard: Arc<dyn ResourceGuard>) -> (BuildQueue, Arc<MemoryBuildStore>, Arc<Tally>) {
    setup_with_backoff(guard, Duration::from_millis(20))
  }

  fn setup_with_backoff(
    guard: Arc<dyn ResourceGuard>,
    backoff: Duration,
  ) -> (BuildQueue, Arc<MemoryBuildStore>, Arc<Tally>) {
    let tally = Arc::new(Tally::default());
    let mut registry = StepRegistry::new();
    let p = tally.clone();
    registry.register("record", move || Box::new(Record(p.clone())));
    registry.register("wait", || Box::new(Wait));
    registry.register("explode", || Box::new(Explode));

    let store = Arc::new(MemoryBuildStore::new());
    let services = StepServices::new(Arc::new(MemoryVariables::new()), BuildPaths::new(std::env::temp_dir()));
    let processor = Arc::new(BuildProcessor::new(store.clone(), Arc::new(registry), services));
    let queue = BuildQueue::with_guard(processor, guard, backoff);
    (queue, store, tally)
  }

  fn build(version: &str, steps: &[&str]) -> Build {
    Build::new(Environment::Dev, version, 1, steps)
  }

  #[tokio::test]
  async fn builds_run_one_at_a_time_in_fifo_order() {
    let (queue, store, tally) = setup(Arc::new(NoConflict));

    let first = queue.queue_build(build("1.0.0", &["record"])).unwrap();
    let second = queue.queue_build(build("2.0.0", &["record"])).unwrap();
    queue.wait_idle().await;

    assert_eq!(*tally.order.lock().unwrap(), vec!["1.0.0", "2.0.0"]);
    assert_eq!(tally.peak.load(Ordering::SeqCst), 1);
    for id in [first, second] {
      assert_eq!(store.get(&id).unwrap().unwrap().result, BuildResult::Success);
    }
    assert!(!queue.cancel("anything"));
  }

  #[tokio::test]
  async fn duplicate_build_is_rejected() {
    let (queue, _, _) = setup(Arc::new(NoConflict));
    let b = build("1.0.0", &["record"]);
    queue.queue_build(b.clone()).unwrap();
    assert!(matches!(queue.queue_build(b), Err(QueueError::Duplicate(_))));
    queue.wait_idle().await;
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn cancel_kills_the_running_build() {
    let (queue, store, _) = setup(Arc::new(NoConflict));
    let id = queue.queue_build(build("1.0.0", &["wait", "record"])).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(queue.cancel(&id));
    tokio::time::timeout(Duration::from_secs(10), queue.wait_idle())
      .await
      .unwrap();

    let done = store.get(&id).unwrap().unwrap();
    assert_eq!(done.result, BuildResult::Cancelled);
    assert_eq!(done.steps[0].result, BuildResult::Cancelled);
    assert_eq!(done.steps[1].result, BuildResult::Pending);
    assert!(!queue.cancel(&id), "handle removed once finished");
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn cancel_all_cancels_queued_builds() {
    let (queue, store, tally) = setup(Arc::new(NoConflict));
    let running = queue.queue_build(build("1.0.0", &["wait"])).unwrap();
    let queued = queue.queue_build(build("2.0.0", &["record"])).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.pending(), vec![queued.clone()]);
    queue.cancel_all();
    tokio::time::timeout(Duration::from_secs(10), queue.wait_idle())
      .await
      .unwrap();

    assert_eq!(store.get(&running).unwrap().unwrap().result, BuildResult::Cancelled);
    assert_eq!(store.get(&queued).unwrap().unwrap().result, BuildResult::Cancelled);
    assert!(tally.order.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn active_resource_defers_builds() {
    let switch = Arc::new(Switch(AtomicBool::new(true)));
    let (queue, store, tally) = setup(switch.clone());
    let id = queue.queue_build(build("1.0.0", &["record"])).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(tally.order.lock().unwrap().is_empty());
    assert_eq!(store.get(&id).unwrap().unwrap().result, BuildResult::Pending);

    switch.0.store(false, Ordering::SeqCst);
    tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
      .await
      .unwrap();
    assert_eq!(store.get(&id).unwrap().unwrap().result, BuildResult::Success);
  }

  #[tokio::test]
  async fn cancelling_a_deferred_build_skips_the_backoff() {
    let switch = Arc::new(Switch(AtomicBool::new(true)));
    let (queue, store, tally) = setup_with_backoff(switch, Duration::from_secs(600));
    let id = queue.queue_build(build("1.0.0", &["record"])).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.pending(), vec![id.clone()]);
    assert!(queue.cancel(&id));
    tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
      .await
      .unwrap();

    let done = store.get(&id).unwrap().unwrap();
    assert_eq!(done.result, BuildResult::Cancelled);
    assert!(tally.order.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn panicking_step_fails_its_build_and_the_queue_moves_on() {
    let (queue, store, tally) = setup(Arc::new(NoConflict));
    let broken = queue.queue_build(build("1.0.0", &["explode", "record"])).unwrap();
    let next = queue.queue_build(build("2.0.0", &["record"])).unwrap();

    tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
      .await
      .unwrap();

    let done = store.get(&broken).unwrap().unwrap();
    assert_eq!(done.result, BuildResult::Failed);
    assert_eq!(done.steps[0].result, BuildResult::Failed);
    assert!(done.steps[0].log_text().iter().any(|l| l.contains("step exploded")));
    assert_eq!(done.steps[1].result, BuildResult::Pending);
    assert_eq!(store.get(&next).unwrap().unwrap().result, BuildResult::Success);
    assert_eq!(*tally.order.lock().unwrap(), vec!["2.0.0"]);
    assert!(!queue.cancel(&broken));
  }

  #[test]
  fn pid_file_guard_tracks_file() {
    let temp = tempfile::TempDir::new().unwrap();
    let guard = PidFileGuard::new(temp.path().join("server.pid"));
    assert!(!guard.is_active());
    std::fs::write(temp.path().join("server.pid"), "1234").unwrap();
    assert!(guard.is_active());
    assert!(guard.describe().contains("server.pid"));
  }
}
