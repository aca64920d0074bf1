//! Registry of live external processes.
//!
//! The engine registers every process it spawns (when a tracker and label are
//! configured) so that operators can see what a build is running, and
//! unregisters it exactly once when the run ends.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::debug;

/// External registry of live process ids.
pub trait ProcessTracker: Send + Sync {
  fn register_process(&self, pid: u32, build_id: &str, label: &str);
  fn unregister_process(&self, pid: u32);
}

/// A process known to a [`MemoryProcessTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedProcess {
  pub pid: u32,
  pub build_id: String,
  pub label: String,
}

/// In-process tracker backed by a map.
///
/// Besides the live set it counts registrations and unregistrations, which
/// makes the "unregistered exactly once" guarantee observable.
#[derive(Debug, Default)]
pub struct MemoryProcessTracker {
  inner: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
  live: BTreeMap<u32, TrackedProcess>,
  registered: usize,
  unregistered: usize,
}

impl MemoryProcessTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Processes currently registered, ordered by pid.
  pub fn processes(&self) -> Vec<TrackedProcess> {
    let state = self.inner.lock().unwrap_or_else(|p| p.into_inner());
    state.live.values().cloned().collect()
  }

  /// Processes registered for one build.
  pub fn processes_for_build(&self, build_id: &str) -> Vec<TrackedProcess> {
    self.processes().into_iter().filter(|p| p.build_id == build_id).collect()
  }

  /// Total `(registered, unregistered)` calls seen.
  pub fn counts(&self) -> (usize, usize) {
    let state = self.inner.lock().unwrap_or_else(|p| p.into_inner());
    (state.registered, state.unregistered)
  }
}

impl ProcessTracker for MemoryProcessTracker {
  fn register_process(&self, pid: u32, build_id: &str, label: &str) {
    debug!(pid, build_id, label, "registering process");
    let mut state = self.inner.lock().unwrap_or_else(|p| p.into_inner());
    state.registered += 1;
    state.live.insert(
      pid,
      TrackedProcess {
        pid,
        build_id: build_id.to_string(),
        label: label.to_string(),
      },
    );
  }

  fn unregister_process(&self, pid: u32) {
    debug!(pid, "unregistering process");
    let mut state = self.inner.lock().unwrap_or_else(|p| p.into_inner());
    state.unregistered += 1;
    state.live.remove(&pid);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn register_then_unregister() {
    let tracker = MemoryProcessTracker::new();
    tracker.register_process(10, "build-1", "git");
    tracker.register_process(11, "build-2", "sign");

    assert_eq!(tracker.processes().len(), 2);
    assert_eq!(tracker.processes_for_build("build-1")[0].label, "git");

    tracker.unregister_process(10);
    assert_eq!(tracker.processes().len(), 1);
    assert_eq!(tracker.counts(), (2, 1));
  }
}
