//! Build steps.
//!
//! A step is a set of hooks plus the capabilities it needs. The lifecycle is
//! an explicit state machine driven by [`run_step`]:
//!
//! ```text
//! Created -> Started -> SetupDone -> ProcessDone -> TeardownDone -> Succeeded | Warning
//!               |            \____________\______________\____ Failed | Cancelled
//!               +-> Skipped (guard declined)
//! ```
//!
//! A hook returning a cancellation fault jumps straight to Cancelled; any
//! other fault jumps to Failed. Either way the remaining hooks never run.

mod context;
mod error;
pub mod files;
pub mod git;
pub mod kinds;
mod logger;
mod registry;

use std::fmt;

use async_trait::async_trait;
use tracing::{debug, warn};

pub use context::{BuildInfo, BuildState, StderrPolicy, StepContext, StepServices};
pub use error::StepError;
pub use files::{BatchError, FileOps, ItemFailure};
pub use git::{Git, GitError, RevisionChange};
pub use kinds::{StepKind, standard_pipeline};
pub use logger::{FLUSH_THRESHOLD, StepLogger, StepUpdate};
pub use registry::{StepFactory, StepRegistry};

/// Services a step must declare before it can use them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
  /// Bounded-parallel copy/delete/sign helpers.
  Files,
  /// Shell-outs to the VCS binary.
  Git,
}

impl fmt::Display for Capability {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Capability::Files => f.write_str("files"),
      Capability::Git => f.write_str("git"),
    }
  }
}

/// One named unit of work within a build.
#[async_trait]
pub trait BuildStep: Send {
  fn name(&self) -> &str;

  fn capabilities(&self) -> &'static [Capability] {
    &[]
  }

  /// A reason to skip the step, evaluated after Start.
  fn guard(&self, _ctx: &StepContext<'_>) -> Result<Option<String>, StepError> {
    Ok(None)
  }

  async fn setup(&mut self, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    Ok(())
  }

  async fn process(&mut self, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    Ok(())
  }

  async fn teardown(&mut self, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
  Created,
  Started,
  SetupDone,
  ProcessDone,
  TeardownDone,
  Succeeded,
  Warning,
  Failed,
  Cancelled,
  Skipped,
}

impl StepState {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      StepState::Succeeded | StepState::Warning | StepState::Failed | StepState::Cancelled | StepState::Skipped
    )
  }
}

async fn advance(step: &mut dyn BuildStep, ctx: &mut StepContext<'_>, state: StepState) -> Result<StepState, StepError> {
  let next = match state {
    StepState::Created => {
      ctx.log.start();
      StepState::Started
    }
    StepState::Started => {
      step.setup(ctx).await?;
      StepState::SetupDone
    }
    StepState::SetupDone => {
      step.process(ctx).await?;
      StepState::ProcessDone
    }
    StepState::ProcessDone => {
      step.teardown(ctx).await?;
      StepState::TeardownDone
    }
    StepState::TeardownDone if ctx.log.has_warnings() => StepState::Warning,
    StepState::TeardownDone => StepState::Succeeded,
    terminal => terminal,
  };
  Ok(next)
}

/// Drive `step` through its lifecycle and record the outcome in `ctx.log`.
pub async fn run_step(step: &mut dyn BuildStep, ctx: &mut StepContext<'_>) -> StepState {
  let mut state = StepState::Created;
  let mut skip_reason = None;

  while !state.is_terminal() {
    if state != StepState::Created && ctx.is_cancelled() {
      state = StepState::Cancelled;
      break;
    }
    if state == StepState::Started {
      match step.guard(ctx) {
        Ok(Some(reason)) => {
          skip_reason = Some(reason);
          state = StepState::Skipped;
          break;
        }
        Ok(None) => {}
        Err(e) => {
          warn!(step = step.name(), error = %e, "step guard failed");
          ctx.log.fail(&e);
          return StepState::Failed;
        }
      }
    }

    let from = state;
    state = match advance(step, ctx, state).await {
      Ok(next) => next,
      Err(e) if e.is_cancelled() => StepState::Cancelled,
      Err(e) => {
        warn!(step = step.name(), error = %e, "step failed");
        ctx.log.fail(&e);
        return StepState::Failed;
      }
    };
    debug!(step = step.name(), ?from, to = ?state, "step transition");
  }

  match state {
    StepState::Cancelled => {
      ctx.log.cancel();
    }
    StepState::Skipped => {
      ctx.log.skip(skip_reason.as_deref().unwrap_or("not required"));
    }
    _ => {
      ctx.log.succeed();
    }
  }
  state
}
