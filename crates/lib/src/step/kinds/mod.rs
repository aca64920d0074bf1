//! The standard step kinds.

mod clean;
mod compile;
mod deploy;
mod prep;
mod sign;
mod sources;

use std::fmt;
use std::str::FromStr;

pub use clean::CleanStep;
pub use compile::CompileStep;
pub use deploy::DeployStep;
pub use prep::PrepStep;
pub use sign::{SignStep, key_name};
pub use sources::SourcesStep;

use super::{BuildStep, StepError};
use crate::build::Environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
  Prep,
  Clean,
  Sources,
  Build,
  Sign,
  Deploy,
}

impl StepKind {
  pub const ALL: [StepKind; 6] = [
    StepKind::Prep,
    StepKind::Clean,
    StepKind::Sources,
    StepKind::Build,
    StepKind::Sign,
    StepKind::Deploy,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      StepKind::Prep => "prep",
      StepKind::Clean => "clean",
      StepKind::Sources => "sources",
      StepKind::Build => "build",
      StepKind::Sign => "sign",
      StepKind::Deploy => "deploy",
    }
  }

  pub fn description(&self) -> &'static str {
    match self {
      StepKind::Prep => "create the environment's build, repo and key directories",
      StepKind::Clean => "delete the previous build output",
      StepKind::Sources => "fetch and check out the environment's branch",
      StepKind::Build => "run the build tool",
      StepKind::Sign => "create a versioned key and sign every addon",
      StepKind::Deploy => "copy the build into the repo and publish the key",
    }
  }

  pub fn create(&self) -> Box<dyn BuildStep> {
    match self {
      StepKind::Prep => Box::new(PrepStep),
      StepKind::Clean => Box::new(CleanStep),
      StepKind::Sources => Box::new(SourcesStep),
      StepKind::Build => Box::new(CompileStep),
      StepKind::Sign => Box::new(SignStep),
      StepKind::Deploy => Box::new(DeployStep),
    }
  }
}

impl fmt::Display for StepKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for StepKind {
  type Err = StepError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    StepKind::ALL
      .into_iter()
      .find(|kind| kind.name() == s)
      .ok_or_else(|| StepError::UnknownStep(s.to_string()))
  }
}

const INCREMENTAL: &[StepKind] = &[
  StepKind::Prep,
  StepKind::Sources,
  StepKind::Build,
  StepKind::Sign,
  StepKind::Deploy,
];

const FROM_SCRATCH: &[StepKind] = &[
  StepKind::Prep,
  StepKind::Clean,
  StepKind::Sources,
  StepKind::Build,
  StepKind::Sign,
  StepKind::Deploy,
];

/// Pipeline used when none is configured. Dev builds are incremental;
/// release candidates and releases always start from a clean output.
pub fn standard_pipeline(env: Environment) -> &'static [StepKind] {
  if env.is_release() { FROM_SCRATCH } else { INCREMENTAL }
}
