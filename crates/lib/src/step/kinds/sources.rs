use async_trait::async_trait;

use crate::build::Environment;
use crate::config::{ConfigError, Variables};
use crate::step::{BuildStep, Capability, StepContext, StepError};

fn branch(variables: &dyn Variables, env: Environment) -> Result<String, ConfigError> {
  if env.is_release() {
    variables.string_or("SOURCES_BRANCH_RELEASE", "release")
  } else {
    variables.string_or("SOURCES_BRANCH_DEV", "dev")
  }
}

/// Brings the shared checkout to the tip of the environment's branch and
/// publishes whether anything changed.
#[derive(Debug, Default)]
pub struct SourcesStep;

#[async_trait]
impl BuildStep for SourcesStep {
  fn name(&self) -> &str {
    "sources"
  }

  fn capabilities(&self) -> &'static [Capability] {
    &[Capability::Git]
  }

  async fn process(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let git = ctx.git()?;
    let branch = branch(ctx.variables(), ctx.environment())?;
    let url = match ctx.variables().string("SOURCES_URL") {
      Ok(url) => Some(url),
      Err(ConfigError::MissingVariable(_)) => None,
      Err(e) => return Err(e.into()),
    };
    let dir = ctx.paths().source_dir();

    ctx.log.log_info(&format!("Syncing {branch} in {}", dir.display()));
    let change = git.sync(&dir, url.as_deref(), &branch).await?;

    let message = match &change.before {
      None => format!("Cloned at {}", change.after),
      Some(before) if change.changed() => format!("Updated {before} -> {}", change.after),
      Some(_) => format!("No changes at {}", change.after),
    };
    ctx.log.log(&message);

    ctx.state.sources_changed = Some(change.changed());
    ctx.state.commit = Some(change.after);
    Ok(())
  }
}
