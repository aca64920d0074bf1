use async_trait::async_trait;

use crate::step::{BuildStep, StepContext, StepError};

/// Creates the directories the rest of the pipeline writes into.
#[derive(Debug, Default)]
pub struct PrepStep;

#[async_trait]
impl BuildStep for PrepStep {
  fn name(&self) -> &str {
    "prep"
  }

  async fn process(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let env = ctx.environment();
    let dirs = [
      ctx.paths().build_dir(env),
      ctx.paths().repo_dir(env),
      ctx.paths().keys_dir(env),
      ctx.paths().private_keys_dir(),
    ];

    for dir in dirs {
      ctx.check_cancelled()?;
      if dir.is_dir() {
        continue;
      }
      tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| StepError::io(&dir, e))?;
      ctx.log.log_muted(&format!("Created {}", dir.display()));
    }
    let summary = format!("Prepared {} {}", env, ctx.build.full_version());
    ctx.log.log_info(&summary);
    Ok(())
  }
}
