use async_trait::async_trait;

use crate::build::LogTag;
use crate::step::{BuildStep, Capability, StepContext, StepError};

/// Deletes the previous build output of the environment.
#[derive(Debug, Default)]
pub struct CleanStep;

#[async_trait]
impl BuildStep for CleanStep {
  fn name(&self) -> &str {
    "clean"
  }

  fn capabilities(&self) -> &'static [Capability] {
    &[Capability::Files]
  }

  async fn process(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let dir = ctx.paths().build_dir(ctx.environment());
    let entries = match std::fs::read_dir(&dir) {
      Ok(entries) => entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StepError::io(&dir, e))?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
      Err(e) => return Err(StepError::io(&dir, e)),
    };

    if entries.is_empty() {
      ctx.log.log_muted("Nothing to clean");
      return Ok(());
    }

    let files = ctx.files()?;
    let total = entries.len();
    ctx.log.log(&format!("Deleted 0 of {total} entries"));
    files
      .delete_paths(entries, |done, total| {
        ctx.log.log_inline(&format!("Deleted {done} of {total} entries"), LogTag::Plain);
      })
      .await?;
    ctx.log.log_success(&format!("Cleaned {}", dir.display()));
    Ok(())
  }
}
