use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::process::{ProcessCommand, split_args};
use crate::step::files::list_files;
use crate::step::{BuildStep, StderrPolicy, StepContext, StepError};

const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Runs the configured build tool in the source checkout.
///
/// `BUILD_TOOL_ARGS` may reference `{source}`, `{output}`, `{version}` and
/// `{environment}`. The string is split first, so a substituted path always
/// stays a single argument.
///
/// The revision of the last successful build is kept next to the output; the
/// step is skipped only while the checkout is still at that revision.
#[derive(Debug, Default)]
pub struct CompileStep;

fn expand_args(template: &str, ctx: &StepContext<'_>) -> Result<Vec<String>, StepError> {
  let env = ctx.environment();
  let source = ctx.paths().source_dir();
  let output = ctx.paths().mod_dir(env);
  let version = ctx.build.full_version();
  let args = split_args(template)?
    .into_iter()
    .map(|arg| {
      arg
        .replace("{source}", &source.to_string_lossy())
        .replace("{output}", &output.to_string_lossy())
        .replace("{version}", &version)
        .replace("{environment}", env.as_str())
    })
    .collect();
  Ok(args)
}

fn read_built_revision(path: &Path) -> Result<Option<String>, StepError> {
  match std::fs::read_to_string(path) {
    Ok(revision) => Ok(Some(revision.trim().to_string())),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(StepError::io(path, e)),
  }
}

#[async_trait]
impl BuildStep for CompileStep {
  fn name(&self) -> &str {
    "build"
  }

  fn guard(&self, ctx: &StepContext<'_>) -> Result<Option<String>, StepError> {
    if ctx.variables().bool_or("BUILD_FORCE", false)? {
      return Ok(None);
    }
    let Some(commit) = ctx.state.commit.as_deref() else {
      return Ok(None);
    };
    let marker = ctx.paths().built_revision_file(ctx.environment());
    if read_built_revision(&marker)?.as_deref() != Some(commit) {
      return Ok(None);
    }
    let addons = ctx.paths().addons_dir(ctx.environment());
    let has_output = list_files(&addons, None)
      .map(|files| !files.is_empty())
      .map_err(|e| StepError::io(&addons, e))?;
    Ok(has_output.then(|| format!("output already built from {commit}")))
  }

  async fn setup(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let dir = ctx.paths().build_dir(ctx.environment());
    tokio::fs::create_dir_all(&dir).await.map_err(|e| StepError::io(&dir, e))?;

    // Output is untrusted until this run succeeds
    let marker = ctx.paths().built_revision_file(ctx.environment());
    match tokio::fs::remove_file(&marker).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(StepError::io(&marker, e)),
    }
  }

  async fn process(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let tool = ctx.variables().string("BUILD_TOOL")?;
    let template = ctx.variables().string_or("BUILD_TOOL_ARGS", "")?;
    let timeout = ctx.variables().duration_secs_or("BUILD_TIMEOUT_SECS", DEFAULT_BUILD_TIMEOUT)?;
    let stderr = if ctx.variables().bool_or("BUILD_STDERR_FATAL", false)? {
      StderrPolicy::Fatal
    } else {
      StderrPolicy::Warn
    };

    let args = expand_args(&template, ctx)?;
    let command = ctx
      .track(ProcessCommand::with_args(tool, ctx.paths().source_dir(), args))
      .timeout(timeout);
    ctx.log.log_info(&format!("Running {}", command.display()));
    ctx.run(command, stderr).await?;

    let addons = ctx.paths().addons_dir(ctx.environment());
    let produced = list_files(&addons, Some("pbo")).map_err(|e| StepError::io(&addons, e))?;
    if produced.is_empty() {
      ctx.log.log_warning(&format!("Build produced no addons in {}", addons.display()));
    } else {
      ctx.log.log_success(&format!("Built {} addons", produced.len()));
    }

    if let Some(commit) = &ctx.state.commit {
      let marker = ctx.paths().built_revision_file(ctx.environment());
      tokio::fs::write(&marker, commit)
        .await
        .map_err(|e| StepError::io(&marker, e))?;
    }
    Ok(())
  }
}
