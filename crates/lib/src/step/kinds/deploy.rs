use async_trait::async_trait;

use super::sign::PUBLIC_KEY_EXT;
use crate::build::LogTag;
use crate::step::files::list_files;
use crate::step::{BuildStep, Capability, StepContext, StepError};

/// Replaces the environment's repo with the new build and publishes the
/// public key next to it.
#[derive(Debug, Default)]
pub struct DeployStep;

#[async_trait]
impl BuildStep for DeployStep {
  fn name(&self) -> &str {
    "deploy"
  }

  fn capabilities(&self) -> &'static [Capability] {
    &[Capability::Files]
  }

  async fn setup(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let files = ctx.files()?;
    let repo = ctx.paths().repo_dir(ctx.environment());
    let previous = list_files(&repo, None).map_err(|e| StepError::io(&repo, e))?;
    if !previous.is_empty() {
      let count = previous.len();
      files.delete_paths(previous, |_, _| {}).await?;
      ctx.log.log_muted(&format!("Removed {count} files of the previous deployment"));
    }
    Ok(())
  }

  async fn process(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let files = ctx.files()?;
    let env = ctx.environment();
    let source = ctx.paths().build_dir(env);
    let repo = ctx.paths().repo_dir(env);

    ctx.log.log("Copied 0 files");
    let copied = files
      .copy_dir(&source, &repo, |done, total| {
        ctx.log.log_inline(&format!("Copied {done} of {total} files"), LogTag::Plain);
      })
      .await?;
    if copied == 0 {
      ctx.log.log_warning(&format!("Nothing to deploy in {}", source.display()));
    }

    self.publish_key(ctx).await
  }
}

impl DeployStep {
  async fn publish_key(&self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let Some(key) = ctx.state.key_name.clone() else {
      ctx.log.log_warning("No signing key to publish");
      return Ok(());
    };
    let public = ctx.paths().private_keys_dir().join(format!("{key}.{PUBLIC_KEY_EXT}"));
    if !public.exists() {
      ctx.log.log_warning(&format!("Public key {} is missing", public.display()));
      return Ok(());
    }

    let keys = ctx.paths().keys_dir(ctx.environment());
    tokio::fs::create_dir_all(&keys).await.map_err(|e| StepError::io(&keys, e))?;
    for old in list_files(&keys, Some(PUBLIC_KEY_EXT)).map_err(|e| StepError::io(&keys, e))? {
      tokio::fs::remove_file(&old).await.map_err(|e| StepError::io(&old, e))?;
    }
    let target = keys.join(format!("{key}.{PUBLIC_KEY_EXT}"));
    tokio::fs::copy(&public, &target)
      .await
      .map_err(|e| StepError::io(&public, e))?;

    ctx.log.log_success(&format!("Published key {key}"));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::Environment;
  use crate::config::MemoryVariables;
  use crate::step::StepState;
  use crate::util::testutil::{StepFixture, write_file};

  #[tokio::test]
  async fn copies_build_and_publishes_key() {
    let mut fixture = StepFixture::new(Environment::Release, MemoryVariables::new());
    let paths = fixture.paths().clone();
    let build = paths.build_dir(Environment::Release);
    write_file(&build, "@modpack/addons/a.pbo", "a");
    write_file(&build, "@modpack/addons/a.pbo.k.bisign", "sig");
    write_file(&build, "@modpack/mod.cpp", "name");
    write_file(&paths.repo_dir(Environment::Release), "@modpack/addons/removed.pbo", "old");
    write_file(&paths.keys_dir(Environment::Release), "modpack_old_release.bikey", "old");
    write_file(&paths.private_keys_dir(), "modpack_5.2.0.7_release.bikey", "public");
    fixture.state.key_name = Some("modpack_5.2.0.7_release".into());

    let (state, record) = fixture.run(&mut DeployStep).await;

    assert_eq!(state, StepState::Succeeded, "{:?}", record.log_text());
    let repo = paths.repo_dir(Environment::Release);
    assert!(repo.join("@modpack/addons/a.pbo.k.bisign").exists());
    assert!(!repo.join("@modpack/addons/removed.pbo").exists());
    assert!(record.log_text().contains(&"Copied 3 of 3 files"));

    let keys = paths.keys_dir(Environment::Release);
    assert!(keys.join("modpack_5.2.0.7_release.bikey").exists());
    assert!(!keys.join("modpack_old_release.bikey").exists());
  }

  #[tokio::test]
  async fn missing_key_is_a_warning() {
    let mut fixture = StepFixture::new(Environment::Dev, MemoryVariables::new());
    write_file(&fixture.paths().build_dir(Environment::Dev), "@modpack/addons/a.pbo", "a");

    let (state, _) = fixture.run(&mut DeployStep).await;
    assert_eq!(state, StepState::Warning);
  }
}
