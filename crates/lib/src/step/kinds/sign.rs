use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::build::LogTag;
use crate::consts::APP_NAME;
use crate::process::{OutputKind, ProcessCommand, ProcessError};
use crate::step::files::list_files;
use crate::step::{BuildInfo, BuildStep, Capability, StderrPolicy, StepContext, StepError};

const DEFAULT_SIGN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub const PRIVATE_KEY_EXT: &str = "biprivatekey";
pub const PUBLIC_KEY_EXT: &str = "bikey";
const SIGNATURE_EXT: &str = "bisign";

/// Versioned key name, e.g. `modpack_5.2.0.7_rc`.
pub fn key_name(build: &BuildInfo) -> String {
  format!("{}_{}_{}", APP_NAME, build.full_version(), build.environment)
}

/// Creates this build's key and signs every addon with it.
#[derive(Debug, Default)]
pub struct SignStep;

async fn sign_one(command: ProcessCommand, cancel: CancellationToken) -> Result<(), String> {
  let command_line = command.display();
  let mut output = command.logging(false).execute(cancel);
  let mut stderr = Vec::new();
  while let Some(line) = output.next().await {
    let line = line.map_err(|e| e.to_string())?;
    match line.kind {
      OutputKind::Output => {}
      OutputKind::Error if line.is_timeout() => return Err(line.content),
      OutputKind::Error => stderr.push(line.content),
      OutputKind::ProcessCompleted => {
        return match line.exit_code {
          Some(0) => Ok(()),
          code => Err(format!(
            "'{command_line}' exited with code {}: {}",
            code.unwrap_or(-1),
            stderr.join("; ")
          )),
        };
      }
    }
  }
  Err(ProcessError::Unfinished { command: command_line }.to_string())
}

#[async_trait]
impl BuildStep for SignStep {
  fn name(&self) -> &str {
    "sign"
  }

  fn capabilities(&self) -> &'static [Capability] {
    &[Capability::Files]
  }

  async fn setup(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let keygen = ctx.variables().string("SIGN_KEYGEN_TOOL")?;
    let dir = ctx.paths().private_keys_dir();
    tokio::fs::create_dir_all(&dir).await.map_err(|e| StepError::io(&dir, e))?;

    let key = key_name(ctx.build);
    let private_key = dir.join(format!("{key}.{PRIVATE_KEY_EXT}"));
    if !private_key.exists() {
      let command = ctx.track(ProcessCommand::with_args(keygen, &dir, vec![key.clone()]));
      ctx.run(command, StderrPolicy::Log).await?;
      if !private_key.exists() {
        return Err(StepError::Other(format!("key generator did not create {}", private_key.display())));
      }
      ctx.log.log_info(&format!("Created key {key}"));
    }
    ctx.state.key_name = Some(key);
    Ok(())
  }

  async fn process(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let files = ctx.files()?;
    let addons = ctx.paths().addons_dir(ctx.environment());

    let stale = list_files(&addons, Some(SIGNATURE_EXT)).map_err(|e| StepError::io(&addons, e))?;
    if !stale.is_empty() {
      files.delete_paths(stale, |_, _| {}).await?;
    }

    let pbos = list_files(&addons, Some("pbo")).map_err(|e| StepError::io(&addons, e))?;
    if pbos.is_empty() {
      ctx.log.log_warning("No addons to sign");
      return Ok(());
    }

    let tool = ctx.variables().string("SIGN_TOOL")?;
    let timeout = ctx.variables().duration_secs_or("SIGN_TIMEOUT_SECS", DEFAULT_SIGN_TIMEOUT)?;
    let key = ctx.state.key_name.clone().unwrap_or_else(|| key_name(ctx.build));
    let private_key = ctx.paths().private_keys_dir().join(format!("{key}.{PRIVATE_KEY_EXT}"));

    let mut commands: HashMap<PathBuf, ProcessCommand> = pbos
      .iter()
      .map(|pbo| {
        let args = vec![
          private_key.to_string_lossy().into_owned(),
          pbo.to_string_lossy().into_owned(),
        ];
        let command = ctx.track(ProcessCommand::with_args(tool.clone(), &addons, args)).timeout(timeout);
        (pbo.clone(), command)
      })
      .collect();

    let total = pbos.len();
    let cancel = ctx.cancel_token().clone();
    ctx.log.log(&format!("Signed 0 of {total} files"));
    files
      .for_each(
        pbos,
        move |pbo| {
          let command = commands.remove(&pbo);
          let cancel = cancel.clone();
          async move {
            match command {
              Some(command) => sign_one(command, cancel).await,
              None => Err("no signing command prepared".to_string()),
            }
          }
        },
        |done, total| ctx.log.log_inline(&format!("Signed {done} of {total} files"), LogTag::Plain),
      )
      .await?;
    ctx.log.log_success(&format!("Signed {total} addons with {key}"));
    Ok(())
  }

  /// Drops private keys of earlier builds of the same environment.
  async fn teardown(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let Some(current) = ctx.state.key_name.clone() else {
      return Ok(());
    };
    let dir = ctx.paths().private_keys_dir();
    let suffix = format!("_{}", ctx.environment());
    let keys = list_files(&dir, Some(PRIVATE_KEY_EXT)).map_err(|e| StepError::io(&dir, e))?;

    for path in keys {
      let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        continue;
      };
      if stem == current || !stem.starts_with(APP_NAME) || !stem.ends_with(&suffix) {
        continue;
      }
      let message = format!("Removed old key {stem}");
      tokio::fs::remove_file(&path).await.map_err(|e| StepError::io(&path, e))?;
      ctx.log.log_muted(&message);
    }
    Ok(())
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::build::Environment;
  use crate::config::MemoryVariables;
  use crate::step::StepState;
  use crate::util::testutil::{StepFixture, write_file, write_script};
  use std::sync::Arc;

  fn with_tools(env: Environment, signer_body: &str) -> StepFixture {
    let mut fixture = StepFixture::new(env, MemoryVariables::new());
    let tools = fixture.temp.path().join("tools");
    std::fs::create_dir_all(&tools).unwrap();
    let keygen = write_script(&tools, "keygen", "touch \"$1.biprivatekey\" \"$1.bikey\"");
    let signer = write_script(&tools, "signer", signer_body);
    let vars = MemoryVariables::new()
      .with("SIGN_KEYGEN_TOOL", keygen)
      .with("SIGN_TOOL", signer);
    fixture.services.variables = Arc::new(vars);
    fixture
  }

  fn fixture(env: Environment) -> StepFixture {
    with_tools(env, "touch \"$2.$(basename \"$1\" .biprivatekey).bisign\"")
  }

  #[test]
  fn key_name_is_versioned() {
    let build = BuildInfo {
      id: "x".into(),
      environment: Environment::Rc,
      version: "5.2.0".into(),
      build_number: 14,
    };
    assert_eq!(key_name(&build), "modpack_5.2.0.14_rc");
  }

  #[tokio::test]
  async fn signs_every_addon_and_reports_inline() {
    let mut fixture = fixture(Environment::Dev);
    let addons = fixture.paths().addons_dir(Environment::Dev);
    for name in ["a.pbo", "b.pbo", "c.pbo"] {
      write_file(&addons, name, "pbo");
    }
    write_file(&addons, "a.pbo.modpack_old_dev.bisign", "stale");

    let (state, record) = fixture.run(&mut SignStep).await;

    assert_eq!(state, StepState::Succeeded, "{:?}", record.log_text());
    assert!(record.log_text().contains(&"Signed 3 of 3 files"));
    assert_eq!(record.log_text().iter().filter(|l| l.starts_with("Signed ")).count(), 2);
    assert!(addons.join("b.pbo.modpack_5.2.0.7_dev.bisign").exists());
    assert!(!addons.join("a.pbo.modpack_old_dev.bisign").exists());
    assert_eq!(fixture.state.key_name.as_deref(), Some("modpack_5.2.0.7_dev"));
  }

  #[tokio::test]
  async fn teardown_removes_older_keys_of_the_environment() {
    let mut fixture = fixture(Environment::Rc);
    let keys = fixture.paths().private_keys_dir();
    write_file(&keys, "modpack_5.1.0.3_rc.biprivatekey", "old");
    write_file(&keys, "modpack_5.1.0.3_dev.biprivatekey", "other env");
    write_file(&fixture.paths().addons_dir(Environment::Rc), "a.pbo", "pbo");

    let (state, _) = fixture.run(&mut SignStep).await;

    assert_eq!(state, StepState::Succeeded);
    assert!(!keys.join("modpack_5.1.0.3_rc.biprivatekey").exists());
    assert!(keys.join("modpack_5.1.0.3_dev.biprivatekey").exists());
    assert!(keys.join("modpack_5.2.0.7_rc.biprivatekey").exists());
  }

  #[tokio::test]
  async fn one_failed_signature_fails_the_step_after_the_batch() {
    let mut fixture = with_tools(
      Environment::Dev,
      "case \"$2\" in *bad.pbo) echo corrupt >&2; exit 1;; esac; touch \"$2.sig.bisign\"",
    );
    let addons = fixture.paths().addons_dir(Environment::Dev);
    for name in ["a.pbo", "bad.pbo", "c.pbo"] {
      write_file(&addons, name, "pbo");
    }

    let (state, record) = fixture.run(&mut SignStep).await;

    assert_eq!(state, StepState::Failed);
    assert!(addons.join("a.pbo.sig.bisign").exists());
    assert!(addons.join("c.pbo.sig.bisign").exists());
    let last = &record.logs.last().unwrap().text;
    assert!(last.contains("bad.pbo"), "{last}");
    assert!(last.contains("1 of 3"), "{last}");
  }

  #[tokio::test]
  async fn no_addons_is_a_warning() {
    let mut fixture = fixture(Environment::Dev);
    let (state, _) = fixture.run(&mut SignStep).await;
    assert_eq!(state, StepState::Warning);
  }
}
