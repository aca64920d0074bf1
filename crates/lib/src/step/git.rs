//! Source-control capability: shell-outs to a git binary.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::process::{OutputKind, ProcessCommand, ProcessError, ProcessTracker};

pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum GitError {
  #[error(transparent)]
  Process(#[from] ProcessError),

  #[error("git {args} exited with code {code}: {stderr}")]
  Failed { args: String, code: i32, stderr: String },

  #[error("git {args} timed out")]
  Timeout { args: String },

  #[error("git {args} returned no output")]
  NoOutput { args: String },
}

impl GitError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, GitError::Process(e) if e.is_cancelled())
  }
}

/// Revision of a checkout before and after a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionChange {
  /// `None` when the checkout was freshly cloned.
  pub before: Option<String>,
  pub after: String,
}

impl RevisionChange {
  pub fn changed(&self) -> bool {
    self.before.as_deref() != Some(self.after.as_str())
  }
}

#[derive(Clone)]
pub struct Git {
  executable: String,
  timeout: Duration,
  cancel: CancellationToken,
  tracker: Option<(Arc<dyn ProcessTracker>, String)>,
}

impl std::fmt::Debug for Git {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Git")
      .field("executable", &self.executable)
      .field("timeout", &self.timeout)
      .finish_non_exhaustive()
  }
}

impl Git {
  pub fn new(executable: impl Into<String>, cancel: CancellationToken) -> Self {
    Self {
      executable: executable.into(),
      timeout: DEFAULT_GIT_TIMEOUT,
      cancel,
      tracker: None,
    }
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn tracker(mut self, tracker: Arc<dyn ProcessTracker>, build_id: impl Into<String>) -> Self {
    self.tracker = Some((tracker, build_id.into()));
    self
  }

  /// Run `git <args>` in `dir` and return its stdout lines.
  ///
  /// Stderr is collected for the error message only; git reports progress
  /// there.
  pub async fn run(&self, dir: &Path, args: &[&str]) -> Result<Vec<String>, GitError> {
    let command_line = args.join(" ");
    let mut command = ProcessCommand::with_args(
      self.executable.clone(),
      dir,
      args.iter().map(|a| a.to_string()).collect(),
    )
    .timeout(self.timeout)
    .logging(false);
    if let Some((tracker, build_id)) = &self.tracker {
      command = command
        .tracker(tracker.clone(), build_id.clone())
        .process_id(format!("git {}", args.first().unwrap_or(&"")));
    }

    debug!(dir = %dir.display(), args = %command_line, "running git");
    let mut output = command.execute(self.cancel.clone());
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    while let Some(line) = output.next().await {
      let line = line?;
      match line.kind {
        OutputKind::Output => stdout.push(line.content),
        OutputKind::Error if line.is_timeout() => return Err(GitError::Timeout { args: command_line }),
        OutputKind::Error => stderr.push(line.content),
        OutputKind::ProcessCompleted => match line.exit_code {
          Some(0) => return Ok(stdout),
          code => {
            return Err(GitError::Failed {
              args: command_line,
              code: code.unwrap_or(-1),
              stderr: stderr.join("\n"),
            });
          }
        },
      }
    }
    Err(
      ProcessError::Unfinished {
        command: format!("git {command_line}"),
      }
      .into(),
    )
  }

  /// Commit hash checked out in `dir`.
  pub async fn head(&self, dir: &Path) -> Result<String, GitError> {
    let lines = self.run(dir, &["rev-parse", "HEAD"]).await?;
    lines
      .into_iter()
      .next()
      .map(|l| l.trim().to_string())
      .ok_or_else(|| GitError::NoOutput {
        args: "rev-parse HEAD".to_string(),
      })
  }

  pub fn is_checkout(dir: &Path) -> bool {
    dir.join(".git").exists()
  }

  /// Clone `branch` of `url` into `dir`.
  pub async fn clone_repo(&self, url: &str, dir: &Path, branch: &str) -> Result<(), GitError> {
    let parent = dir.parent().unwrap_or(Path::new("."));
    let target = dir.to_string_lossy();
    self
      .run(parent, &["clone", "--branch", branch, "--", url, target.as_ref()])
      .await?;
    Ok(())
  }

  /// Bring `dir` to the tip of `origin/branch`, cloning when absent.
  pub async fn sync(&self, dir: &Path, url: Option<&str>, branch: &str) -> Result<RevisionChange, GitError> {
    if !Self::is_checkout(dir) {
      let Some(url) = url else {
        return Err(GitError::Failed {
          args: "clone".to_string(),
          code: -1,
          stderr: format!("{} is not a checkout and no remote url is configured", dir.display()),
        });
      };
      info!(url, branch, dir = %dir.display(), "cloning sources");
      self.clone_repo(url, dir, branch).await?;
      let after = self.head(dir).await?;
      return Ok(RevisionChange { before: None, after });
    }

    let before = self.head(dir).await?;
    let remote = format!("origin/{branch}");
    self.run(dir, &["fetch", "--prune", "origin"]).await?;
    self.run(dir, &["checkout", "-f", "-B", branch, &remote]).await?;
    self.run(dir, &["reset", "--hard", &remote]).await?;
    self.run(dir, &["clean", "-fd"]).await?;
    let after = self.head(dir).await?;

    debug!(before = %before, after = %after, "sources synced");
    Ok(RevisionChange {
      before: Some(before),
      after,
    })
  }
}
