//! Bounded-parallel file operations.
//!
//! A batch fans out to at most `workers` concurrent tasks and fans back in
//! before returning. One item's failure never aborts its siblings: failures
//! are collected with their source path and reported once as
//! [`BatchError::Failed`]. Successful items are not rolled back.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const MIN_WORKERS: usize = 2;
pub const MAX_WORKERS: usize = 10;
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
  pub path: PathBuf,
  pub message: String,
}

#[derive(Debug, Error)]
pub enum BatchError {
  #[error("{} of {} items failed; first: {}: {}", .failures.len(), .total, first_path(.failures), first_message(.failures))]
  Failed { total: usize, failures: Vec<ItemFailure> },

  #[error("batch cancelled")]
  Cancelled,
}

fn first_path(failures: &[ItemFailure]) -> String {
  failures.first().map(|f| f.path.display().to_string()).unwrap_or_default()
}

fn first_message(failures: &[ItemFailure]) -> &str {
  failures.first().map(|f| f.message.as_str()).unwrap_or_default()
}

impl BatchError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, BatchError::Cancelled)
  }
}

/// File capability handed to steps that declare it.
#[derive(Debug, Clone)]
pub struct FileOps {
  workers: usize,
  cancel: CancellationToken,
}

impl FileOps {
  /// `workers` is clamped to [`MIN_WORKERS`]..=[`MAX_WORKERS`].
  pub fn new(workers: usize, cancel: CancellationToken) -> Self {
    Self {
      workers: workers.clamp(MIN_WORKERS, MAX_WORKERS),
      cancel,
    }
  }

  pub fn workers(&self) -> usize {
    self.workers
  }

  /// Run `op` for every item with at most `workers` in flight.
  ///
  /// `progress(done, total)` is called after each item finishes. Returns the
  /// number of items processed.
  pub async fn for_each<F, Fut, E, P>(&self, items: Vec<PathBuf>, mut op: F, mut progress: P) -> Result<usize, BatchError>
  where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
    P: FnMut(usize, usize),
  {
    let total = items.len();
    if self.cancel.is_cancelled() {
      return Err(BatchError::Cancelled);
    }

    let semaphore = Arc::new(Semaphore::new(self.workers));
    let mut tasks = JoinSet::new();
    let mut paths = HashMap::with_capacity(total);
    for path in items {
      let work = op(path.clone());
      let semaphore = semaphore.clone();
      let handle = tasks.spawn(async move {
        match semaphore.acquire_owned().await {
          Ok(_permit) => work.await.map_err(|e| e.to_string()),
          Err(_) => Err("worker pool closed".to_string()),
        }
      });
      paths.insert(handle.id(), path);
    }

    let mut failures = Vec::new();
    let mut done = 0;
    loop {
      let joined = tokio::select! {
        biased;
        _ = self.cancel.cancelled() => {
          debug!(remaining = tasks.len(), "batch cancelled, aborting workers");
          tasks.abort_all();
          return Err(BatchError::Cancelled);
        }
        joined = tasks.join_next_with_id() => joined,
      };
      let Some(joined) = joined else { break };

      done += 1;
      let (id, result) = match joined {
        Ok((id, result)) => (id, result),
        Err(e) => (e.id(), Err(format!("worker panicked: {e}"))),
      };
      let path = paths.remove(&id).unwrap_or_default();
      if let Err(message) = result {
        warn!(path = %path.display(), error = %message, "batch item failed");
        failures.push(ItemFailure { path, message });
      }
      progress(done, total);
    }

    if failures.is_empty() {
      Ok(total)
    } else if self.cancel.is_cancelled() {
      // Items killed by the cancellation report as failures
      Err(BatchError::Cancelled)
    } else {
      failures.sort_by(|a, b| a.path.cmp(&b.path));
      Err(BatchError::Failed { total, failures })
    }
  }

  /// Copy every file under `src` to the same relative path under `dst`.
  pub async fn copy_dir<P>(&self, src: &Path, dst: &Path, progress: P) -> Result<usize, BatchError>
  where
    P: FnMut(usize, usize),
  {
    let files = list_files(src, None).map_err(|e| BatchError::Failed {
      total: 0,
      failures: vec![ItemFailure {
        path: src.to_path_buf(),
        message: e.to_string(),
      }],
    })?;

    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    self
      .for_each(
        files,
        move |file| {
          let target = file.strip_prefix(&src).map(|rel| dst.join(rel));
          async move {
            let target = target.map_err(|e| e.to_string())?;
            if let Some(parent) = target.parent() {
              tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
            }
            tokio::fs::copy(&file, &target).await.map_err(|e| e.to_string())?;
            Ok::<_, String>(())
          }
        },
        progress,
      )
      .await
  }

  /// Delete files and directories. Missing paths count as deleted.
  pub async fn delete_paths<P>(&self, paths: Vec<PathBuf>, progress: P) -> Result<usize, BatchError>
  where
    P: FnMut(usize, usize),
  {
    self
      .for_each(
        paths,
        |path| async move {
          match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
          }
        },
        progress,
      )
      .await
  }
}

/// Files under `dir`, sorted, optionally limited to one extension.
///
/// A missing directory yields an empty list.
pub fn list_files(dir: &Path, extension: Option<&str>) -> std::io::Result<Vec<PathBuf>> {
  if !dir.exists() {
    return Ok(Vec::new());
  }

  let mut files = Vec::new();
  for entry in WalkDir::new(dir).follow_links(false) {
    let entry = entry?;
    if !entry.file_type().is_file() {
      continue;
    }
    let matches = match extension {
      Some(ext) => entry
        .path()
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(ext)),
      None => true,
    };
    if matches {
      files.push(entry.into_path());
    }
  }
  files.sort();
  Ok(files)
}
