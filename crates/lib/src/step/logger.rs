//! Per-step log accumulation.
//!
//! The [`StepLogger`] owns the step's record while the step is active. Log
//! lines are batched and pushed to an update callback every
//! [`FLUSH_THRESHOLD`] appends; lifecycle transitions flush immediately.

use std::sync::Arc;

use chrono::Utc;
use tracing::trace;

use crate::build::{BuildResult, LogEntry, LogTag, StepRecord};

/// Receives a snapshot of the step every time the logger flushes.
///
/// Called synchronously on the step's task.
pub type StepUpdate = Arc<dyn Fn(&StepRecord) + Send + Sync>;

/// Appends between automatic flushes.
pub const FLUSH_THRESHOLD: usize = 10;

pub struct StepLogger {
  record: StepRecord,
  update: StepUpdate,
  threshold: usize,
  pending: usize,
  warnings: usize,
  finished: bool,
}

impl std::fmt::Debug for StepLogger {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StepLogger")
      .field("step", &self.record.name)
      .field("pending", &self.pending)
      .field("warnings", &self.warnings)
      .field("finished", &self.finished)
      .finish()
  }
}

impl StepLogger {
  pub fn new(record: StepRecord, update: StepUpdate) -> Self {
    Self::with_threshold(record, update, FLUSH_THRESHOLD)
  }

  pub fn with_threshold(record: StepRecord, update: StepUpdate, threshold: usize) -> Self {
    Self {
      record,
      update,
      threshold,
      pending: 0,
      warnings: 0,
      finished: false,
    }
  }

  pub fn record(&self) -> &StepRecord {
    &self.record
  }

  pub fn into_record(self) -> StepRecord {
    self.record
  }

  pub fn has_warnings(&self) -> bool {
    self.warnings > 0
  }

  pub fn is_finished(&self) -> bool {
    self.finished
  }

  pub fn log(&mut self, text: &str) {
    self.log_tagged(text, LogTag::Plain);
  }

  pub fn log_info(&mut self, text: &str) {
    self.log_tagged(text, LogTag::Info);
  }

  pub fn log_success(&mut self, text: &str) {
    self.log_tagged(text, LogTag::Success);
  }

  pub fn log_muted(&mut self, text: &str) {
    self.log_tagged(text, LogTag::Muted);
  }

  /// A non-fatal issue; the step ends as Warning instead of Success.
  pub fn log_warning(&mut self, text: &str) {
    self.warnings += 1;
    self.log_tagged(text, LogTag::Warning);
  }

  pub fn log_error(&mut self, text: &str) {
    self.log_tagged(text, LogTag::Error);
  }

  /// Append `text` split on newlines, one entry per line.
  pub fn log_tagged(&mut self, text: &str, tag: LogTag) {
    for line in text.split('\n') {
      let line = line.strip_suffix('\r').unwrap_or(line);
      self.count_append();
      self.record.logs.push(LogEntry::new(line, tag));
    }
  }

  /// Overwrite the most recent line, e.g. a "Signed N of M files" counter.
  pub fn log_inline(&mut self, text: &str, tag: LogTag) {
    self.count_append();
    match self.record.logs.last_mut() {
      Some(last) => *last = LogEntry::new(text, tag),
      None => self.record.logs.push(LogEntry::new(text, tag)),
    }
  }

  // Flushes the lines accumulated so far once the counter passes the
  // threshold; the line being appended starts the next cycle.
  fn count_append(&mut self) {
    self.pending += 1;
    if self.pending > self.threshold {
      self.flush();
      self.pending = 1;
    }
  }

  /// Push the current record to the update callback.
  pub fn flush(&mut self) {
    trace!(step = %self.record.name, lines = self.record.logs.len(), "flushing step");
    self.pending = 0;
    (self.update)(&self.record);
  }

  pub fn start(&mut self) {
    self.record.result = BuildResult::Running;
    self.record.started_at = Some(Utc::now());
    let text = format!("Starting {}", self.record.name);
    self.log_info(&text);
    self.flush();
  }

  /// Success, or Warning if any warning was logged. Returns false if the
  /// step had already finished.
  pub fn succeed(&mut self) -> bool {
    let result = if self.has_warnings() {
      BuildResult::Warning
    } else {
      BuildResult::Success
    };
    let text = match result {
      BuildResult::Warning => format!("Finished {} with warnings", self.record.name),
      _ => format!("Finished {}", self.record.name),
    };
    self.finish(result, &text, LogTag::Success)
  }

  pub fn fail(&mut self, error: &dyn std::error::Error) -> bool {
    let text = format!("Failed: {error}");
    self.finish(BuildResult::Failed, &text, LogTag::Error)
  }

  pub fn cancel(&mut self) -> bool {
    self.finish(BuildResult::Cancelled, "Cancelled", LogTag::Warning)
  }

  pub fn skip(&mut self, reason: &str) -> bool {
    let text = format!("Skipped: {reason}");
    self.finish(BuildResult::Skipped, &text, LogTag::Muted)
  }

  fn finish(&mut self, result: BuildResult, text: &str, tag: LogTag) -> bool {
    if self.finished {
      return false;
    }
    self.finished = true;
    self.log_tagged(text, tag);
    self.record.result = result;
    self.record.finished_at = Some(Utc::now());
    self.flush();
    true
  }
}
