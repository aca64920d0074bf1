//! CLI output formatting utilities.
//!
//! Colored status messages, step log rendering and duration formatting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use modpack_lib::build::{BuildResult, LogEntry, LogTag, StepRecord};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const SKIP: &str = "-";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// Symbol and label of a step or build result.
pub fn print_result(label: &str, result: BuildResult, detail: &str) {
  let symbol = match result {
    BuildResult::Success => symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    BuildResult::Warning => symbols::WARNING.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    BuildResult::Failed => symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    BuildResult::Cancelled => symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    BuildResult::Skipped | BuildResult::Pending => {
      symbols::SKIP.if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string()
    }
    BuildResult::Running => symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.blue()).to_string(),
  };
  println!("{} {} {}", symbol, label, detail.if_supports_color(Stream::Stdout, |s| s.dimmed()));
}

fn print_log_entry(step: &str, entry: &LogEntry) {
  let prefix = format!("[{step}]");
  let prefix = prefix.if_supports_color(Stream::Stdout, |s| s.dimmed());
  let text = entry.text.as_str();
  match entry.tag {
    LogTag::Plain => println!("{prefix} {text}"),
    LogTag::Info => println!("{prefix} {}", text.if_supports_color(Stream::Stdout, |s| s.blue())),
    LogTag::Success => println!("{prefix} {}", text.if_supports_color(Stream::Stdout, |s| s.green())),
    LogTag::Warning => println!("{prefix} {}", text.if_supports_color(Stream::Stdout, |s| s.yellow())),
    LogTag::Error => println!("{prefix} {}", text.if_supports_color(Stream::Stdout, |s| s.red())),
    LogTag::Muted => println!("{prefix} {}", text.if_supports_color(Stream::Stdout, |s| s.dimmed())),
  }
}

#[derive(Debug, Default)]
struct Printed {
  lines: usize,
  last: Option<String>,
}

/// Prints the part of each flushed step record that has not been shown yet.
///
/// Inline progress lines replace the last log entry; a changed last entry is
/// printed again.
#[derive(Debug, Default)]
pub struct StepPrinter {
  printed: Mutex<HashMap<usize, Printed>>,
}

impl StepPrinter {
  pub fn print(&self, record: &StepRecord) {
    let mut printed = self.printed.lock().unwrap_or_else(|p| p.into_inner());
    let seen = printed.entry(record.index).or_default();

    let mut from = seen.lines.min(record.logs.len());
    if from > 0 && seen.last.as_deref() != Some(record.logs[from - 1].text.as_str()) {
      from -= 1;
    }
    for entry in &record.logs[from..] {
      print_log_entry(&record.name, entry);
    }

    seen.lines = record.logs.len();
    seen.last = record.logs.last().map(|entry| entry.text.clone());
  }
}
