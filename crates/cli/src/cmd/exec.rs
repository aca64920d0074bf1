//! Implementation of the `modpack exec` command.
//!
//! Runs one command through the process engine and prints every output line
//! with its tag. The exit code is the command's own, 124 on timeout and 130
//! when interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use tokio_util::sync::CancellationToken;

use modpack_lib::process::{OutputKind, OutputLine, ProcessCommand, ProcessError};

const TIMEOUT_EXIT_CODE: u8 = 124;
const INTERRUPTED_EXIT_CODE: u8 = 130;

fn print_line(line: &OutputLine) {
  match line.kind {
    OutputKind::Output => println!("{} {}", "out".if_supports_color(Stream::Stdout, |s| s.dimmed()), line.content),
    OutputKind::Error => println!("{} {}", "err".if_supports_color(Stream::Stdout, |s| s.red()), line.content),
    OutputKind::ProcessCompleted => {
      println!("{} {}", "end".if_supports_color(Stream::Stdout, |s| s.blue()), line.content)
    }
  }
}

fn exit_code(code: i32) -> ExitCode {
  u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

pub fn cmd_exec(executable: &str, args: Vec<String>, timeout: Duration, cwd: Option<PathBuf>) -> Result<ExitCode> {
  let cwd = match cwd {
    Some(dir) => dir,
    None => std::env::current_dir().context("Failed to determine current directory")?,
  };
  let command = ProcessCommand::with_args(executable, cwd, args).timeout(timeout);

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(async {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        interrupt.cancel();
      }
    });

    let mut output = command.execute(cancel);
    let mut code = ExitCode::FAILURE;
    while let Some(line) = output.next().await {
      match line {
        Ok(line) => {
          print_line(&line);
          if line.is_timeout() {
            code = ExitCode::from(TIMEOUT_EXIT_CODE);
          } else if let Some(exit) = line.exit_code {
            code = exit_code(exit);
          }
        }
        Err(ProcessError::Cancelled { .. }) => return Ok(ExitCode::from(INTERRUPTED_EXIT_CODE)),
        Err(e) => return Err(e).context("Command failed"),
      }
    }
    Ok(code)
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn out_of_range_exit_codes_fail() {
    assert_eq!(exit_code(3), ExitCode::from(3));
    assert_eq!(exit_code(-1), ExitCode::FAILURE);
    assert_eq!(exit_code(300), ExitCode::FAILURE);
  }
}
