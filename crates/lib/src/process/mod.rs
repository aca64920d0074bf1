//! Process execution engine.
//!
//! Runs one external command and exposes its output as a lazily started,
//! single-consumption sequence of [`OutputLine`]s:
//!
//! - every stdout line becomes an [`OutputKind::Output`] line
//! - every stderr line becomes an [`OutputKind::Error`] line with a fault
//! - a normal exit ends with exactly one [`OutputKind::ProcessCompleted`] line
//! - a timeout kills the process and ends with exactly one timeout error line
//! - cancellation kills the process and ends with [`ProcessError::Cancelled`]
//!
//! ```no_run
//! # use std::time::Duration;
//! # use tokio_util::sync::CancellationToken;
//! # use modpack_lib::process::ProcessCommand;
//! # async fn demo() {
//! let mut output = ProcessCommand::new("git", "/srv/modpack", "rev-parse HEAD")
//!   .timeout(Duration::from_secs(30))
//!   .execute(CancellationToken::new());
//! while let Some(line) = output.next().await {
//!   println!("{:?}", line);
//! }
//! # }
//! ```

pub mod shell;
pub mod tracker;
pub mod types;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use shell::{get_shell, split_args};
pub use tracker::{MemoryProcessTracker, ProcessTracker, TrackedProcess};
pub use types::{Fault, FaultKind, OutputKind, OutputLine, ProcessError};

/// Timeout applied when the caller does not configure one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Lines longer than this are truncated.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// How long to keep reading buffered output after a timeout kill.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Capacity of the channel between the process driver and the consumer.
const CHANNEL_CAPACITY: usize = 256;

type Event = Result<OutputLine, ProcessError>;

#[derive(Debug, Clone)]
enum Args {
  Line(String),
  List(Vec<String>),
}

/// Builder for one external command invocation.
#[derive(Clone)]
pub struct ProcessCommand {
  executable: String,
  working_dir: PathBuf,
  args: Args,
  timeout: Duration,
  process_id: Option<String>,
  tracker: Option<(Arc<dyn ProcessTracker>, String)>,
  logging: bool,
}

impl std::fmt::Debug for ProcessCommand {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProcessCommand")
      .field("executable", &self.executable)
      .field("working_dir", &self.working_dir)
      .field("args", &self.args)
      .field("timeout", &self.timeout)
      .field("process_id", &self.process_id)
      .field("tracked", &self.tracker.is_some())
      .field("logging", &self.logging)
      .finish()
  }
}

impl ProcessCommand {
  /// Create an invocation from an executable and an argument string.
  ///
  /// The argument string is split with [`split_args`] when the process starts.
  pub fn new(executable: impl Into<String>, working_dir: impl Into<PathBuf>, args: impl Into<String>) -> Self {
    Self::with_args_inner(executable.into(), working_dir.into(), Args::Line(args.into()))
  }

  /// Create an invocation from pre-split arguments.
  pub fn with_args(executable: impl Into<String>, working_dir: impl Into<PathBuf>, args: Vec<String>) -> Self {
    Self::with_args_inner(executable.into(), working_dir.into(), Args::List(args))
  }

  /// Run `script` through the platform shell (see [`get_shell`]).
  pub fn shell(working_dir: impl Into<PathBuf>, script: &str) -> Self {
    let (shell, mut args) = get_shell(None);
    args.push(script.to_string());
    Self::with_args(shell, working_dir, args)
  }

  fn with_args_inner(executable: String, working_dir: PathBuf, args: Args) -> Self {
    Self {
      executable,
      working_dir,
      args,
      timeout: DEFAULT_TIMEOUT,
      process_id: None,
      tracker: None,
      logging: true,
    }
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Label used when registering the process with a tracker.
  pub fn process_id(mut self, label: impl Into<String>) -> Self {
    self.process_id = Some(label.into());
    self
  }

  /// Register the spawned process with `tracker` under `build_id`.
  ///
  /// Registration only happens when a [`process_id`](Self::process_id) label
  /// is also configured.
  pub fn tracker(mut self, tracker: Arc<dyn ProcessTracker>, build_id: impl Into<String>) -> Self {
    self.tracker = Some((tracker, build_id.into()));
    self
  }

  /// Record "Process started with ID {pid}" at launch. On by default.
  pub fn logging(mut self, enabled: bool) -> Self {
    self.logging = enabled;
    self
  }

  pub fn executable(&self) -> &str {
    &self.executable
  }

  pub fn working_dir(&self) -> &Path {
    &self.working_dir
  }

  /// Human readable command line, used in log lines and errors.
  pub fn display(&self) -> String {
    match &self.args {
      Args::Line(line) if line.is_empty() => self.executable.clone(),
      Args::Line(line) => format!("{} {}", self.executable, line),
      Args::List(list) if list.is_empty() => self.executable.clone(),
      Args::List(list) => format!("{} {}", self.executable, list.join(" ")),
    }
  }

  /// Prepare the run. Nothing is spawned until the output is first polled.
  pub fn execute(self, cancel: CancellationToken) -> ProcessOutput {
    ProcessOutput {
      state: OutputState::Pending(Box::new(self), cancel),
    }
  }

  fn start(self, cancel: CancellationToken) -> Result<mpsc::Receiver<Event>, ProcessError> {
    let command_line = self.display();

    if cancel.is_cancelled() {
      debug!(command = %command_line, "cancelled before start");
      return Err(ProcessError::Cancelled { command: command_line });
    }

    let args = match &self.args {
      Args::Line(line) => split_args(line)?,
      Args::List(list) => list.clone(),
    };

    let mut command = Command::new(&self.executable);
    command
      .args(&args)
      .current_dir(&self.working_dir)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    // Own process group so the whole tree can be killed on timeout/cancel
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
      command: command_line.clone(),
      working_dir: self.working_dir.clone(),
      source,
    })?;

    let pid = child.id();
    if self.logging
      && let Some(pid) = pid
    {
      info!(pid, command = %command_line, "Process started with ID {pid}");
    }

    let registration = match (&self.tracker, &self.process_id, pid) {
      (Some((tracker, build_id)), Some(label), Some(pid)) => {
        tracker.register_process(pid, build_id, label);
        Some(Registration {
          tracker: tracker.clone(),
          pid,
        })
      }
      _ => None,
    };

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let run = Run {
      command_line,
      pid,
      timeout: self.timeout,
      cancel,
      tx,
      registration,
    };
    tokio::spawn(run.drive(child, stdout, stderr));

    Ok(rx)
  }
}

/// Unregisters a tracked process when dropped, so every exit path
/// unregisters exactly once.
struct Registration {
  tracker: Arc<dyn ProcessTracker>,
  pid: u32,
}

impl Drop for Registration {
  fn drop(&mut self) {
    self.tracker.unregister_process(self.pid);
  }
}

enum Exit {
  Completed(std::process::ExitStatus),
  WaitFailed(std::io::Error),
  TimedOut,
  Cancelled,
  Abandoned,
}

struct Run {
  command_line: String,
  pid: Option<u32>,
  timeout: Duration,
  cancel: CancellationToken,
  tx: mpsc::Sender<Event>,
  registration: Option<Registration>,
}

impl Run {
  async fn drive(
    self,
    mut child: Child,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
  ) {
    let Run {
      command_line,
      pid,
      timeout,
      cancel,
      tx,
      registration,
    } = self;
    let deadline = Instant::now() + timeout;

    let mut readers = JoinSet::new();
    if let Some(stdout) = stdout {
      readers.spawn(pump(stdout, tx.clone(), OutputLine::output));
    }
    if let Some(stderr) = stderr {
      readers.spawn(pump(stderr, tx.clone(), OutputLine::stderr));
    }

    let exit = tokio::select! {
      biased;
      _ = cancel.cancelled() => Exit::Cancelled,
      status = child.wait() => match status {
        Ok(status) => Exit::Completed(status),
        Err(e) => Exit::WaitFailed(e),
      },
      _ = tokio::time::sleep_until(deadline) => Exit::TimedOut,
      _ = tx.closed() => Exit::Abandoned,
    };

    let last = match exit {
      Exit::Completed(status) => {
        let code = status.code().unwrap_or(-1);
        if tokio::time::timeout_at(deadline, drain(&mut readers)).await.is_err() {
          warn!(command = %command_line, "output still open after exit, closing");
          terminate(&mut child, pid).await;
          readers.abort_all();
        }
        debug!(command = %command_line, code, "process exited");
        Some(Ok(OutputLine::completed(code)))
      }
      Exit::WaitFailed(source) => {
        terminate(&mut child, pid).await;
        readers.abort_all();
        Some(Err(ProcessError::Wait {
          command: command_line.clone(),
          source,
        }))
      }
      Exit::TimedOut => {
        warn!(command = %command_line, timeout_secs = timeout.as_secs_f64(), "process timed out");
        terminate(&mut child, pid).await;
        let _ = tokio::time::timeout(DRAIN_GRACE, drain(&mut readers)).await;
        readers.abort_all();
        Some(Ok(OutputLine::timed_out(&command_line, timeout.as_secs_f64())))
      }
      Exit::Cancelled => {
        info!(command = %command_line, "process cancelled");
        terminate(&mut child, pid).await;
        readers.abort_all();
        Some(Err(ProcessError::Cancelled {
          command: command_line.clone(),
        }))
      }
      Exit::Abandoned => {
        debug!(command = %command_line, "output dropped, killing process");
        terminate(&mut child, pid).await;
        readers.abort_all();
        None
      }
    };

    drop(registration);

    if let Some(event) = last {
      let _ = tx.send(event).await;
    }
  }
}

async fn drain(readers: &mut JoinSet<()>) {
  while readers.join_next().await.is_some() {}
}

/// Forward every line of `reader` to `tx`, in arrival order.
async fn pump<R>(reader: R, tx: mpsc::Sender<Event>, make: fn(String) -> OutputLine)
where
  R: AsyncRead + Unpin,
{
  let mut reader = BufReader::new(reader);
  let mut buf = Vec::new();

  loop {
    buf.clear();
    match reader.read_until(b'\n', &mut buf).await {
      Ok(0) => break,
      Ok(_) => {
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
          buf.pop();
        }
        let mut line = String::from_utf8_lossy(&buf).into_owned();
        if line.len() > MAX_LINE_LENGTH {
          let mut cut = MAX_LINE_LENGTH;
          while !line.is_char_boundary(cut) {
            cut -= 1;
          }
          line.truncate(cut);
          line.push_str("... [truncated]");
        }
        if tx.send(Ok(make(line))).await.is_err() {
          break;
        }
      }
      Err(e) => {
        warn!(error = %e, "error reading process output");
        break;
      }
    }
  }
}

/// Kill the child and everything in its process group, then reap it.
///
/// `pid` is captured at spawn; tokio forgets it once the child is reaped.
async fn terminate(child: &mut Child, pid: Option<u32>) {
  #[cfg(unix)]
  {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pid) = pid
      && let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL)
      && e != nix::errno::Errno::ESRCH
    {
      warn!(pid, error = %e, "failed to kill process group");
    }
  }
  #[cfg(not(unix))]
  let _ = pid;

  if let Err(e) = child.kill().await {
    debug!(error = %e, "kill after group kill failed");
  }
}

enum OutputState {
  Pending(Box<ProcessCommand>, CancellationToken),
  Streaming(mpsc::Receiver<Event>),
  Finished,
}

/// Lazily started, single-consumption output of one process.
///
/// The process is spawned on the first call to [`next`](Self::next).
/// Dropping the output before it finishes kills the process.
pub struct ProcessOutput {
  state: OutputState,
}

impl ProcessOutput {
  /// Next output line, `None` once the run has ended.
  ///
  /// `Some(Err(_))` is always the final item.
  pub async fn next(&mut self) -> Option<Result<OutputLine, ProcessError>> {
    if matches!(self.state, OutputState::Pending(..))
      && let OutputState::Pending(command, cancel) = std::mem::replace(&mut self.state, OutputState::Finished)
    {
      match command.start(cancel) {
        Ok(rx) => self.state = OutputState::Streaming(rx),
        Err(e) => return Some(Err(e)),
      }
    }

    let OutputState::Streaming(rx) = &mut self.state else {
      return None;
    };
    match rx.recv().await {
      Some(Ok(line)) => Some(Ok(line)),
      Some(Err(e)) => {
        self.state = OutputState::Finished;
        Some(Err(e))
      }
      None => {
        self.state = OutputState::Finished;
        None
      }
    }
  }

  /// Output that yields `lines` and then ends.
  #[cfg(test)]
  pub(crate) fn replay(lines: Vec<OutputLine>) -> Self {
    let (tx, rx) = mpsc::channel(lines.len().max(1));
    for line in lines {
      let _ = tx.try_send(Ok(line));
    }
    Self {
      state: OutputState::Streaming(rx),
    }
  }

  /// Consume the whole run.
  pub async fn collect(mut self) -> Result<Vec<OutputLine>, ProcessError> {
    let mut lines = Vec::new();
    while let Some(line) = self.next().await {
      lines.push(line?);
    }
    Ok(lines)
  }
}
