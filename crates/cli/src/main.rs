mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use modpack_lib::build::Environment;
use modpack_lib::config::CONFIG_FILE;

/// modpack - build, sign and deploy the modpack
#[derive(Parser)]
#[command(name = "modpack")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Print machine-readable JSON instead of text
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Queue one build and follow it to the end
  Build(BuildArgs),

  /// Run one command through the process engine
  Exec {
    /// Kill the command after this long (e.g. 30s, 5m)
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10m")]
    timeout: Duration,

    /// Working directory (default: current directory)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Executable to run
    executable: String,

    /// Arguments passed to the executable
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
  },

  /// List the registered step kinds
  Steps,
}

#[derive(Args)]
pub struct BuildArgs {
  /// Path to the configuration file
  #[arg(short, long, default_value = CONFIG_FILE)]
  pub config: PathBuf,

  /// Target environment (dev, rc or release)
  #[arg(short, long)]
  pub environment: Environment,

  /// Version being built, e.g. 1.2.3
  #[arg(long)]
  pub version: String,

  /// Build number (default: one past the last recorded build of this version)
  #[arg(short, long)]
  pub build_number: Option<u32>,

  /// Defer the build while this file exists (e.g. a running server's pid file)
  #[arg(long)]
  pub block_file: Option<PathBuf>,

  /// How long to wait before re-checking the block file
  #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
  pub backoff: Duration,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Build(args) => cmd::cmd_build(args, cli.json),
    Commands::Exec {
      timeout,
      cwd,
      executable,
      args,
    } => cmd::cmd_exec(&executable, args, timeout, cwd),
    Commands::Steps => cmd::cmd_steps(cli.json).map(|_| ExitCode::SUCCESS),
  };

  match result {
    Ok(code) => code,
    Err(e) => {
      output::print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}
