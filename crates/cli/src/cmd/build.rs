//! Implementation of the `modpack build` command.
//!
//! Loads the pipeline configuration, queues one build and streams its step
//! logs until it finishes. Ctrl-C cancels every build in the queue.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::info;

use modpack_lib::build::{Build, BuildStore, Environment, FileBuildStore, StepRecord};
use modpack_lib::config::PipelineConfig;
use modpack_lib::process::MemoryProcessTracker;
use modpack_lib::processor::BuildProcessor;
use modpack_lib::queue::{BuildQueue, PidFileGuard};
use modpack_lib::step::{StepRegistry, StepServices};

use crate::BuildArgs;
use crate::output::{StepPrinter, format_duration, print_info, print_json, print_result, print_stat, print_warning};

/// One past the highest recorded build number of `version` in `environment`.
fn next_build_number(store: &dyn BuildStore, environment: Environment, version: &str) -> Result<u32> {
  let last = store
    .list()
    .context("Failed to read build records")?
    .iter()
    .filter(|b| b.environment == environment && b.version == version)
    .map(|b| b.build_number)
    .max();
  Ok(last.map_or(1, |n| n + 1))
}

fn step_duration(step: &StepRecord) -> String {
  match (step.started_at, step.finished_at) {
    (Some(start), Some(end)) => (end - start).to_std().map(format_duration).unwrap_or_default(),
    _ => String::new(),
  }
}

pub fn cmd_build(args: BuildArgs, json: bool) -> Result<ExitCode> {
  let config = PipelineConfig::load(&args.config)
    .with_context(|| format!("Failed to load configuration {}", args.config.display()))?;
  let registry = Arc::new(StepRegistry::standard());
  config.validate(&registry).context("Invalid pipeline configuration")?;

  let paths = config.paths();
  let mut services = StepServices::new(Arc::new(config.variables.clone()), paths.clone())
    .tracker(Arc::new(MemoryProcessTracker::new()));
  if let Some(workers) = config.workers {
    services = services.workers(workers);
  }

  let store = Arc::new(FileBuildStore::new(paths.builds_dir()));
  let build_number = match args.build_number {
    Some(n) => n,
    None => next_build_number(store.as_ref(), args.environment, &args.version)?,
  };
  let build = Build::new(
    args.environment,
    &args.version,
    build_number,
    &config.pipeline(args.environment)[..],
  );

  let mut processor = BuildProcessor::new(store.clone(), registry, services);
  if !json {
    let printer = Arc::new(StepPrinter::default());
    processor = processor.observer(Arc::new(move |record: &StepRecord| printer.print(record)));
    print_info(&format!("Building {} in {}", build.display_name(), paths.root().display()));
  }
  let processor = Arc::new(processor);

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let id = rt.block_on(async {
    let queue = match &args.block_file {
      Some(file) => BuildQueue::with_guard(processor, Arc::new(PidFileGuard::new(file)), args.backoff),
      None => BuildQueue::new(processor),
    };
    let id = queue.queue_build(build).context("Failed to queue build")?;

    tokio::select! {
      _ = queue.wait_idle() => {}
      signal = tokio::signal::ctrl_c() => {
        signal.context("Failed to listen for Ctrl-C")?;
        print_warning("Cancelling build");
        queue.cancel_all();
        queue.wait_idle().await;
      }
    }
    Ok::<_, anyhow::Error>(id)
  })?;

  let build = store
    .get(&id)
    .context("Failed to read build record")?
    .ok_or_else(|| anyhow!("build {id} was not recorded"))?;
  info!(build_id = %build.id, result = %build.result, "build complete");

  if json {
    print_json(&build)?;
  } else {
    println!();
    for step in &build.steps {
      print_result(&step.name, step.result, &step_duration(step));
    }
    println!();
    print_result(&build.display_name(), build.result, "");
    if let Some(commit) = &build.commit {
      print_stat("Commit", commit);
    }
    print_stat("Record", &store.base_path().join(format!("{}.json", build.id)).display().to_string());
  }

  if build.result.is_ok() {
    Ok(ExitCode::SUCCESS)
  } else {
    Ok(ExitCode::FAILURE)
  }
}
