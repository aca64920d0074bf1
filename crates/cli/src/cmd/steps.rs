//! Implementation of the `modpack steps` command.

use anyhow::Result;
use serde::Serialize;

use modpack_lib::build::Environment;
use modpack_lib::step::{StepKind, standard_pipeline};

use crate::output::{print_json, print_stat};

#[derive(Serialize)]
struct StepInfo {
  name: &'static str,
  description: &'static str,
  /// Environments whose standard pipeline runs this step.
  environments: Vec<Environment>,
}

fn step_infos() -> Vec<StepInfo> {
  StepKind::ALL
    .iter()
    .map(|kind| StepInfo {
      name: kind.name(),
      description: kind.description(),
      environments: Environment::ALL
        .into_iter()
        .filter(|env| standard_pipeline(*env).contains(kind))
        .collect(),
    })
    .collect()
}

pub fn cmd_steps(json: bool) -> Result<()> {
  let steps = step_infos();
  if json {
    return print_json(&steps);
  }

  println!("Step kinds:");
  for step in &steps {
    print_stat(&format!("{:<8}", step.name), step.description);
  }
  println!();
  println!("Standard pipelines:");
  for env in Environment::ALL {
    let names: Vec<&str> = standard_pipeline(env).iter().map(|kind| kind.name()).collect();
    print_stat(&format!("{:<8}", env.as_str()), &names.join(" → "));
  }
  Ok(())
}
