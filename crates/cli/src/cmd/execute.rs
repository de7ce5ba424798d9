//! Implementation of the tool commands: `plan`, `apply`, `show`, `validate`
//! and `proxy`.
//!
//! Each one regenerates changed sites first, builds the dependency graph over
//! the selected units and runs the action across it in waves.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use sitegen_lib::execute::{Action, BatchResult, ExecuteConfig, TerraformRunner, ToolRunner, run_action};

use super::{ConfigArgs, ToolArgs, build_graph, generate, load_config, runtime};
use crate::output::{format_duration, print_error, print_info, print_stat, print_success, print_warning};
use crate::prompts::confirm;

pub fn cmd_execute(args: &ConfigArgs, tool: &ToolArgs, action: Action, verbose: bool) -> Result<()> {
  let (cfg, plugins) = load_config(args)?;
  let generated = generate(&cfg, &plugins, args)?;
  let graph = build_graph(&cfg, &plugins, args, &generated)?;

  if graph.is_empty() {
    print_info("Nothing to run.");
    return Ok(());
  }

  let action = match action {
    Action::Apply {
      auto_approve: false,
      destroy,
    } => {
      let verb = if destroy { "Destroy" } else { "Apply" };
      if !confirm(&format!("{verb} {} unit(s)?", graph.len()))? {
        print_info("Aborted.");
        return Ok(());
      }
      Action::Apply {
        auto_approve: true,
        destroy,
      }
    }
    other => other,
  };

  let (rt, cancel) = runtime()?;
  let config = ExecuteConfig {
    runners: tool.runners.unwrap_or(cfg.global.deployment.runners),
    cancel,
  };
  let runner: Arc<dyn ToolRunner> = Arc::new(TerraformRunner::new(&tool.tool));

  let start = Instant::now();
  let result = rt
    .block_on(run_action(runner, &graph, &action, &config))
    .with_context(|| format!("{} failed", action.name()))?;

  let show_output = verbose || matches!(action, Action::Show { .. } | Action::Proxy(_));
  print_result(&result, show_output);

  println!();
  print_stat("Units", &result.total().to_string());
  print_stat("Duration", &format_duration(start.elapsed()));

  result
    .into_result()
    .with_context(|| format!("{} did not complete", action.name()))?;
  Ok(())
}

fn print_result(result: &BatchResult, show_output: bool) {
  for (key, output) in &result.succeeded {
    print_success(key);
    if show_output {
      for line in output.lines() {
        println!("    {line}");
      }
    }
  }
  for (key, err) in &result.failed {
    print_error(&format!("{key}: {err}"));
  }
  for (key, reason) in &result.skipped {
    print_warning(&format!("{key}: skipped, {reason}"));
  }
}
