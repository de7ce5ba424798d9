//! Tool actions run over every generated unit.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use super::batch_run;
use super::runner::ToolRunner;
use super::types::{BatchResult, ExecuteConfig, ExecuteError};
use crate::consts::PLAN_FILENAME;
use crate::graph::{DependencyGraph, GraphNode};

/// What to run in each unit after init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
  /// `plan`, saving the plan artifact. `lock: false` disables state locking.
  Plan { lock: bool },
  /// `apply`, from the saved plan when present. `destroy` tears down dependents first.
  Apply { auto_approve: bool, destroy: bool },
  /// `show` of the saved plan.
  Show { no_color: bool },
  Validate,
  /// Arbitrary arguments.
  Proxy(Vec<String>),
}

impl Action {
  pub fn name(&self) -> &'static str {
    match self {
      Action::Plan { .. } => "plan",
      Action::Apply { destroy: true, .. } => "destroy",
      Action::Apply { .. } => "apply",
      Action::Show { .. } => "show",
      Action::Validate => "validate",
      Action::Proxy(_) => "proxy",
    }
  }

  /// Whether dependents must run before their dependencies.
  pub fn reverses_order(&self) -> bool {
    matches!(self, Action::Apply { destroy: true, .. })
  }

  /// Tool arguments for running this action in `dir`.
  pub fn args(&self, runner: &dyn ToolRunner, dir: &Path) -> Result<Vec<String>, ExecuteError> {
    let mut args: Vec<String> = Vec::new();
    match self {
      Action::Plan { lock } => {
        args.extend(["plan", "-input=false"].map(String::from));
        args.push(format!("-out={PLAN_FILENAME}"));
        if !lock {
          args.push("-lock=false".to_string());
        }
      }
      Action::Apply { auto_approve, destroy } => {
        args.extend(["apply", "-input=false"].map(String::from));
        if *destroy {
          args.push("-destroy".to_string());
        }
        match runner.plan_file(dir) {
          Some(_) if !destroy => args.push(PLAN_FILENAME.to_string()),
          _ if *auto_approve => args.push("-auto-approve".to_string()),
          _ => {}
        }
      }
      Action::Show { no_color } => {
        if runner.plan_file(dir).is_none() {
          return Err(ExecuteError::NoPlan(dir.to_path_buf()));
        }
        args.push("show".to_string());
        if *no_color {
          args.push("-no-color".to_string());
        }
        args.push(PLAN_FILENAME.to_string());
      }
      Action::Validate => args.push("validate".to_string()),
      Action::Proxy(extra) => args.extend(extra.iter().cloned()),
    }
    Ok(args)
  }
}

/// Run the runner's init in every node of `graph`.
pub async fn init_all(
  runner: Arc<dyn ToolRunner>,
  graph: &DependencyGraph,
  config: &ExecuteConfig,
) -> Result<BatchResult, ExecuteError> {
  info!(nodes = graph.len(), "initializing");
  batch_run(graph, config, move |node: GraphNode| {
    let runner = runner.clone();
    async move { runner.init(&node.path).await }
  })
  .await
}

/// Initialize every node, then run `action` across the graph.
///
/// Any init failure aborts before the action runs anywhere.
pub async fn run_action(
  runner: Arc<dyn ToolRunner>,
  graph: &DependencyGraph,
  action: &Action,
  config: &ExecuteConfig,
) -> Result<BatchResult, ExecuteError> {
  let init = init_all(runner.clone(), graph, config).await?;
  if !init.failed.is_empty() {
    for (key, e) in &init.failed {
      error!(node = %key, error = %e, "init failed");
    }
    return Err(ExecuteError::InitFailed {
      failed: init.unsuccessful(),
    });
  }

  let ordered = if action.reverses_order() {
    graph.reversed()
  } else {
    graph.clone()
  };

  info!(action = action.name(), nodes = ordered.len(), "running action");
  let action = action.clone();
  batch_run(&ordered, config, move |node: GraphNode| {
    let runner = runner.clone();
    let action = action.clone();
    async move {
      let args = action.args(runner.as_ref(), &node.path)?;
      runner.run(&node.path, &args).await
    }
  })
  .await
}
