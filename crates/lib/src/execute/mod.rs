//! Batched execution over the dependency graph.
//!
//! This module drives the external tool across generated units. It handles:
//! - Wave-by-wave ordering from the [`DependencyGraph`]
//! - A fixed pool of workers per wave, bounded by the runner count
//! - Failure isolation: a failed node never cancels its siblings, but every
//!   node depending on it is skipped
//! - Cancellation: once requested, nodes that have not started are skipped
//!   while running invocations finish

pub mod actions;
pub mod outputs;
pub mod runner;
pub mod types;

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::graph::{DependencyGraph, GraphNode};

pub use actions::{Action, init_all, run_action};
pub use outputs::{ComponentOutput, ComponentStatus, component_output, unit_status};
pub use runner::{TerraformRunner, ToolRunner};
pub use types::{BatchResult, ExecuteConfig, ExecuteError, SkipReason};

enum NodeOutcome {
  Finished(Result<String, ExecuteError>),
  Cancelled,
}

/// Run `action` for every node of `graph` in dependency order.
///
/// This is the main entry point for execution. It:
/// 1. Computes the graph's waves (failing on a cycle before anything runs)
/// 2. Skips nodes whose dependencies failed or were skipped
/// 3. Drains the remaining nodes of a wave with at most `config.runners` workers
/// 4. Waits for the whole wave before releasing the next one
///
/// Node failures are collected in the returned [`BatchResult`]; only graph
/// errors are returned as `Err`.
pub async fn batch_run<F, Fut>(
  graph: &DependencyGraph,
  config: &ExecuteConfig,
  action: F,
) -> Result<BatchResult, ExecuteError>
where
  F: Fn(GraphNode) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<String, ExecuteError>> + Send + 'static,
{
  let waves = graph.waves()?;
  let runners = config.runners.max(1);
  info!(nodes = graph.len(), wave_count = waves.len(), runners, "starting batch");

  let action = Arc::new(action);
  let mut result = BatchResult::default();
  let mut blocked: HashSet<String> = HashSet::new();

  for (wave_idx, wave) in waves.iter().enumerate() {
    let mut ready = VecDeque::new();
    for key in wave {
      let failed_dep = graph.dependencies(key).into_iter().find(|dep| blocked.contains(*dep));
      if let Some(dep) = failed_dep {
        warn!(node = %key, failed_dep = %dep, "skipping node due to failed dependency");
        result
          .skipped
          .insert(key.clone(), SkipReason::DependencyFailed(dep.to_string()));
        blocked.insert(key.clone());
      } else if config.cancel.is_cancelled() {
        result.skipped.insert(key.clone(), SkipReason::Cancelled);
        blocked.insert(key.clone());
      } else if let Some(node) = graph.node(key) {
        ready.push_back(node.clone());
      }
    }

    if ready.is_empty() {
      continue;
    }

    debug!(wave = wave_idx, nodes = ready.len(), "executing wave");
    let keys: Vec<String> = ready.iter().map(|node| node.key.clone()).collect();
    let mut outcomes = run_wave(ready, runners, &config.cancel, action.clone()).await;

    for key in keys {
      match outcomes.remove(&key) {
        Some(NodeOutcome::Finished(Ok(output))) => {
          info!(node = %key, "node succeeded");
          result.succeeded.insert(key, output);
        }
        Some(NodeOutcome::Finished(Err(e))) => {
          error!(node = %key, error = %e, "node failed");
          blocked.insert(key.clone());
          result.failed.insert(key, e);
        }
        Some(NodeOutcome::Cancelled) => {
          debug!(node = %key, "node cancelled before start");
          blocked.insert(key.clone());
          result.skipped.insert(key, SkipReason::Cancelled);
        }
        None => {
          blocked.insert(key.clone());
          let e = ExecuteError::TaskFailed(format!("worker stopped before '{key}' finished"));
          result.failed.insert(key, e);
        }
      }
    }
  }

  info!(
    succeeded = result.succeeded.len(),
    failed = result.failed.len(),
    skipped = result.skipped.len(),
    "batch complete"
  );

  Ok(result)
}

/// Drain `nodes` with a fixed pool of workers and wait for all of them.
async fn run_wave<F, Fut>(
  nodes: VecDeque<GraphNode>,
  runners: usize,
  cancel: &CancellationToken,
  action: Arc<F>,
) -> HashMap<String, NodeOutcome>
where
  F: Fn(GraphNode) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<String, ExecuteError>> + Send + 'static,
{
  let workers = runners.min(nodes.len());
  let queue = Arc::new(Mutex::new(nodes));
  let mut join_set = JoinSet::new();

  for worker in 0..workers {
    let queue = queue.clone();
    let action = action.clone();
    let cancel = cancel.clone();

    join_set.spawn(async move {
      let mut outcomes = Vec::new();
      loop {
        let Some(node) = queue.lock().await.pop_front() else {
          break;
        };
        if cancel.is_cancelled() {
          outcomes.push((node.key, NodeOutcome::Cancelled));
          continue;
        }
        debug!(worker, node = %node.key, "starting node");
        let key = node.key.clone();
        let result = (*action)(node).await;
        outcomes.push((key, NodeOutcome::Finished(result)));
      }
      outcomes
    });
  }

  let mut outcomes = HashMap::new();
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok(finished) => outcomes.extend(finished),
      Err(e) => error!(error = %e, "worker task panicked"),
    }
  }
  outcomes
}
