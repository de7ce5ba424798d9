//! Types for batched execution.
//!
//! This module defines the error, result and configuration types shared by
//! the executor, the tool runners and the actions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::graph::GraphError;

/// Why a node was not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
  /// A dependency failed or was itself skipped.
  DependencyFailed(String),
  /// Cancellation was requested before the node started.
  Cancelled,
}

impl std::fmt::Display for SkipReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SkipReason::DependencyFailed(key) => write!(f, "dependency '{key}' failed"),
      SkipReason::Cancelled => write!(f, "cancelled"),
    }
  }
}

/// Errors that can occur while driving the external tool.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// The tool exited unsuccessfully.
  #[error("command failed with exit code {code:?}: {cmd}\n{output}")]
  CmdFailed {
    cmd: String,
    code: Option<i32>,
    output: String,
  },

  #[error("'{program}' not found, is it installed and on PATH?")]
  ToolNotFound { program: String },

  #[error("directory {0} does not exist, run `sitegen generate` first")]
  MissingDirectory(PathBuf),

  #[error("no plan found for path {0}. Did you run `sitegen plan`?")]
  NoPlan(PathBuf),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to parse outputs of {path}: {source}")]
  OutputParse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// A worker task panicked or was aborted.
  #[error("task failed: {0}")]
  TaskFailed(String),

  #[error("init failed for {}", failed.join(", "))]
  InitFailed { failed: Vec<String> },

  #[error("{} failed, {} skipped: {}", failed.len(), skipped.len(), failed.join(", "))]
  BatchFailed { failed: Vec<String>, skipped: Vec<String> },

  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// Outcome of running an action over a dependency graph.
#[derive(Debug, Default)]
pub struct BatchResult {
  /// Tool output of every successful node.
  pub succeeded: BTreeMap<String, String>,

  /// Nodes whose action failed.
  pub failed: BTreeMap<String, ExecuteError>,

  /// Nodes that never started.
  pub skipped: BTreeMap<String, SkipReason>,
}

impl BatchResult {
  /// Returns true if every node ran and succeeded.
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty()
  }

  /// Returns the total number of nodes processed.
  pub fn total(&self) -> usize {
    self.succeeded.len() + self.failed.len() + self.skipped.len()
  }

  /// Node keys that failed or were skipped.
  pub fn unsuccessful(&self) -> Vec<String> {
    self.failed.keys().chain(self.skipped.keys()).cloned().collect()
  }

  /// Collapse into the successful outputs or a [`ExecuteError::BatchFailed`].
  pub fn into_result(self) -> Result<BTreeMap<String, String>, ExecuteError> {
    if self.is_success() {
      return Ok(self.succeeded);
    }
    Err(ExecuteError::BatchFailed {
      failed: self.failed.into_keys().collect(),
      skipped: self.skipped.into_keys().collect(),
    })
  }
}

/// Configuration for batched execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of nodes running at once.
  pub runners: usize,

  /// Once cancelled, no further node is started.
  pub cancel: CancellationToken,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      runners: 1,
      cancel: CancellationToken::new(),
    }
  }
}
