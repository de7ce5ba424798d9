//! External tool invocation.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::types::ExecuteError;
use crate::consts::PLAN_FILENAME;

/// Runs the provisioning tool against a generated directory.
#[async_trait]
pub trait ToolRunner: Send + Sync {
  /// Run `args` in `dir` and return the combined stdout and stderr.
  async fn run(&self, dir: &Path, args: &[String]) -> Result<String, ExecuteError>;

  /// Prepare `dir` for any other command.
  async fn init(&self, dir: &Path) -> Result<String, ExecuteError> {
    self.run(dir, &["init".to_string(), "-input=false".to_string()]).await
  }

  /// The plan artifact left in `dir` by a previous plan, if any.
  fn plan_file(&self, dir: &Path) -> Option<PathBuf> {
    let path = dir.join(PLAN_FILENAME);
    path.is_file().then_some(path)
  }
}

/// Runs `terraform` (or a compatible binary) as a subprocess.
#[derive(Debug, Clone)]
pub struct TerraformRunner {
  program: String,
  base_args: Vec<String>,
}

impl Default for TerraformRunner {
  fn default() -> Self {
    Self::new("terraform")
  }
}

impl TerraformRunner {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      base_args: Vec::new(),
    }
  }

  /// Arguments placed before every command, e.g. `-c <script>` for a shell.
  pub fn with_base_args(mut self, args: Vec<String>) -> Self {
    self.base_args = args;
    self
  }

  pub fn program(&self) -> &str {
    &self.program
  }
}

#[async_trait]
impl ToolRunner for TerraformRunner {
  async fn run(&self, dir: &Path, args: &[String]) -> Result<String, ExecuteError> {
    if !dir.is_dir() {
      return Err(ExecuteError::MissingDirectory(dir.to_path_buf()));
    }

    let cmd = std::iter::once(self.program.as_str())
      .chain(args.iter().map(String::as_str))
      .collect::<Vec<_>>()
      .join(" ");
    info!(cmd = %cmd, dir = %dir.display(), "running tool");

    let output = Command::new(&self.program)
      .args(&self.base_args)
      .args(args)
      .current_dir(dir)
      .env("TF_IN_AUTOMATION", "1")
      .output()
      .await
      .map_err(|e| match e.kind() {
        ErrorKind::NotFound => ExecuteError::ToolNotFound {
          program: self.program.clone(),
        },
        _ => ExecuteError::Io(e),
      })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
      debug!(output = %combined, "command output");
      return Err(ExecuteError::CmdFailed {
        cmd,
        code: output.status.code(),
        output: combined,
      });
    }

    Ok(combined)
  }
}
