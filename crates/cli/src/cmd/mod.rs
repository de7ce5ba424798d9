mod execute;
mod generate;
mod status;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use sitegen_lib::config::{self, Configuration};
use sitegen_lib::generate::{GenerateOptions, GenerateResult, Generator, write_files};
use sitegen_lib::graph::DependencyGraph;
use sitegen_lib::plugin::PluginRegistry;

pub use execute::cmd_execute;
pub use generate::cmd_generate;
pub use status::cmd_status;

/// Options shared by every command that reads a configuration.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
  /// Path to the configuration file
  #[arg(short, long, default_value = "sitegen.yml")]
  pub file: PathBuf,

  /// Root directory of the generated output
  #[arg(short, long, default_value = "output")]
  pub output: PathBuf,

  /// Only process this site
  #[arg(short, long)]
  pub site: Option<String>,
}

/// Options shared by every command that runs the provisioning tool.
#[derive(Debug, Clone, Args)]
pub struct ToolArgs {
  /// Provisioning tool binary
  #[arg(long, default_value = "terraform")]
  pub tool: String,

  /// Number of units run at once (default: deployment.runners from the configuration)
  #[arg(short, long)]
  pub runners: Option<usize>,
}

impl ConfigArgs {
  fn generate_options(&self) -> GenerateOptions {
    GenerateOptions {
      output_path: self.output.clone(),
      site: self.site.clone(),
    }
  }
}

/// Load the configuration with the builtin plugins.
fn load_config(args: &ConfigArgs) -> Result<(Configuration, PluginRegistry)> {
  let mut plugins = PluginRegistry::with_builtins().context("Failed to register builtin plugins")?;
  let cfg = config::load(&args.file, &mut plugins)
    .with_context(|| format!("Failed to load configuration: {}", args.file.display()))?;
  Ok((cfg, plugins))
}

/// Generate the selected sites, skipping unchanged ones.
fn generate(cfg: &Configuration, plugins: &PluginRegistry, args: &ConfigArgs) -> Result<GenerateResult> {
  write_files(cfg, plugins, &args.generate_options()).context("Generation failed")
}

/// Dependency graph over the generated units of the selected sites.
fn build_graph(
  cfg: &Configuration,
  plugins: &PluginRegistry,
  args: &ConfigArgs,
  result: &GenerateResult,
) -> Result<DependencyGraph> {
  let locations: BTreeMap<String, PathBuf> = result
    .locations
    .iter()
    .filter(|(key, _)| match &args.site {
      Some(site) => key.split('/').next() == Some(site.as_str()),
      None => true,
    })
    .map(|(key, path)| (key.clone(), path.clone()))
    .collect();

  let generator = Generator::new(cfg, plugins, &args.output).context("Failed to prepare state backends")?;
  DependencyGraph::from_config(&generator, &locations).context("Failed to build dependency graph")
}

/// Runtime whose cancellation token fires on Ctrl-C.
fn runtime() -> Result<(Runtime, CancellationToken)> {
  let rt = Runtime::new().context("Failed to create async runtime")?;
  let cancel = CancellationToken::new();

  let token = cancel.clone();
  rt.spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupted, waiting for running units to finish");
      token.cancel();
    }
  });

  Ok((rt, cancel))
}
