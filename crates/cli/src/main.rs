mod cmd;
mod output;
mod prompts;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sitegen_lib::execute::Action;

use cmd::{ConfigArgs, ToolArgs, cmd_execute, cmd_generate, cmd_status};

/// sitegen - Generate and run Terraform root modules for many sites
#[derive(Parser)]
#[command(name = "sitegen")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Generate Terraform files for every changed site
  Generate {
    #[command(flatten)]
    config: ConfigArgs,
  },

  /// Generate, then plan every unit in dependency order
  Plan {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(flatten)]
    tool: ToolArgs,

    /// Do not hold state locks while planning
    #[arg(long)]
    no_lock: bool,
  },

  /// Generate, then apply every unit in dependency order
  Apply {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(flatten)]
    tool: ToolArgs,

    /// Skip the confirmation prompt
    #[arg(long)]
    auto_approve: bool,

    /// Destroy instead, dependents first
    #[arg(long)]
    destroy: bool,
  },

  /// Show the saved plan of every unit
  Show {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(flatten)]
    tool: ToolArgs,

    /// Disable colors in the tool output
    #[arg(long)]
    no_color: bool,
  },

  /// Validate every generated unit with the tool
  Validate {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(flatten)]
    tool: ToolArgs,
  },

  /// Run arbitrary tool arguments in every unit
  Proxy {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(flatten)]
    tool: ToolArgs,

    /// Arguments passed to the tool
    #[arg(last = true, required = true)]
    args: Vec<String>,
  },

  /// Compare generated component hashes with the applied ones
  Status {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(flatten)]
    tool: ToolArgs,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_filter = if cli.verbose {
    "sitegen=debug,sitegen_lib=debug"
  } else {
    "warn"
  };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Generate { config } => cmd_generate(&config, cli.verbose),
    Commands::Plan { config, tool, no_lock } => cmd_execute(&config, &tool, Action::Plan { lock: !no_lock }, cli.verbose),
    Commands::Apply {
      config,
      tool,
      auto_approve,
      destroy,
    } => cmd_execute(&config, &tool, Action::Apply { auto_approve, destroy }, cli.verbose),
    Commands::Show { config, tool, no_color } => cmd_execute(&config, &tool, Action::Show { no_color }, cli.verbose),
    Commands::Validate { config, tool } => cmd_execute(&config, &tool, Action::Validate, cli.verbose),
    Commands::Proxy { config, tool, args } => cmd_execute(&config, &tool, Action::Proxy(args), cli.verbose),
    Commands::Status { config, tool } => cmd_status(&config, &tool),
  }
}
