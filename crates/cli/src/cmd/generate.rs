//! Implementation of the `sitegen generate` command.
//!
//! Renders every selected site into `<output>/<config name>/<site>/` and
//! leaves sites whose fingerprint matches their lock untouched.

use anyhow::Result;

use sitegen_lib::generate::SiteOutcome;

use super::{ConfigArgs, generate, load_config};
use crate::output::{print_info, print_stat, print_success};

pub fn cmd_generate(args: &ConfigArgs, verbose: bool) -> Result<()> {
  let (cfg, plugins) = load_config(args)?;
  let result = generate(&cfg, &plugins, args)?;

  let mut written = 0;
  for (site, outcome) in &result.sites {
    match outcome {
      SiteOutcome::UpToDate => print_info(&format!("{site}: no changes")),
      SiteOutcome::Written { units } => {
        written += 1;
        print_success(&format!("{site}: generated {} unit(s)", units.len()));
        if verbose {
          for key in units {
            if let Some(path) = result.locations.get(key) {
              print_stat(key, &path.display().to_string());
            }
          }
        }
      }
    }
  }

  println!();
  print_stat("Sites", &result.sites.len().to_string());
  print_stat("Regenerated", &written.to_string());

  Ok(())
}
