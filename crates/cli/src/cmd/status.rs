//! Status command implementation.
//!
//! Compares the component hashes recorded by the last generation with the
//! hashes reported by the applied state of each unit.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use sitegen_lib::execute::{TerraformRunner, ToolRunner, unit_status};
use sitegen_lib::generate::unit_path;
use sitegen_lib::lockfile::LockFile;
use sitegen_lib::util::hash::ObjectHash;

use super::{ConfigArgs, ToolArgs, load_config, runtime};
use crate::output::{print_error, print_info, symbols, truncate_hash};

pub fn cmd_status(args: &ConfigArgs, tool: &ToolArgs) -> Result<()> {
  let (cfg, _plugins) = load_config(args)?;
  let root = args.output.join(cfg.output_name());
  let runner = TerraformRunner::new(&tool.tool);
  let (rt, _cancel) = runtime()?;

  let mut pending = 0;
  for site in &cfg.sites {
    if args.site.as_ref().is_some_and(|s| s != &site.identifier) {
      continue;
    }

    let lock = LockFile::load(&unit_path(&root, &site.identifier))
      .with_context(|| format!("Failed to read lock of site {}", site.identifier))?;
    let Some(entry) = lock.entry() else {
      print_info(&format!("{}: not generated, run `sitegen generate`", site.identifier));
      continue;
    };

    for unit in site.units() {
      let generated: BTreeMap<String, ObjectHash> = unit
        .components
        .iter()
        .filter_map(|name| entry.components.get(name).map(|hash| (name.clone(), hash.clone())))
        .collect();

      let dir = unit_path(&root, &unit.key);
      println!("{}", unit.key.if_supports_color(Stream::Stdout, |s| s.bold()));

      let statuses = match rt.block_on(async {
        runner.init(&dir).await?;
        unit_status(&runner, &dir, &generated).await
      }) {
        Ok(statuses) => statuses,
        Err(e) => {
          print_error(&format!("{}: {e}", unit.key));
          continue;
        }
      };

      for status in statuses {
        let generated = truncate_hash(&status.generated.0);
        match &status.applied {
          Some(_) if status.is_current() => println!(
            "  {} {} {}",
            symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
            status.name,
            generated.if_supports_color(Stream::Stdout, |s| s.dimmed())
          ),
          Some(applied) => {
            pending += 1;
            println!(
              "  {} {} {} {} {}",
              symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow()),
              status.name,
              truncate_hash(applied).if_supports_color(Stream::Stdout, |s| s.dimmed()),
              symbols::ARROW,
              generated
            );
          }
          None => {
            pending += 1;
            println!(
              "  {} {} {}",
              symbols::ADD.if_supports_color(Stream::Stdout, |s| s.green()),
              status.name,
              "not applied".if_supports_color(Stream::Stdout, |s| s.dimmed())
            );
          }
        }
      }
    }
  }

  println!();
  if pending == 0 {
    print_info("All components are up to date.");
  } else {
    print_info(&format!("{pending} component(s) with pending changes."));
  }
  Ok(())
}
