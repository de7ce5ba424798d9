//! Loading, validation and plugin configuration.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use super::types::{ConfigError, Configuration};
use super::value::list_references;
use crate::plugin::{Payload, PluginRegistry};
use crate::state::is_builtin_kind;

/// Load a configuration file and feed the plugin payloads it contains to `plugins`.
pub fn load(path: &Path, plugins: &mut PluginRegistry) -> Result<Configuration, ConfigError> {
  let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let cfg = parse_config(&content, path, plugins)?;
  info!(
    path = %path.display(),
    sites = cfg.sites.len(),
    components = cfg.components.len(),
    "configuration loaded"
  );
  Ok(cfg)
}

/// Parse configuration text. Relative file sources are resolved against the
/// directory of `filename`.
pub fn parse_config(content: &str, filename: &Path, plugins: &mut PluginRegistry) -> Result<Configuration, ConfigError> {
  let mut cfg: Configuration = serde_yaml::from_str(content)?;
  cfg.filename = filename.to_path_buf();

  if let Some(base) = filename.parent() {
    for site in &mut cfg.sites {
      for source in &mut site.file_sources {
        if source.filename.is_relative() {
          source.filename = base.join(&source.filename);
        }
      }
    }
  }

  validate(&cfg, plugins)?;
  configure_plugins(&cfg, plugins)?;
  Ok(cfg)
}

fn check_plugin_keys<'a>(
  plugins: &PluginRegistry,
  scope: impl Fn() -> String,
  keys: impl IntoIterator<Item = &'a String>,
) -> Result<(), ConfigError> {
  for name in keys {
    if !plugins.contains(name) {
      return Err(ConfigError::UnknownPluginConfig {
        scope: scope(),
        name: name.clone(),
      });
    }
  }
  Ok(())
}

/// Structural checks that need the whole document.
pub fn validate(cfg: &Configuration, plugins: &PluginRegistry) -> Result<(), ConfigError> {
  if cfg.global.deployment.runners == 0 {
    return Err(ConfigError::InvalidRunners(0));
  }

  check_plugin_keys(plugins, || "global".to_string(), cfg.global.plugins.keys())?;

  let mut definitions = HashSet::new();
  for def in &cfg.components {
    if !definitions.insert(def.name.as_str()) {
      return Err(ConfigError::DuplicateDefinition(def.name.clone()));
    }
    for integration in &def.integrations {
      if !plugins.contains(integration) {
        return Err(ConfigError::UnknownIntegration {
          component: def.name.clone(),
          integration: integration.clone(),
        });
      }
    }
    check_plugin_keys(plugins, || format!("component '{}'", def.name), def.plugins.keys())?;
  }

  let mut sites = HashSet::new();
  for site in &cfg.sites {
    if !sites.insert(site.identifier.as_str()) {
      return Err(ConfigError::DuplicateSite(site.identifier.clone()));
    }
    check_plugin_keys(plugins, || format!("site '{}'", site.identifier), site.plugins.keys())?;
    check_plugin_keys(
      plugins,
      || format!("site '{}' endpoints", site.identifier),
      site.endpoints.keys(),
    )?;

    let mut names = HashSet::new();
    for component in &site.components {
      if !names.insert(component.name.as_str()) {
        return Err(ConfigError::DuplicateComponent {
          site: site.identifier.clone(),
          component: component.name.clone(),
        });
      }
      if cfg.definition(&component.name).is_none() {
        return Err(ConfigError::UnknownComponent {
          site: site.identifier.clone(),
          component: component.name.clone(),
        });
      }
      check_plugin_keys(
        plugins,
        || format!("site '{}' component '{}'", site.identifier, component.name),
        component.plugins.keys(),
      )?;
    }
  }

  // References are checked once every site is known.
  for site in &cfg.sites {
    for component in &site.components {
      let refs = list_references(&component.variables)?
        .into_iter()
        .chain(list_references(&component.secrets)?);
      for reference in refs {
        let target = cfg
          .site(reference.target_site(&site.identifier))
          .and_then(|s| s.component(&reference.component));
        if target.is_none() {
          return Err(ConfigError::DanglingReference {
            site: site.identifier.clone(),
            component: component.name.clone(),
            reference: reference.to_string(),
          });
        }
      }
    }
  }

  Ok(())
}

/// Hand every plugin payload of the configuration to its plugin.
///
/// Order: environment, global payloads, component definitions, then per site
/// the site payload, its endpoints, its components and finally the custom
/// state backend when the backend kind names a plugin.
pub fn configure_plugins(cfg: &Configuration, plugins: &mut PluginRegistry) -> Result<(), ConfigError> {
  let providers = &cfg.global.terraform_config.providers;
  for plugin in plugins.iter_mut() {
    let version = providers.get(plugin.identifier()).map(String::as_str);
    plugin.configure(&cfg.global.environment, version)?;
  }

  for (name, payload) in &cfg.global.plugins {
    if let Some(plugin) = plugins.get_mut(name) {
      plugin.set_global_config(payload)?;
    }
  }

  for def in &cfg.components {
    for (name, payload) in &def.plugins {
      if let Some(plugin) = plugins.get_mut(name) {
        plugin.set_component_config(&def.name, payload)?;
      }
    }
    if !def.endpoints.is_empty() {
      for integration in &def.integrations {
        if let Some(plugin) = plugins.get_mut(integration) {
          plugin.set_component_endpoints_config(&def.name, &def.endpoints)?;
        }
      }
    }
  }

  let remote_state = &cfg.global.terraform_config.remote_state;
  let custom_backend = !is_builtin_kind(&remote_state.kind) && plugins.contains(&remote_state.kind);

  for site in &cfg.sites {
    for (name, payload) in &site.plugins {
      if let Some(plugin) = plugins.get_mut(name) {
        plugin.set_site_config(&site.identifier, payload)?;
      }
    }
    for (name, payload) in &site.endpoints {
      if let Some(plugin) = plugins.get_mut(name) {
        plugin.set_site_endpoints_config(&site.identifier, payload)?;
      }
    }
    for component in &site.components {
      for (name, payload) in &component.plugins {
        if let Some(plugin) = plugins.get_mut(name) {
          plugin.set_site_component_config(&site.identifier, &component.name, payload)?;
        }
      }
    }
    if custom_backend {
      if let Some(plugin) = plugins.get_mut(&remote_state.kind) {
        let payload = Payload::Object(remote_state.settings.clone());
        plugin.set_remote_state_backend(&site.identifier, &payload)?;
      }
    }
    debug!(site = %site.identifier, "plugins configured for site");
  }

  Ok(())
}
