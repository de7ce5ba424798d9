//! Rendering of a deployment unit's `site.tf`.

use std::collections::BTreeMap;

use tracing::debug;

use super::component::render_component;
use super::serialize::quote;
use super::{GenerateError, Generator};
use crate::config::{DeploymentUnit, Site};
use crate::consts::GENERATED_HEADER;
use crate::plugin::Plugin;
use crate::util::hash::ObjectHash;

const SOPS_PROVIDER: &str = "sops = {\nsource = \"carlpett/sops\"\nversion = \"~> 1.0\"\n}\n";

/// Unformatted text of one unit plus the hashes of its components.
#[derive(Debug, Clone)]
pub struct RenderedUnit {
  pub key: String,
  pub text: String,
  pub components: BTreeMap<String, ObjectHash>,
}

/// Enabled plugins used by any component of the unit, in registry order.
pub(crate) fn unit_plugins<'p>(
  generator: &Generator<'p>,
  unit: &DeploymentUnit,
) -> Result<Vec<&'p dyn Plugin>, GenerateError> {
  let mut integrations: Vec<String> = Vec::new();
  for name in &unit.components {
    let definition = generator
      .cfg
      .definition(name)
      .ok_or_else(|| GenerateError::UnknownComponent {
        site: unit.site.clone(),
        component: name.clone(),
      })?;
    for integration in &definition.integrations {
      if !integrations.contains(integration) {
        integrations.push(integration.clone());
      }
    }
  }

  generator
    .plugins
    .resolve(&integrations)
    .map_err(|e| GenerateError::from_resolve(&unit.key, e))
}

fn site_error(plugin: &dyn Plugin, site: &Site) -> impl FnOnce(crate::plugin::PluginError) -> GenerateError {
  let plugin = plugin.identifier().to_string();
  let site = site.identifier.clone();
  move |source| GenerateError::PluginSite { plugin, site, source }
}

/// Render one deployment unit of a site.
pub fn render_unit(generator: &Generator<'_>, site: &Site, unit: &DeploymentUnit) -> Result<RenderedUnit, GenerateError> {
  let backend = generator.states.backend_config(&unit.key)?;
  let plugins = unit_plugins(generator, unit)?;

  let mut text = String::new();
  text.push_str(GENERATED_HEADER);
  text.push('\n');
  match &unit.component {
    Some(component) => text.push_str(&format!("# Site: {}, component: {}\n", site.identifier, component)),
    None => text.push_str(&format!("# Site: {}\n", site.identifier)),
  }

  text.push_str("terraform {\n");
  text.push_str(&backend);
  text.push_str("required_providers {\n");
  for plugin in &plugins {
    text.push_str(&plugin.render_providers(&site.identifier).map_err(site_error(*plugin, site))?);
  }
  if site.encrypted_sources().next().is_some() {
    text.push_str(SOPS_PROVIDER);
  }
  text.push_str("}\n}\n");

  for source in site.encrypted_sources() {
    let file = source
      .filename
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    text.push_str(&format!(
      "data \"sops_file\" {} {{\nsource_file = {}\n}}\n",
      quote(&source.data_source_name()),
      quote(&file)
    ));
  }

  for plugin in &plugins {
    text.push_str(&plugin.render_resources(&site.identifier).map_err(site_error(*plugin, site))?);
  }

  let resolver = generator.resolver();
  let mut seen = Vec::new();
  let mut components = Vec::new();
  for name in &unit.components {
    let component = site.component(name).ok_or_else(|| GenerateError::UnknownComponent {
      site: site.identifier.clone(),
      component: name.clone(),
    })?;
    for snippet in resolver.remote_states(site, component, &mut seen)? {
      text.push_str(&snippet);
    }
    components.push(component);
  }

  let mut hashes = BTreeMap::new();
  for component in components {
    let rendered = render_component(generator, site, component)?;
    text.push_str(&rendered.text);
    hashes.insert(rendered.name, rendered.hash);
  }

  debug!(unit = %unit.key, components = hashes.len(), "unit rendered");
  Ok(RenderedUnit {
    key: unit.key.clone(),
    text,
    components: hashes,
  })
}
