//! Rendering of a single component module.

use serde::Serialize;
use tracing::debug;

use super::serialize::{quote, serialize_block};
use super::{GenerateError, Generator};
use crate::config::{ComponentDefinition, ComponentRef, Deployment, Site, SiteComponent, Variables};
use crate::plugin::ComponentContribution;
use crate::util::hash::{Hashable, ObjectHash};

/// A rendered component: its module and output blocks plus its hash.
#[derive(Debug, Clone)]
pub struct RenderedComponent {
  pub name: String,
  pub hash: ObjectHash,
  pub text: String,
}

/// Everything a component's generated module depends on.
#[derive(Debug, Serialize)]
struct ComponentHashInput<'a> {
  definition: &'a ComponentDefinition,
  variables: &'a Variables,
  secrets: &'a Variables,
  deployment: &'a Deployment,
  contributions: &'a [(String, ComponentContribution)],
}

/// Per-component aggregate of plugin contributions.
#[derive(Debug, Default)]
struct RenderContext {
  contributions: Vec<(String, ComponentContribution)>,
  providers: Vec<String>,
  depends_on: Vec<String>,
}

impl RenderContext {
  fn add(&mut self, plugin: &str, contribution: ComponentContribution) {
    for provider in &contribution.providers {
      if !self.providers.contains(provider) {
        self.providers.push(provider.clone());
      }
    }
    for dep in &contribution.depends_on {
      if !self.depends_on.contains(dep) {
        self.depends_on.push(dep.clone());
      }
    }
    self.contributions.push((plugin.to_string(), contribution));
  }
}

/// Plugin contributions for a component, in registry order.
pub(crate) fn collect_contributions(
  generator: &Generator<'_>,
  site: &Site,
  component: &SiteComponent,
  definition: &ComponentDefinition,
) -> Result<Vec<(String, ComponentContribution)>, GenerateError> {
  let plugins = generator
    .plugins
    .resolve(&definition.integrations)
    .map_err(|e| GenerateError::from_resolve(&component.name, e))?;

  let mut contributions = Vec::new();
  for plugin in plugins {
    let contribution = plugin
      .render_component(&site.identifier, &component.name)
      .map_err(|source| GenerateError::Plugin {
        plugin: plugin.identifier().to_string(),
        component: component.name.clone(),
        source,
      })?;
    if let Some(contribution) = contribution.filter(|c| !c.is_empty()) {
      contributions.push((plugin.identifier().to_string(), contribution));
    }
  }
  Ok(contributions)
}

/// Render the module and output blocks of one component.
pub fn render_component(
  generator: &Generator<'_>,
  site: &Site,
  component: &SiteComponent,
) -> Result<RenderedComponent, GenerateError> {
  let unit_key = site.unit_key_for(component);
  // The unit's own backend must exist before any plugin is asked for output.
  generator.states.get(&unit_key)?;

  let definition = generator
    .cfg
    .definition(&component.name)
    .ok_or_else(|| GenerateError::UnknownComponent {
      site: site.identifier.clone(),
      component: component.name.clone(),
    })?;

  let mut ctx = RenderContext::default();
  for (plugin, contribution) in collect_contributions(generator, site, component, definition)? {
    ctx.add(&plugin, contribution);
  }

  let resolver = generator.resolver();
  let resolve = |r: &ComponentRef| resolver.expression(site, component, &unit_key, r);

  let cloud = generator
    .cfg
    .global
    .cloud
    .as_ref()
    .is_some_and(|c| definition.integrations.contains(c));

  let variables = if !component.variables.is_empty() {
    serialize_block("variables", &component.variables, &resolve)?
  } else if cloud {
    "variables = {}\n".to_string()
  } else {
    String::new()
  };
  let secrets = if !component.secrets.is_empty() {
    serialize_block("secrets", &component.secrets, &resolve)?
  } else if cloud {
    "secrets = {}\n".to_string()
  } else {
    String::new()
  };

  let hash = ComponentHashInput {
    definition,
    variables: &component.variables,
    secrets: &component.secrets,
    deployment: &component.deployment,
    contributions: &ctx.contributions,
  }
  .compute_hash()?;

  let mut text = String::new();
  for (_, contribution) in &ctx.contributions {
    text.push_str(&contribution.resources);
  }

  text.push_str(&format!("module {} {{\n", quote(&component.name)));
  text.push_str(&format!("source = {}\n", quote(&definition.module_source())));
  text.push_str(&format!("component_version = {}\n", quote(&definition.version)));
  text.push_str(&format!("environment = {}\n", quote(&generator.cfg.global.environment)));
  text.push_str(&format!("site = {}\n", quote(&site.identifier)));
  for (_, contribution) in &ctx.contributions {
    text.push_str(&contribution.variables);
  }
  text.push_str(&variables);
  text.push_str(&secrets);
  if !ctx.providers.is_empty() {
    text.push_str("providers = {\n");
    for provider in &ctx.providers {
      text.push_str(provider);
      text.push('\n');
    }
    text.push_str("}\n");
  }
  if !ctx.depends_on.is_empty() {
    text.push_str(&format!("depends_on = [{}]\n", ctx.depends_on.join(", ")));
  }
  text.push_str("}\n");

  text.push_str(&format!("output {} {{\n", quote(&component.name)));
  text.push_str("sensitive = true\n");
  text.push_str("value = {\n");
  text.push_str(&format!("hash = {}\n", quote(&hash.0)));
  text.push_str(&format!("version = {}\n", quote(&definition.version)));
  text.push_str(&format!("variables = module.{}\n", component.name));
  text.push_str("}\n}\n");

  debug!(site = %site.identifier, component = %component.name, hash = %hash, "component rendered");

  Ok(RenderedComponent {
    name: component.name.clone(),
    hash,
    text,
  })
}
