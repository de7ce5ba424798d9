//! Registry of plugin instances.

use std::collections::HashMap;

use tracing::debug;

use super::{AwsPlugin, Plugin, PluginError};

/// Plugins keyed by identifier, iterated in registration order.
///
/// The registry is owned by the caller and passed down explicitly: mutably
/// while the configuration is loaded, immutably during generation.
#[derive(Default)]
pub struct PluginRegistry {
  plugins: Vec<Box<dyn Plugin>>,
  index: HashMap<String, usize>,
}

impl PluginRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry holding the plugins shipped with sitegen.
  pub fn with_builtins() -> Result<Self, PluginError> {
    let mut registry = Self::new();
    registry.register(Box::new(AwsPlugin::default()))?;
    Ok(registry)
  }

  /// Register a plugin under its identifier.
  pub fn register(&mut self, plugin: Box<dyn Plugin>) -> Result<(), PluginError> {
    let name = plugin.identifier().to_string();
    if self.index.contains_key(&name) {
      return Err(PluginError::Duplicate(name));
    }
    debug!(plugin = %name, "registering plugin");
    self.index.insert(name, self.plugins.len());
    self.plugins.push(plugin);
    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
    self.index.get(name).map(|&i| self.plugins[i].as_ref())
  }

  pub fn get_mut(&mut self, name: &str) -> Option<&mut Box<dyn Plugin>> {
    let i = *self.index.get(name)?;
    self.plugins.get_mut(i)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.index.contains_key(name)
  }

  /// Plugin identifiers in registration order.
  pub fn names(&self) -> Vec<&str> {
    self.plugins.iter().map(|p| p.identifier()).collect()
  }

  pub fn iter(&self) -> impl Iterator<Item = &dyn Plugin> {
    self.plugins.iter().map(|p| p.as_ref())
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Plugin>> {
    self.plugins.iter_mut()
  }

  pub fn len(&self) -> usize {
    self.plugins.len()
  }

  pub fn is_empty(&self) -> bool {
    self.plugins.is_empty()
  }

  /// Enabled plugins for a list of integrations, in registration order.
  ///
  /// Every name must be registered. Disabled plugins are left out.
  pub fn resolve(&self, integrations: &[String]) -> Result<Vec<&dyn Plugin>, PluginError> {
    for name in integrations {
      if !self.contains(name) {
        return Err(PluginError::UnknownIntegration(name.clone()));
      }
    }

    Ok(
      self
        .plugins
        .iter()
        .filter(|p| integrations.iter().any(|i| i == p.identifier()))
        .filter(|p| p.is_enabled())
        .map(|p| p.as_ref())
        .collect(),
    )
  }
}

impl std::fmt::Debug for PluginRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PluginRegistry").field("plugins", &self.names()).finish()
  }
}
