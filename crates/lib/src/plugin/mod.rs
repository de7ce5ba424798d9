//! Vendor integration plugins.
//!
//! A plugin accumulates configuration while the configuration is loaded and
//! then contributes HCL fragments during generation:
//!
//! 1. `configure` once with the environment and provider version
//! 2. `set_*_config` calls with untyped payloads, decoded with [`decode`]
//! 3. `render_*` calls, which must be pure functions of the accumulated state
//!
//! A plugin that never received a site-level configuration call is disabled and
//! is never asked to render.

mod aws;
mod registry;

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use aws::AwsPlugin;
pub use registry::PluginRegistry;

/// Untyped configuration fragment handed to a plugin.
pub type Payload = serde_json::Value;

/// Errors raised by plugins.
#[derive(Debug, Error)]
pub enum PluginError {
  #[error("plugin '{plugin}' could not decode configuration for {scope}: {source}")]
  Decode {
    plugin: String,
    scope: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("plugin '{plugin}' does not support {operation}")]
  Unsupported { plugin: String, operation: String },

  #[error("plugin '{plugin}' has no configuration for site '{site}'")]
  MissingSiteConfig { plugin: String, site: String },

  #[error("plugin '{plugin}' failed to render: {message}")]
  Render { plugin: String, message: String },

  #[error("integration '{0}' is not registered")]
  UnknownIntegration(String),

  #[error("plugin '{0}' is already registered")]
  Duplicate(String),
}

/// Decode a payload into a plugin's own schema type.
///
/// `scope` names the site or component the payload belongs to so that a shape
/// mismatch points at the offending part of the configuration.
pub fn decode<T: DeserializeOwned>(plugin: &str, scope: &str, payload: &Payload) -> Result<T, PluginError> {
  T::deserialize(payload).map_err(|source| PluginError::Decode {
    plugin: plugin.to_string(),
    scope: scope.to_string(),
    source,
  })
}

/// What a plugin adds to one component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComponentContribution {
  /// Resource blocks emitted before the module block.
  pub resources: String,
  /// Attribute lines merged into the module block.
  pub variables: String,
  /// Provider mappings (`aws = aws`, `aws.us = aws.us`) for the module's `providers` map.
  pub providers: Vec<String>,
  /// Expressions the module must depend on.
  pub depends_on: Vec<String>,
}

impl ComponentContribution {
  pub fn is_empty(&self) -> bool {
    self.resources.is_empty() && self.variables.is_empty() && self.providers.is_empty() && self.depends_on.is_empty()
  }
}

/// The contract every vendor integration implements.
pub trait Plugin: Send + Sync {
  /// Integration name as used in component definitions and configuration keys.
  fn identifier(&self) -> &str;

  /// Receive environment-wide settings. Called once, before any other configuration.
  fn configure(&mut self, environment: &str, provider_version: Option<&str>) -> Result<(), PluginError>;

  /// Whether the plugin received any site-level configuration.
  fn is_enabled(&self) -> bool;

  /// Declare a custom remote-state backend for a site.
  fn set_remote_state_backend(&mut self, site: &str, _payload: &Payload) -> Result<(), PluginError> {
    Err(PluginError::Unsupported {
      plugin: self.identifier().to_string(),
      operation: format!("remote state backends (site '{site}')"),
    })
  }

  fn set_global_config(&mut self, _payload: &Payload) -> Result<(), PluginError> {
    Ok(())
  }

  fn set_site_config(&mut self, site: &str, payload: &Payload) -> Result<(), PluginError>;

  fn set_site_component_config(&mut self, _site: &str, _component: &str, _payload: &Payload) -> Result<(), PluginError> {
    Ok(())
  }

  fn set_component_config(&mut self, _component: &str, _payload: &Payload) -> Result<(), PluginError> {
    Ok(())
  }

  fn set_site_endpoints_config(&mut self, _site: &str, _payload: &Payload) -> Result<(), PluginError> {
    Ok(())
  }

  fn set_component_endpoints_config(
    &mut self,
    _component: &str,
    _endpoints: &BTreeMap<String, String>,
  ) -> Result<(), PluginError> {
    Ok(())
  }

  /// Backend block body for a custom backend. Empty means no backend.
  fn render_state_backend(&self, _site: &str) -> Result<String, PluginError> {
    Ok(String::new())
  }

  /// Entries for the `required_providers` block.
  fn render_providers(&self, site: &str) -> Result<String, PluginError>;

  /// Site-scoped resources such as provider configurations.
  fn render_resources(&self, site: &str) -> Result<String, PluginError>;

  /// Per-component contribution, `None` when the plugin adds nothing.
  fn render_component(&self, site: &str, component: &str) -> Result<Option<ComponentContribution>, PluginError>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;
  use serde_json::json;

  #[derive(Debug, Deserialize)]
  struct Schema {
    region: String,
  }

  #[test]
  fn decode_into_schema() {
    let schema: Schema = decode("aws", "site 'eu'", &json!({ "region": "eu-west-1" })).unwrap();
    assert_eq!(schema.region, "eu-west-1");
  }

  #[test]
  fn decode_error_names_scope() {
    let err = decode::<Schema>("aws", "site 'eu'", &json!({ "region": 12 })).unwrap_err();
    assert!(matches!(err, PluginError::Decode { ref plugin, .. } if plugin == "aws"));
    assert!(err.to_string().contains("site 'eu'"));
  }

  #[test]
  fn empty_contribution() {
    assert!(ComponentContribution::default().is_empty());
    let contribution = ComponentContribution {
      depends_on: vec!["aws_iam_role.deploy".to_string()],
      ..Default::default()
    };
    assert!(!contribution.is_empty());
  }
}
