//! Configuration data model.
//!
//! The configuration is a single YAML document describing global settings,
//! the reusable component definitions, and the sites composing them. Keys the
//! model does not know about at a given level are kept as plugin payloads and
//! routed to the plugin of the same name during loading.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::value::Variables;
use crate::plugin::{Payload, PluginError};

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read configuration {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse configuration: {0}")]
  Parse(#[from] serde_yaml::Error),

  #[error("site '{0}' is defined more than once")]
  DuplicateSite(String),

  #[error("component '{component}' is declared more than once in site '{site}'")]
  DuplicateComponent { site: String, component: String },

  #[error("component definition '{0}' is declared more than once")]
  DuplicateDefinition(String),

  #[error("site '{site}' uses component '{component}' which has no definition")]
  UnknownComponent { site: String, component: String },

  #[error("component '{component}' requires integration '{integration}' which is not registered")]
  UnknownIntegration { component: String, integration: String },

  #[error("unknown configuration key '{name}' in {scope}: no plugin with that name is registered")]
  UnknownPluginConfig { scope: String, name: String },

  #[error("invalid reference '${{{reference}}}'")]
  InvalidReference { reference: String },

  #[error("site '{site}' component '{component}' references unknown component '{reference}'")]
  DanglingReference {
    site: String,
    component: String,
    reference: String,
  },

  #[error("deployment.runners must be at least 1, got {0}")]
  InvalidRunners(usize),

  #[error(transparent)]
  Plugin(#[from] PluginError),
}

/// The whole configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
  /// File the configuration was loaded from. Its stem names the output directory.
  #[serde(skip)]
  pub filename: PathBuf,
  pub global: GlobalConfig,
  #[serde(default)]
  pub components: Vec<ComponentDefinition>,
  #[serde(default)]
  pub sites: Vec<Site>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
  pub environment: String,
  /// Integration treated as the cloud provider of every site.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cloud: Option<String>,
  #[serde(default)]
  pub terraform_config: TerraformConfig,
  #[serde(default)]
  pub deployment: DeploymentSettings,
  /// Global plugin payloads keyed by plugin name.
  #[serde(flatten)]
  pub plugins: BTreeMap<String, Payload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerraformConfig {
  #[serde(default)]
  pub remote_state: RemoteStateConfig,
  /// Provider version constraints keyed by plugin name.
  #[serde(default)]
  pub providers: BTreeMap<String, String>,
}

/// Selection of the state backend and its settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStateConfig {
  /// Backend kind: `local`, `aws`, `gcp`, `azure` or a plugin name.
  #[serde(rename = "plugin", alias = "type", default = "default_backend_kind")]
  pub kind: String,
  #[serde(flatten)]
  pub settings: serde_json::Map<String, serde_json::Value>,
}

fn default_backend_kind() -> String {
  "local".to_string()
}

impl Default for RemoteStateConfig {
  fn default() -> Self {
    Self {
      kind: default_backend_kind(),
      settings: serde_json::Map::new(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSettings {
  /// Maximum number of units the executor runs at once.
  #[serde(default = "default_runners")]
  pub runners: usize,
}

fn default_runners() -> usize {
  1
}

impl Default for DeploymentSettings {
  fn default() -> Self {
    Self {
      runners: default_runners(),
    }
  }
}

/// A reusable component: a versioned Terraform module plus its integrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDefinition {
  pub name: String,
  pub source: String,
  #[serde(default)]
  pub version: String,
  /// Integrations in declaration order.
  #[serde(default)]
  pub integrations: Vec<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub endpoints: BTreeMap<String, String>,
  #[serde(flatten)]
  pub plugins: BTreeMap<String, Payload>,
}

impl ComponentDefinition {
  /// Whether the module source is a version-controlled repository rather than a registry.
  pub fn is_git_source(&self) -> bool {
    let source = self.source.as_str();
    source.starts_with("git::")
      || source.starts_with("git@")
      || source.starts_with("github.com/")
      || source.starts_with("bitbucket.org/")
      || source.split('?').next().is_some_and(|s| s.ends_with(".git"))
  }

  /// Module source with the version pinned for repository sources.
  pub fn module_source(&self) -> String {
    if self.version.is_empty() || !self.is_git_source() {
      return self.source.clone();
    }
    let separator = if self.source.contains('?') { '&' } else { '?' };
    format!("{}{}ref={}", self.source, separator, self.version)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
  pub identifier: String,
  #[serde(default)]
  pub components: Vec<SiteComponent>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub file_sources: Vec<FileSource>,
  /// Endpoint payloads keyed by plugin name.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub endpoints: BTreeMap<String, Payload>,
  /// Site plugin payloads keyed by plugin name.
  #[serde(flatten)]
  pub plugins: BTreeMap<String, Payload>,
}

/// A file shipped next to the generated site, optionally SOPS-encrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSource {
  pub filename: PathBuf,
  #[serde(default)]
  pub encrypted: bool,
}

impl FileSource {
  /// Name of the `sops_file` data source for an encrypted source.
  pub fn data_source_name(&self) -> String {
    let stem = self
      .filename
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    stem
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
      .collect()
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteComponent {
  pub name: String,
  #[serde(default)]
  pub variables: Variables,
  #[serde(default)]
  pub secrets: Variables,
  #[serde(default)]
  pub deployment: Deployment,
  /// Site-component plugin payloads keyed by plugin name.
  #[serde(flatten)]
  pub plugins: BTreeMap<String, Payload>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
  #[serde(rename = "type", default)]
  pub kind: DeploymentType,
}

/// Where a component is deployed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentType {
  /// Part of the site's shared root module.
  #[default]
  Site,
  /// Its own root module under the site directory.
  SiteComponent,
}

/// One Terraform root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentUnit {
  /// `<site>` or `<site>/<component>`.
  pub key: String,
  pub site: String,
  /// Set for `site-component` units.
  pub component: Option<String>,
  /// Components rendered into this unit, in declaration order.
  pub components: Vec<String>,
}

impl Site {
  pub fn component(&self, name: &str) -> Option<&SiteComponent> {
    self.components.iter().find(|c| c.name == name)
  }

  /// Key of the unit a component is deployed in.
  pub fn unit_key_for(&self, component: &SiteComponent) -> String {
    match component.deployment.kind {
      DeploymentType::Site => self.identifier.clone(),
      DeploymentType::SiteComponent => format!("{}/{}", self.identifier, component.name),
    }
  }

  /// Deployment units of this site: the shared site unit first (when any
  /// component is site-typed), then one unit per `site-component` component.
  pub fn units(&self) -> Vec<DeploymentUnit> {
    let mut units = Vec::new();

    let shared: Vec<String> = self
      .components
      .iter()
      .filter(|c| c.deployment.kind == DeploymentType::Site)
      .map(|c| c.name.clone())
      .collect();
    if !shared.is_empty() {
      units.push(DeploymentUnit {
        key: self.identifier.clone(),
        site: self.identifier.clone(),
        component: None,
        components: shared,
      });
    }

    for component in &self.components {
      if component.deployment.kind == DeploymentType::SiteComponent {
        units.push(DeploymentUnit {
          key: self.unit_key_for(component),
          site: self.identifier.clone(),
          component: Some(component.name.clone()),
          components: vec![component.name.clone()],
        });
      }
    }

    units
  }

  /// Encrypted file sources, in declaration order.
  pub fn encrypted_sources(&self) -> impl Iterator<Item = &FileSource> {
    self.file_sources.iter().filter(|f| f.encrypted)
  }
}

impl Configuration {
  pub fn site(&self, identifier: &str) -> Option<&Site> {
    self.sites.iter().find(|s| s.identifier == identifier)
  }

  pub fn definition(&self, name: &str) -> Option<&ComponentDefinition> {
    self.components.iter().find(|c| c.name == name)
  }

  /// Name of the directory generated sites are written to.
  pub fn output_name(&self) -> String {
    self
      .filename
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "sitegen".to_string())
  }
}
