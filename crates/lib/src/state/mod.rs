//! Terraform state backends per deployment unit.
//!
//! Every deployment unit gets one backend, registered under its unit key
//! before anything is rendered. Generation reads the repository to render the
//! unit's own `backend` block and the `terraform_remote_state` data sources of
//! the units it references.

mod backends;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

pub use backends::{CustomBackend, StandardBackend, is_builtin_kind, new_backend};

use crate::config::Configuration;
use crate::plugin::{PluginError, PluginRegistry};

#[derive(Debug, Error)]
pub enum StateError {
  #[error("missing backend for '{key}': no state backend is registered for it")]
  MissingBackend { key: String },

  #[error("a state backend is already registered for '{0}'")]
  DuplicateKey(String),

  #[error("units '{key}' and '{other}' both map to the remote state name '{label}'")]
  LabelCollision { key: String, other: String, label: String },

  #[error("unknown remote state kind '{0}'")]
  UnknownKind(String),

  #[error("invalid '{kind}' remote state configuration: {source}")]
  InvalidConfig {
    kind: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("plugin '{plugin}' rendered no state backend for site '{site}'")]
  EmptyBackend { plugin: String, site: String },

  #[error("state of '{key}' cannot be read as remote state: '{kind}' backends do not support it")]
  RemoteStateUnsupported { key: String, kind: String },

  #[error("failed to resolve state path: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Plugin(#[from] PluginError),
}

/// Backend of one deployment unit.
pub trait StateBackend: Send + Sync + fmt::Debug {
  /// Unit key the backend belongs to.
  fn key(&self) -> &str;

  /// The `backend "<type>" { ... }` block for the unit's own `terraform` block.
  fn backend(&self) -> Result<String, StateError>;

  /// A `data "terraform_remote_state"` block reading this unit's state.
  fn remote_state(&self) -> Result<String, StateError>;
}

/// HCL identifier of the remote state data source for a unit key.
pub fn data_source_name(key: &str) -> String {
  key
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
    .collect()
}

/// Backends keyed by unit key, plus the unit every component lives in.
#[derive(Debug, Default)]
pub struct StateRepository {
  backends: BTreeMap<String, Box<dyn StateBackend>>,
  /// Data source name to unit key.
  labels: BTreeMap<String, String>,
  components: BTreeMap<(String, String), String>,
}

impl StateRepository {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a backend for every deployment unit of every site.
  pub fn for_config(cfg: &Configuration, plugins: &PluginRegistry, state_root: &Path) -> Result<Self, StateError> {
    let remote_state = &cfg.global.terraform_config.remote_state;
    let mut repo = Self::new();

    for site in &cfg.sites {
      for unit in site.units() {
        let backend = new_backend(remote_state, &unit.key, &site.identifier, plugins, state_root)?;
        repo.add(backend)?;
        for component in &unit.components {
          repo.register_component(&site.identifier, component, &unit.key);
        }
      }
    }

    debug!(backends = repo.backends.len(), kind = %remote_state.kind, "state repository ready");
    Ok(repo)
  }

  pub fn add(&mut self, backend: Box<dyn StateBackend>) -> Result<(), StateError> {
    let key = backend.key().to_string();
    if self.backends.contains_key(&key) {
      return Err(StateError::DuplicateKey(key));
    }
    let label = data_source_name(&key);
    if let Some(other) = self.labels.get(&label) {
      return Err(StateError::LabelCollision {
        key,
        other: other.clone(),
        label,
      });
    }
    self.labels.insert(label, key.clone());
    self.backends.insert(key, backend);
    Ok(())
  }

  pub fn has(&self, key: &str) -> bool {
    self.backends.contains_key(key)
  }

  pub fn get(&self, key: &str) -> Result<&dyn StateBackend, StateError> {
    self
      .backends
      .get(key)
      .map(|b| b.as_ref())
      .ok_or_else(|| StateError::MissingBackend { key: key.to_string() })
  }

  /// Record which unit a component is deployed in.
  pub fn register_component(&mut self, site: &str, component: &str, key: &str) {
    self
      .components
      .insert((site.to_string(), component.to_string()), key.to_string());
  }

  /// Unit key of a component.
  pub fn key(&self, site: &str, component: &str) -> Option<&str> {
    self
      .components
      .get(&(site.to_string(), component.to_string()))
      .map(String::as_str)
  }

  pub fn backend_config(&self, key: &str) -> Result<String, StateError> {
    self.get(key)?.backend()
  }

  pub fn remote_state(&self, key: &str) -> Result<String, StateError> {
    self.get(key)?.remote_state()
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.backends.keys().map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{config_from, sample_config, test_registry, SAMPLE_CONFIG};

  fn root() -> &'static Path {
    Path::new("/out/main")
  }

  #[test]
  fn data_source_names_are_identifiers() {
    assert_eq!(data_source_name("eu"), "eu");
    assert_eq!(data_source_name("eu-west/worker"), "eu_west_worker");
  }

  #[test]
  fn registers_every_unit() {
    let (cfg, plugins) = sample_config();
    let repo = StateRepository::for_config(&cfg, &plugins, root()).unwrap();

    let keys: Vec<&str> = repo.keys().collect();
    assert_eq!(keys, vec!["eu", "eu/worker", "us"]);
    assert_eq!(repo.key("eu", "api"), Some("eu"));
    assert_eq!(repo.key("eu", "worker"), Some("eu/worker"));
    assert_eq!(repo.key("us", "network"), None);
  }

  #[test]
  fn missing_backend_names_the_key() {
    let repo = StateRepository::new();
    let err = repo.get("eu").unwrap_err();
    assert!(matches!(err, StateError::MissingBackend { ref key } if key == "eu"));
    assert!(err.to_string().contains("missing backend for 'eu'"));
  }

  #[test]
  fn duplicate_key_is_rejected() {
    let (cfg, plugins) = sample_config();
    let mut repo = StateRepository::for_config(&cfg, &plugins, root()).unwrap();
    let again = new_backend(&cfg.global.terraform_config.remote_state, "eu", "eu", &plugins, root()).unwrap();
    assert!(matches!(repo.add(again), Err(StateError::DuplicateKey(key)) if key == "eu"));
  }

  #[test]
  fn colliding_data_source_names_are_rejected() {
    let sites = "  - identifier: eu-west\n    components:\n      - name: worker\n  \
                 - identifier: eu_west\n    components:\n      - name: worker\n  \
                 - identifier: us\n";
    let yaml = SAMPLE_CONFIG.replace("  - identifier: us\n", sites);
    let mut plugins = test_registry();
    let cfg = config_from(&yaml, Path::new("/configs"), &mut plugins);

    let err = StateRepository::for_config(&cfg, &plugins, root()).unwrap_err();
    assert!(matches!(
      err,
      StateError::LabelCollision { ref key, ref other, ref label }
        if key == "eu_west" && other == "eu-west" && label == "eu_west"
    ));
  }

  #[test]
  fn custom_backend_comes_from_plugin() {
    let yaml = SAMPLE_CONFIG.replace(
      "      plugin: local\n      path: /states\n",
      "      plugin: dns\n      address: https://state.example.com\n",
    );
    let mut plugins = test_registry();
    let cfg = config_from(&yaml, Path::new("/configs"), &mut plugins);
    let repo = StateRepository::for_config(&cfg, &plugins, root()).unwrap();

    let block = repo.backend_config("us").unwrap();
    assert!(block.contains("backend \"http\""));
    assert!(block.contains("https://state.example.com/us"));
    assert!(matches!(
      repo.remote_state("us"),
      Err(StateError::RemoteStateUnsupported { .. })
    ));
  }
}
