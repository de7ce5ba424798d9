//! State backend implementations.
//!
//! Built-in kinds render a `backend` block and a matching
//! `terraform_remote_state` data source from the same attribute list.
//! Plugin backends only provide the `backend` block.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{StateBackend, StateError, data_source_name};
use crate::config::RemoteStateConfig;
use crate::generate::serialize::quote;
use crate::plugin::PluginRegistry;

const BUILTIN_KINDS: &[&str] = &["local", "aws", "s3", "gcp", "gcs", "azure"];

/// Whether a backend kind is handled without a plugin.
pub fn is_builtin_kind(kind: &str) -> bool {
  BUILTIN_KINDS.contains(&kind)
}

#[derive(Debug, Clone, PartialEq)]
enum Attr {
  Str(String),
  Bool(bool),
}

impl Attr {
  fn render(&self) -> String {
    match self {
      Attr::Str(s) => quote(s),
      Attr::Bool(b) => b.to_string(),
    }
  }
}

/// A backend expressed as a Terraform backend type plus attributes.
#[derive(Debug, Clone)]
pub struct StandardBackend {
  key: String,
  kind: &'static str,
  attrs: Vec<(&'static str, Attr)>,
}

impl StandardBackend {
  fn attributes(&self) -> String {
    let mut out = String::new();
    for (name, value) in &self.attrs {
      let _ = writeln!(out, "{} = {}", name, value.render());
    }
    out
  }
}

impl StateBackend for StandardBackend {
  fn key(&self) -> &str {
    &self.key
  }

  fn backend(&self) -> Result<String, StateError> {
    Ok(format!("backend \"{}\" {{\n{}}}\n", self.kind, self.attributes()))
  }

  fn remote_state(&self) -> Result<String, StateError> {
    Ok(format!(
      "data \"terraform_remote_state\" \"{}\" {{\nbackend = \"{}\"\nconfig = {{\n{}}}\n}}\n",
      data_source_name(&self.key),
      self.kind,
      self.attributes()
    ))
  }
}

/// Backend block supplied by a plugin. Cannot be read back as remote state.
#[derive(Debug, Clone)]
pub struct CustomBackend {
  key: String,
  plugin: String,
  content: String,
}

impl StateBackend for CustomBackend {
  fn key(&self) -> &str {
    &self.key
  }

  fn backend(&self) -> Result<String, StateError> {
    Ok(self.content.clone())
  }

  fn remote_state(&self) -> Result<String, StateError> {
    Err(StateError::RemoteStateUnsupported {
      key: self.key.clone(),
      kind: self.plugin.clone(),
    })
  }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocalSettings {
  #[serde(default = "default_local_path")]
  path: PathBuf,
}

fn default_local_path() -> PathBuf {
  PathBuf::from("states")
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct S3Settings {
  bucket: String,
  #[serde(default)]
  key_prefix: Option<String>,
  region: String,
  #[serde(default)]
  role_arn: Option<String>,
  #[serde(default)]
  lock_table: Option<String>,
  #[serde(default = "default_true")]
  encrypt: bool,
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GcsSettings {
  bucket: String,
  #[serde(default)]
  prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AzureSettings {
  resource_group: String,
  storage_account: String,
  container_name: String,
  #[serde(default)]
  state_folder: Option<String>,
}

fn settings<T: DeserializeOwned>(cfg: &RemoteStateConfig) -> Result<T, StateError> {
  T::deserialize(serde_json::Value::Object(cfg.settings.clone())).map_err(|source| StateError::InvalidConfig {
    kind: cfg.kind.clone(),
    source,
  })
}

fn prefixed(prefix: Option<&str>, key: &str) -> String {
  match prefix.map(|p| p.trim_end_matches('/')) {
    Some(p) if !p.is_empty() => format!("{p}/{key}"),
    _ => key.to_string(),
  }
}

/// Build the backend for one deployment unit.
///
/// Relative local state paths are resolved against `state_root`, the
/// directory holding every generated site of the configuration.
pub fn new_backend(
  cfg: &RemoteStateConfig,
  key: &str,
  site: &str,
  plugins: &PluginRegistry,
  state_root: &Path,
) -> Result<Box<dyn StateBackend>, StateError> {
  let key = key.to_string();
  let backend: Box<dyn StateBackend> = match cfg.kind.as_str() {
    "local" => {
      let s: LocalSettings = settings(cfg)?;
      let dir = if s.path.is_relative() {
        std::path::absolute(state_root.join(&s.path))?
      } else {
        s.path
      };
      let file = dir.join(format!("{key}.tfstate"));
      Box::new(StandardBackend {
        attrs: vec![("path", Attr::Str(file.to_string_lossy().into_owned()))],
        key,
        kind: "local",
      })
    }
    "aws" | "s3" => {
      let s: S3Settings = settings(cfg)?;
      let mut attrs = vec![
        ("bucket", Attr::Str(s.bucket)),
        ("key", Attr::Str(prefixed(s.key_prefix.as_deref(), &key))),
        ("region", Attr::Str(s.region)),
      ];
      if let Some(role) = s.role_arn {
        attrs.push(("role_arn", Attr::Str(role)));
      }
      if let Some(table) = s.lock_table {
        attrs.push(("dynamodb_table", Attr::Str(table)));
      }
      attrs.push(("encrypt", Attr::Bool(s.encrypt)));
      Box::new(StandardBackend { key, kind: "s3", attrs })
    }
    "gcp" | "gcs" => {
      let s: GcsSettings = settings(cfg)?;
      Box::new(StandardBackend {
        attrs: vec![
          ("bucket", Attr::Str(s.bucket)),
          ("prefix", Attr::Str(prefixed(s.prefix.as_deref(), &key))),
        ],
        key,
        kind: "gcs",
      })
    }
    "azure" => {
      let s: AzureSettings = settings(cfg)?;
      Box::new(StandardBackend {
        attrs: vec![
          ("resource_group_name", Attr::Str(s.resource_group)),
          ("storage_account_name", Attr::Str(s.storage_account)),
          ("container_name", Attr::Str(s.container_name)),
          (
            "key",
            Attr::Str(format!("{}.tfstate", prefixed(s.state_folder.as_deref(), &key))),
          ),
        ],
        key,
        kind: "azurerm",
      })
    }
    other => {
      let plugin = plugins.get(other).ok_or_else(|| StateError::UnknownKind(other.to_string()))?;
      let content = plugin.render_state_backend(site)?;
      if content.trim().is_empty() {
        return Err(StateError::EmptyBackend {
          plugin: other.to_string(),
          site: site.to_string(),
        });
      }
      Box::new(CustomBackend {
        key,
        plugin: other.to_string(),
        content,
      })
    }
  };
  Ok(backend)
}
