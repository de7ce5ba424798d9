//! Test utilities for sitegen-lib.
//!
//! Provides a configurable [`TestPlugin`], a registry built from it, a sample
//! multi-site configuration, a recording [`ToolRunner`] and shell helpers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{Configuration, parse_config};
use crate::execute::{ExecuteError, ToolRunner};
use crate::plugin::{ComponentContribution, Payload, Plugin, PluginError, PluginRegistry, decode};

#[derive(Debug, Clone, Default, Deserialize)]
struct TestSiteConfig {
  #[serde(default)]
  zone: Option<String>,
  #[serde(default)]
  fail: bool,
  /// Returned verbatim from `render_resources` when set.
  #[serde(default)]
  raw_resources: Option<String>,
}

/// Plugin whose output is derived from the payloads it received.
#[derive(Debug, Default)]
pub struct TestPlugin {
  name: String,
  environment: String,
  supports_backend: bool,
  sites: BTreeMap<String, TestSiteConfig>,
  backends: BTreeMap<String, Payload>,
  components: BTreeMap<(String, String), Payload>,
}

impl TestPlugin {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      ..Default::default()
    }
  }

  /// Accept `set_remote_state_backend` calls and render an `http` backend.
  pub fn with_backend(mut self) -> Self {
    self.supports_backend = true;
    self
  }
}

impl Plugin for TestPlugin {
  fn identifier(&self) -> &str {
    &self.name
  }

  fn configure(&mut self, environment: &str, _provider_version: Option<&str>) -> Result<(), PluginError> {
    self.environment = environment.to_string();
    Ok(())
  }

  fn is_enabled(&self) -> bool {
    !self.sites.is_empty()
  }

  fn set_remote_state_backend(&mut self, site: &str, payload: &Payload) -> Result<(), PluginError> {
    if !self.supports_backend {
      return Err(PluginError::Unsupported {
        plugin: self.name.clone(),
        operation: "remote state backends".to_string(),
      });
    }
    self.backends.insert(site.to_string(), payload.clone());
    Ok(())
  }

  fn set_site_config(&mut self, site: &str, payload: &Payload) -> Result<(), PluginError> {
    let cfg: TestSiteConfig = decode(&self.name, &format!("site '{site}'"), payload)?;
    self.sites.insert(site.to_string(), cfg);
    Ok(())
  }

  fn set_site_component_config(&mut self, site: &str, component: &str, payload: &Payload) -> Result<(), PluginError> {
    self
      .components
      .insert((site.to_string(), component.to_string()), payload.clone());
    Ok(())
  }

  fn render_state_backend(&self, site: &str) -> Result<String, PluginError> {
    let Some(payload) = self.backends.get(site) else {
      return Ok(String::new());
    };
    let address = payload.get("address").and_then(|a| a.as_str()).unwrap_or_default();
    Ok(format!("backend \"http\" {{\naddress = \"{address}/{site}\"\n}}\n"))
  }

  fn render_providers(&self, site: &str) -> Result<String, PluginError> {
    if !self.sites.contains_key(site) {
      return Ok(String::new());
    }
    Ok(format!("{0} = {{\nsource = \"test/{0}\"\n}}\n", self.name))
  }

  fn render_resources(&self, site: &str) -> Result<String, PluginError> {
    let Some(cfg) = self.sites.get(site) else {
      return Ok(String::new());
    };
    if let Some(raw) = &cfg.raw_resources {
      return Ok(raw.clone());
    }
    let zone = cfg.zone.as_deref().unwrap_or("none");
    Ok(format!(
      "resource \"null_resource\" \"{}\" {{\ntriggers = {{\nzone = \"{}\"\nenvironment = \"{}\"\n}}\n}}\n",
      self.name, zone, self.environment
    ))
  }

  fn render_component(&self, site: &str, component: &str) -> Result<Option<ComponentContribution>, PluginError> {
    let Some(cfg) = self.sites.get(site) else {
      return Ok(None);
    };
    if cfg.fail {
      return Err(PluginError::Render {
        plugin: self.name.clone(),
        message: format!("refusing to render {component}"),
      });
    }

    let extra = self
      .components
      .get(&(site.to_string(), component.to_string()))
      .map(|p| p.to_string())
      .unwrap_or_default();

    Ok(Some(ComponentContribution {
      resources: String::new(),
      variables: format!("{}_config = {:?}\n", self.name, extra),
      providers: vec![format!("{0} = {0}", self.name)],
      depends_on: vec![format!("null_resource.{}", self.name)],
    }))
  }
}

/// Registry with three test plugins: `dns` (supports custom backends), `cdn` and `mail`.
pub fn test_registry() -> PluginRegistry {
  let mut registry = PluginRegistry::new();
  for plugin in [
    TestPlugin::new("dns").with_backend(),
    TestPlugin::new("cdn"),
    TestPlugin::new("mail"),
  ] {
    registry.register(Box::new(plugin)).unwrap();
  }
  registry
}

/// Two sites; `eu` holds a shared unit and a `site-component` unit, `us`
/// depends on `eu` through a cross-site reference.
pub const SAMPLE_CONFIG: &str = r#"
global:
  environment: test
  terraform_config:
    remote_state:
      plugin: local
      path: /states
components:
  - name: network
    source: git::https://example.com/modules/network.git
    version: "1.0.0"
    integrations: [dns]
  - name: api
    source: ./modules/api
    version: "2.1.0"
    integrations: [dns, cdn]
  - name: worker
    source: ./modules/worker
    version: "0.3.0"
sites:
  - identifier: eu
    dns:
      zone: eu.example.com
    components:
      - name: network
        variables:
          cidr: 10.0.0.0/16
      - name: api
        variables:
          vpc_id: ${component.network.vpc_id}
          subnet_vpc: ${component.network.vpc_id}
        secrets:
          token: s3cret
      - name: worker
        deployment:
          type: site-component
        variables:
          api_url: https://${component.api.url}/v1
          vpc_id: ${component.network.vpc_id}
  - identifier: us
    dns:
      zone: us.example.com
    components:
      - name: api
        variables:
          upstream: ${site.eu.api.url}
"#;

/// Parse `yaml` as `<dir>/main.yml` against `plugins`.
pub fn config_from(yaml: &str, dir: &Path, plugins: &mut PluginRegistry) -> Configuration {
  parse_config(yaml, &dir.join("main.yml"), plugins).unwrap()
}

/// The sample configuration with a fresh test registry.
pub fn sample_config() -> (Configuration, PluginRegistry) {
  let mut plugins = test_registry();
  let cfg = config_from(SAMPLE_CONFIG, Path::new("/configs"), &mut plugins);
  (cfg, plugins)
}

/// Tool runner that records every invocation instead of running anything.
#[derive(Debug, Default)]
pub struct RecordingRunner {
  calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
  failures: Vec<(PathBuf, String)>,
  responses: BTreeMap<String, String>,
}

impl RecordingRunner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fail `command` in every directory ending with `dir`.
  pub fn fail(mut self, dir: &str, command: &str) -> Self {
    self.failures.push((PathBuf::from(dir), command.to_string()));
    self
  }

  /// Return `output` for `command`.
  pub fn respond(mut self, command: &str, output: &str) -> Self {
    self.responses.insert(command.to_string(), output.to_string());
    self
  }

  pub fn calls(&self) -> Vec<(PathBuf, Vec<String>)> {
    self.calls.lock().unwrap().clone()
  }

  /// `<last dir component> <args>` of every call, in call order.
  pub fn commands(&self) -> Vec<String> {
    self
      .calls()
      .into_iter()
      .map(|(dir, args)| {
        let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        format!("{} {}", name, args.join(" "))
      })
      .collect()
  }
}

#[async_trait]
impl ToolRunner for RecordingRunner {
  async fn run(&self, dir: &Path, args: &[String]) -> Result<String, ExecuteError> {
    self.calls.lock().unwrap().push((dir.to_path_buf(), args.to_vec()));
    let command = args.first().cloned().unwrap_or_default();
    if self.failures.iter().any(|(d, c)| dir.ends_with(d) && *c == command) {
      return Err(ExecuteError::CmdFailed {
        cmd: args.join(" "),
        code: Some(1),
        output: format!("{command} failed"),
      });
    }
    Ok(self.responses.get(&command).cloned().unwrap_or_default())
  }
}

/// Returns the shell command and args to execute a shell script.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), script.to_string()])
}
