//! Built-in AWS integration.
//!
//! Site configuration:
//!
//! ```yaml
//! aws:
//!   account_id: "123456789012"
//!   region: eu-west-1
//!   deploy_role_name: deploy
//!   default_tags:
//!     team: platform
//!   extra_providers:
//!     - name: us
//!       region: us-east-1
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Deserialize;

use super::{ComponentContribution, Payload, Plugin, PluginError, decode};
use crate::generate::serialize::quote;

const IDENTIFIER: &str = "aws";
const DEFAULT_PROVIDER_VERSION: &str = "5.0";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SiteConfig {
  region: String,
  #[serde(default)]
  account_id: Option<String>,
  #[serde(default)]
  deploy_role_name: Option<String>,
  #[serde(default)]
  default_tags: BTreeMap<String, String>,
  #[serde(default)]
  extra_providers: Vec<ExtraProvider>,
  #[serde(skip)]
  components: BTreeMap<String, ComponentConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExtraProvider {
  name: String,
  region: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ComponentConfig {
  /// Extra provider aliases the component's module expects.
  #[serde(default)]
  providers: Vec<String>,
}

#[derive(Debug, Default)]
pub struct AwsPlugin {
  environment: String,
  provider_version: Option<String>,
  sites: BTreeMap<String, SiteConfig>,
}

/// Turn a bare version into a pessimistic constraint, pass constraints through.
fn version_constraint(version: &str) -> String {
  if version.starts_with(|c: char| c.is_ascii_digit()) {
    format!("~> {version}")
  } else {
    version.to_string()
  }
}

impl AwsPlugin {
  fn site(&self, site: &str) -> Option<&SiteConfig> {
    self.sites.get(site)
  }

  fn render_provider_block(&self, cfg: &SiteConfig, alias: Option<&str>, region: &str) -> String {
    let mut out = String::from("provider \"aws\" {\n");
    if let Some(alias) = alias {
      let _ = writeln!(out, "alias = {}", quote(alias));
    }
    let _ = writeln!(out, "region = {}", quote(region));

    if let (Some(account), Some(role)) = (&cfg.account_id, &cfg.deploy_role_name) {
      out.push_str("assume_role {\n");
      let _ = writeln!(out, "role_arn = {}", quote(&format!("arn:aws:iam::{account}:role/{role}")));
      out.push_str("}\n");
    }
    if let Some(account) = &cfg.account_id {
      let _ = writeln!(out, "allowed_account_ids = [{}]", quote(account));
    }

    out.push_str("default_tags {\n");
    out.push_str("tags = {\n");
    let _ = writeln!(out, "environment = {}", quote(&self.environment));
    for (key, value) in &cfg.default_tags {
      let _ = writeln!(out, "{} = {}", quote(key), quote(value));
    }
    out.push_str("}\n}\n}\n");
    out
  }
}

impl Plugin for AwsPlugin {
  fn identifier(&self) -> &str {
    IDENTIFIER
  }

  fn configure(&mut self, environment: &str, provider_version: Option<&str>) -> Result<(), PluginError> {
    self.environment = environment.to_string();
    self.provider_version = provider_version.map(str::to_string);
    Ok(())
  }

  fn is_enabled(&self) -> bool {
    !self.sites.is_empty()
  }

  fn set_site_config(&mut self, site: &str, payload: &Payload) -> Result<(), PluginError> {
    let cfg: SiteConfig = decode(IDENTIFIER, &format!("site '{site}'"), payload)?;
    self.sites.insert(site.to_string(), cfg);
    Ok(())
  }

  fn set_site_component_config(&mut self, site: &str, component: &str, payload: &Payload) -> Result<(), PluginError> {
    let cfg: ComponentConfig = decode(IDENTIFIER, &format!("site '{site}' component '{component}'"), payload)?;
    let site_cfg = self.sites.get_mut(site).ok_or_else(|| PluginError::MissingSiteConfig {
      plugin: IDENTIFIER.to_string(),
      site: site.to_string(),
    })?;
    site_cfg.components.insert(component.to_string(), cfg);
    Ok(())
  }

  fn render_providers(&self, site: &str) -> Result<String, PluginError> {
    if self.site(site).is_none() {
      return Ok(String::new());
    }
    let version = self.provider_version.as_deref().unwrap_or(DEFAULT_PROVIDER_VERSION);
    Ok(format!(
      "aws = {{\nsource = \"hashicorp/aws\"\nversion = {}\n}}\n",
      quote(&version_constraint(version))
    ))
  }

  fn render_resources(&self, site: &str) -> Result<String, PluginError> {
    let Some(cfg) = self.site(site) else {
      return Ok(String::new());
    };

    let mut out = self.render_provider_block(cfg, None, &cfg.region);
    for extra in &cfg.extra_providers {
      out.push_str(&self.render_provider_block(cfg, Some(&extra.name), &extra.region));
    }
    Ok(out)
  }

  fn render_component(&self, site: &str, component: &str) -> Result<Option<ComponentContribution>, PluginError> {
    let Some(cfg) = self.site(site) else {
      return Ok(None);
    };

    let mut providers = vec!["aws = aws".to_string()];
    if let Some(component_cfg) = cfg.components.get(component) {
      for alias in &component_cfg.providers {
        if !cfg.extra_providers.iter().any(|p| &p.name == alias) {
          return Err(PluginError::Render {
            plugin: IDENTIFIER.to_string(),
            message: format!("component '{component}' in site '{site}' uses unknown provider alias '{alias}'"),
          });
        }
        providers.push(format!("aws.{alias} = aws.{alias}"));
      }
    }

    Ok(Some(ComponentContribution {
      resources: String::new(),
      variables: format!("aws_region = {}\n", quote(&cfg.region)),
      providers,
      depends_on: Vec::new(),
    }))
  }
}
