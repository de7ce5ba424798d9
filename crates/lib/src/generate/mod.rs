//! Generation of Terraform root modules from a configuration.
//!
//! # Flow
//!
//! For every selected site:
//!
//! 1. Compute the site fingerprint and compare it with the site's lock
//! 2. If unchanged, skip the site without touching the filesystem
//! 3. Render every deployment unit, format and validate it, write `site.tf`
//! 4. Copy the site's file sources next to each unit
//! 5. Advance and save the lock
//!
//! Output layout: `<output>/<config name>/<site>/site.tf`, with
//! `site-component` units in `<output>/<config name>/<site>/<component>/`.

pub mod component;
pub mod format;
pub mod remote;
pub mod serialize;
pub mod site;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

pub use component::{RenderedComponent, render_component};
pub use format::{format_hcl, validate_hcl};
pub use remote::ReferenceResolver;
pub use site::{RenderedUnit, render_unit};

use crate::config::{ComponentDefinition, ConfigError, Configuration, GlobalConfig, Site};
use crate::consts::{SITE_FILENAME, TOOL_VERSION};
use crate::lockfile::{LockError, LockFile, fingerprint};
use crate::plugin::{ComponentContribution, PluginError, PluginRegistry};
use crate::state::{StateError, StateRepository};
use crate::util::hash::{ContentHash, FileHashError, ObjectHash, hash_file};

#[derive(Debug, Error)]
pub enum GenerateError {
  #[error("site '{0}' is not defined in the configuration")]
  UnknownSite(String),

  #[error("site '{site}' uses component '{component}' which has no definition")]
  UnknownComponent { site: String, component: String },

  #[error("integration '{integration}' required by '{component}' is not registered")]
  UnknownIntegration { component: String, integration: String },

  #[error("site '{site}' component '{component}' references unknown component '{reference}'")]
  UnknownReference {
    site: String,
    component: String,
    reference: String,
  },

  #[error("plugin '{plugin}' failed to render component '{component}': {source}")]
  Plugin {
    plugin: String,
    component: String,
    #[source]
    source: PluginError,
  },

  #[error("plugin '{plugin}' failed to render site '{site}': {source}")]
  PluginSite {
    plugin: String,
    site: String,
    #[source]
    source: PluginError,
  },

  #[error(transparent)]
  Registry(PluginError),

  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("failed to hash component: {0}")]
  Hash(#[from] serde_json::Error),

  /// Formatted output does not parse. Indicates a defect in template composition.
  #[error("generated output is not valid HCL: {message}")]
  InvalidOutput { message: String },

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  FileSource(#[from] FileHashError),

  #[error("failed to write {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl GenerateError {
  /// Map a registry lookup failure for `component`.
  pub(crate) fn from_resolve(component: &str, err: PluginError) -> Self {
    match err {
      PluginError::UnknownIntegration(integration) => GenerateError::UnknownIntegration {
        component: component.to_string(),
        integration,
      },
      other => GenerateError::Registry(other),
    }
  }

  fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.to_path_buf();
    move |source| GenerateError::Io { path, source }
  }
}

/// Options for [`write_files`].
#[derive(Debug, Clone)]
pub struct GenerateOptions {
  /// Root directory of all generated output.
  pub output_path: PathBuf,
  /// Only generate this site.
  pub site: Option<String>,
}

/// What happened to a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteOutcome {
  /// Fingerprint matched the lock; nothing was written.
  UpToDate,
  /// Files were written for these unit keys.
  Written { units: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
  /// Directory of every deployment unit of the configuration, by unit key.
  pub locations: BTreeMap<String, PathBuf>,
  pub sites: BTreeMap<String, SiteOutcome>,
}

/// Directory of a unit below the configuration's output root.
pub fn unit_path(root: &Path, key: &str) -> PathBuf {
  key.split('/').fold(root.to_path_buf(), |path, segment| path.join(segment))
}

/// Directories of every deployment unit, keyed by unit key.
pub fn file_locations(cfg: &Configuration, output_path: &Path) -> BTreeMap<String, PathBuf> {
  let root = output_path.join(cfg.output_name());
  cfg
    .sites
    .iter()
    .flat_map(|site| site.units())
    .map(|unit| {
      let path = unit_path(&root, &unit.key);
      (unit.key, path)
    })
    .collect()
}

/// Render output of one plugin for one site, part of the site fingerprint.
#[derive(Debug, Serialize)]
struct PluginFingerprint {
  plugin: String,
  providers: String,
  resources: String,
  components: BTreeMap<String, Vec<(String, ComponentContribution)>>,
}

/// Every input that affects the files generated for a site.
#[derive(Debug, Serialize)]
struct SiteFingerprint<'a> {
  tool_version: &'static str,
  global: &'a GlobalConfig,
  site: &'a Site,
  definitions: Vec<&'a ComponentDefinition>,
  backends: BTreeMap<String, String>,
  remote_states: BTreeMap<String, String>,
  plugins: Vec<PluginFingerprint>,
  file_sources: Vec<(PathBuf, ContentHash)>,
}

/// Renders the sites of one configuration.
pub struct Generator<'a> {
  pub cfg: &'a Configuration,
  pub plugins: &'a PluginRegistry,
  pub states: StateRepository,
}

impl<'a> Generator<'a> {
  /// Set up the state repository for every unit before anything is rendered.
  pub fn new(cfg: &'a Configuration, plugins: &'a PluginRegistry, output_path: &Path) -> Result<Self, GenerateError> {
    let states = StateRepository::for_config(cfg, plugins, &output_path.join(cfg.output_name()))?;
    Ok(Self { cfg, plugins, states })
  }

  pub fn resolver(&self) -> ReferenceResolver<'_> {
    ReferenceResolver::new(self.cfg, &self.states)
  }

  /// Render and format every unit of a site, in unit order.
  pub fn render_site(&self, site: &Site) -> Result<Vec<RenderedUnit>, GenerateError> {
    site
      .units()
      .iter()
      .map(|unit| {
        let mut rendered = render_unit(self, site, unit)?;
        rendered.text = format_hcl(&rendered.text);
        Ok(rendered)
      })
      .collect()
  }

  /// Fingerprint of a site's effective configuration.
  ///
  /// Covers the tool version, the global settings, the site itself, the
  /// definitions it uses, the backends of its units and of the units it reads,
  /// everything the enabled plugins render for it, and file source contents.
  pub fn fingerprint(&self, site: &Site) -> Result<ContentHash, GenerateError> {
    let definitions = site
      .components
      .iter()
      .filter_map(|c| self.cfg.definition(&c.name))
      .collect();

    let resolver = self.resolver();
    let mut backends = BTreeMap::new();
    let mut remote_states = BTreeMap::new();
    let mut plugins: Vec<PluginFingerprint> = Vec::new();

    for unit in site.units() {
      backends.insert(unit.key.clone(), self.states.backend_config(&unit.key)?);

      for plugin in site::unit_plugins(self, &unit)? {
        if plugins.iter().any(|p| p.plugin == plugin.identifier()) {
          continue;
        }
        let err = |source: PluginError| GenerateError::PluginSite {
          plugin: plugin.identifier().to_string(),
          site: site.identifier.clone(),
          source,
        };
        plugins.push(PluginFingerprint {
          plugin: plugin.identifier().to_string(),
          providers: plugin.render_providers(&site.identifier).map_err(err)?,
          resources: plugin.render_resources(&site.identifier).map_err(err)?,
          components: BTreeMap::new(),
        });
      }
    }

    for component in &site.components {
      for key in resolver.referenced_units(site, component)? {
        if !remote_states.contains_key(&key) {
          let snippet = self.states.remote_state(&key)?;
          remote_states.insert(key, snippet);
        }
      }
      let Some(definition) = self.cfg.definition(&component.name) else {
        continue;
      };
      let contributions = component::collect_contributions(self, site, component, definition)?;
      for entry in &mut plugins {
        let own: Vec<(String, ComponentContribution)> = contributions
          .iter()
          .filter(|(name, _)| name == &entry.plugin)
          .cloned()
          .collect();
        if !own.is_empty() {
          entry.components.insert(component.name.clone(), own);
        }
      }
    }

    let mut file_sources = Vec::new();
    for source in &site.file_sources {
      file_sources.push((source.filename.clone(), hash_file(&source.filename)?));
    }

    Ok(fingerprint(&SiteFingerprint {
      tool_version: TOOL_VERSION,
      global: &self.cfg.global,
      site,
      definitions,
      backends,
      remote_states,
      plugins,
      file_sources,
    })?)
  }

  /// Generate one site below `root` unless its lock is clean.
  pub fn write_site(&self, site: &Site, root: &Path) -> Result<SiteOutcome, GenerateError> {
    let site_dir = root.join(&site.identifier);
    let mut lock = LockFile::load(&site_dir)?;
    let fingerprint = self.fingerprint(site)?;

    if !lock.has_changes(&fingerprint) {
      info!(site = %site.identifier, "no changes, skipping");
      return Ok(SiteOutcome::UpToDate);
    }

    // A site without components has no unit directory but still gets a lock.
    fs::create_dir_all(&site_dir).map_err(GenerateError::io(&site_dir))?;

    let mut units = Vec::new();
    let mut hashes: BTreeMap<String, ObjectHash> = BTreeMap::new();
    for rendered in self.render_site(site)? {
      let dir = unit_path(root, &rendered.key);
      fs::create_dir_all(&dir).map_err(GenerateError::io(&dir))?;

      let file = dir.join(SITE_FILENAME);
      fs::write(&file, &rendered.text).map_err(GenerateError::io(&file))?;
      if let Err(e) = validate_hcl(&rendered.text) {
        error!(
          unit = %rendered.key,
          path = %file.display(),
          error = %e,
          "generated output is not valid HCL, this is a bug in sitegen or one of its plugins"
        );
      }

      for source in &site.file_sources {
        if let Some(name) = source.filename.file_name() {
          let target = dir.join(name);
          fs::copy(&source.filename, &target).map_err(GenerateError::io(&target))?;
        }
      }

      hashes.extend(rendered.components);
      units.push(rendered.key);
    }

    lock.update(fingerprint, hashes);
    lock.save()?;
    info!(site = %site.identifier, units = units.len(), "site generated");
    Ok(SiteOutcome::Written { units })
  }
}

/// Generate every selected site of a configuration.
pub fn write_files(
  cfg: &Configuration,
  plugins: &PluginRegistry,
  options: &GenerateOptions,
) -> Result<GenerateResult, GenerateError> {
  if let Some(site) = &options.site {
    if cfg.site(site).is_none() {
      return Err(GenerateError::UnknownSite(site.clone()));
    }
  }

  let generator = Generator::new(cfg, plugins, &options.output_path)?;
  let root = options.output_path.join(cfg.output_name());

  let mut sites = BTreeMap::new();
  for site in &cfg.sites {
    if options.site.as_ref().is_some_and(|s| s != &site.identifier) {
      continue;
    }
    let outcome = generator.write_site(site, &root)?;
    sites.insert(site.identifier.clone(), outcome);
  }

  Ok(GenerateResult {
    locations: file_locations(cfg, &options.output_path),
    sites,
  })
}
