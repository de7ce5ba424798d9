//! Resolution of component references into HCL expressions and remote state
//! data sources.

use tracing::trace;

use super::GenerateError;
use crate::config::{ComponentRef, Configuration, Site, SiteComponent, list_references};
use crate::state::{StateError, StateRepository, data_source_name};

/// Resolves references against the configuration and the state repository.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceResolver<'a> {
  cfg: &'a Configuration,
  states: &'a StateRepository,
}

impl<'a> ReferenceResolver<'a> {
  pub fn new(cfg: &'a Configuration, states: &'a StateRepository) -> Self {
    Self { cfg, states }
  }

  /// Unit key of the component a reference points at.
  pub fn target_key(&self, site: &Site, component: &SiteComponent, reference: &ComponentRef) -> Result<String, GenerateError> {
    let target_site = reference.target_site(&site.identifier);
    let exists = self
      .cfg
      .site(target_site)
      .is_some_and(|s| s.component(&reference.component).is_some());
    if !exists {
      return Err(GenerateError::UnknownReference {
        site: site.identifier.clone(),
        component: component.name.clone(),
        reference: reference.to_string(),
      });
    }

    let key = self
      .states
      .key(target_site, &reference.component)
      .ok_or_else(|| StateError::MissingBackend {
        key: target_site.to_string(),
      })?;
    Ok(key.to_string())
  }

  /// HCL expression for a reference made from the unit `unit_key`.
  ///
  /// Components of the same unit are read from their module directly; any
  /// other component goes through its unit's remote state.
  pub fn expression(
    &self,
    site: &Site,
    component: &SiteComponent,
    unit_key: &str,
    reference: &ComponentRef,
  ) -> Result<String, GenerateError> {
    let key = self.target_key(site, component, reference)?;
    if key == unit_key {
      return Ok(format!("module.{}.{}", reference.component, reference.output));
    }
    Ok(format!(
      "data.terraform_remote_state.{}.outputs.{}.variables.{}",
      data_source_name(&key),
      reference.component,
      reference.output
    ))
  }

  /// Unit keys a component reads remote state from, in first-seen order
  /// (variables before secrets), without duplicates and without its own unit.
  pub fn referenced_units(&self, site: &Site, component: &SiteComponent) -> Result<Vec<String>, GenerateError> {
    let own = site.unit_key_for(component);
    let refs = list_references(&component.variables)?
      .into_iter()
      .chain(list_references(&component.secrets)?);

    let mut keys: Vec<String> = Vec::new();
    for reference in refs {
      let key = self.target_key(site, component, &reference)?;
      if key != own && !keys.contains(&key) {
        keys.push(key);
      }
    }
    Ok(keys)
  }

  /// Remote state data sources for the units a component reads from,
  /// skipping keys already present in `seen`.
  pub fn remote_states(
    &self,
    site: &Site,
    component: &SiteComponent,
    seen: &mut Vec<String>,
  ) -> Result<Vec<String>, GenerateError> {
    let mut snippets = Vec::new();
    for key in self.referenced_units(site, component)? {
      if seen.contains(&key) {
        continue;
      }
      trace!(site = %site.identifier, component = %component.name, key = %key, "adding remote state");
      snippets.push(self.states.remote_state(&key)?);
      seen.push(key);
    }
    Ok(snippets)
  }
}
