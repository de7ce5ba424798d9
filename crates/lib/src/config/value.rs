//! Typed variable and secret values.
//!
//! Values come straight from the YAML configuration. String values may embed
//! references to the outputs of other components:
//!
//! - `${component.<name>.<output>}` points at a component of the same site
//! - `${site.<site>.<name>.<output>}` points at a component of another site
//!
//! The output part may be a dotted path (`${component.api.endpoints.public}`).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::ConfigError;

/// Matches a single `${...}` reference inside a string.
static REFERENCE_PATTERN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\$\{\s*((?:component|site)\.[^}\s]+)\s*\}").expect("reference pattern is valid"));

/// Variables or secrets of a component, keyed by name.
///
/// A [`BTreeMap`] keeps iteration order stable, which keeps serialized output
/// and hashes deterministic.
pub type Variables = BTreeMap<String, Value>;

/// A variable or secret value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  #[default]
  Null,
  Boolean(bool),
  Number(serde_json::Number),
  String(String),
  Array(Vec<Value>),
  Table(BTreeMap<String, Value>),
}

/// A reference to an output of another component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ComponentRef {
  /// Site holding the component, `None` for the referencing component's own site.
  pub site: Option<String>,
  /// Referenced component name.
  pub component: String,
  /// Output path within the component (dotted).
  pub output: String,
}

impl ComponentRef {
  /// Parse the inside of a `${...}` reference.
  pub fn parse(expr: &str) -> Result<Self, ConfigError> {
    let invalid = || ConfigError::InvalidReference {
      reference: expr.to_string(),
    };

    let parts: Vec<&str> = expr.split('.').collect();
    match parts.as_slice() {
      ["component", component, output @ ..] if !output.is_empty() && !component.is_empty() => Ok(Self {
        site: None,
        component: component.to_string(),
        output: output.join("."),
      }),
      ["site", site, component, output @ ..] if !output.is_empty() && !site.is_empty() && !component.is_empty() => {
        Ok(Self {
          site: Some(site.to_string()),
          component: component.to_string(),
          output: output.join("."),
        })
      }
      _ => Err(invalid()),
    }
  }

  /// Site the reference points at, given the referencing site.
  pub fn target_site<'a>(&'a self, current: &'a str) -> &'a str {
    self.site.as_deref().unwrap_or(current)
  }
}

impl fmt::Display for ComponentRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.site {
      Some(site) => write!(f, "site.{}.{}.{}", site, self.component, self.output),
      None => write!(f, "component.{}.{}", self.component, self.output),
    }
  }
}

/// A piece of a string value: literal text or a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment<'a> {
  Literal(&'a str),
  Reference(ComponentRef),
}

/// Split a string into literal and reference segments.
pub fn segments(s: &str) -> Result<Vec<Segment<'_>>, ConfigError> {
  let mut result = Vec::new();
  let mut last = 0;

  for captures in REFERENCE_PATTERN.captures_iter(s) {
    let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
      continue;
    };
    if whole.start() > last {
      result.push(Segment::Literal(&s[last..whole.start()]));
    }
    result.push(Segment::Reference(ComponentRef::parse(inner.as_str())?));
    last = whole.end();
  }

  if last < s.len() {
    result.push(Segment::Literal(&s[last..]));
  }

  Ok(result)
}

impl Value {
  /// Collect every reference in this value, depth first, in first-seen order.
  pub fn references(&self) -> Result<Vec<ComponentRef>, ConfigError> {
    let mut refs = Vec::new();
    self.collect_references(&mut refs)?;
    Ok(refs)
  }

  fn collect_references(&self, refs: &mut Vec<ComponentRef>) -> Result<(), ConfigError> {
    match self {
      Value::String(s) => {
        for segment in segments(s)? {
          if let Segment::Reference(r) = segment {
            refs.push(r);
          }
        }
      }
      Value::Array(items) => {
        for item in items {
          item.collect_references(refs)?;
        }
      }
      Value::Table(map) => {
        for value in map.values() {
          value.collect_references(refs)?;
        }
      }
      Value::Null | Value::Boolean(_) | Value::Number(_) => {}
    }
    Ok(())
  }
}

/// List the references of a variables map, in key order.
pub fn list_references(variables: &Variables) -> Result<Vec<ComponentRef>, ConfigError> {
  let mut refs = Vec::new();
  for value in variables.values() {
    value.collect_references(&mut refs)?;
  }
  Ok(refs)
}
