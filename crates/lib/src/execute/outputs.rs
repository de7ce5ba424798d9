//! Reading applied component outputs back from the tool.
//!
//! Every generated component exports an output named after it carrying the
//! hash and version it was generated with plus the module's outputs. Comparing
//! the applied hash with the one recorded in the lock shows which components
//! have pending changes.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use super::runner::ToolRunner;
use super::types::ExecuteError;
use crate::util::hash::ObjectHash;

/// The applied state of one component.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComponentOutput {
  pub hash: String,
  #[serde(default)]
  pub version: Option<String>,
  #[serde(default)]
  pub variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OutputEntry {
  value: serde_json::Value,
}

/// Generated hash of a component next to the applied one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentStatus {
  pub name: String,
  pub generated: ObjectHash,
  /// `None` when the component has never been applied.
  pub applied: Option<String>,
}

impl ComponentStatus {
  pub fn is_current(&self) -> bool {
    self.applied.as_deref() == Some(self.generated.0.as_str())
  }
}

/// Parse `output -json` into the outputs shaped like component outputs.
fn parse_outputs(raw: &str, dir: &Path) -> Result<BTreeMap<String, ComponentOutput>, ExecuteError> {
  // Combined output may carry warnings ahead of the document.
  let Some(start) = raw.find('{') else {
    return Ok(BTreeMap::new());
  };
  let entries: BTreeMap<String, OutputEntry> =
    serde_json::from_str(&raw[start..]).map_err(|source| ExecuteError::OutputParse {
      path: dir.to_path_buf(),
      source,
    })?;

  Ok(
    entries
      .into_iter()
      .filter_map(|(name, entry)| {
        serde_json::from_value::<ComponentOutput>(entry.value)
          .ok()
          .map(|output| (name, output))
      })
      .collect(),
  )
}

async fn read_outputs(runner: &dyn ToolRunner, dir: &Path) -> Result<BTreeMap<String, ComponentOutput>, ExecuteError> {
  let raw = runner
    .run(dir, &["output".to_string(), "-json".to_string()])
    .await?;
  parse_outputs(&raw, dir)
}

/// The applied output of `component` in the unit at `dir`, if it was applied.
pub async fn component_output(
  runner: &dyn ToolRunner,
  dir: &Path,
  component: &str,
) -> Result<Option<ComponentOutput>, ExecuteError> {
  Ok(read_outputs(runner, dir).await?.remove(component))
}

/// Compare the generated hashes of a unit's components with the applied ones.
pub async fn unit_status(
  runner: &dyn ToolRunner,
  dir: &Path,
  generated: &BTreeMap<String, ObjectHash>,
) -> Result<Vec<ComponentStatus>, ExecuteError> {
  let mut applied = read_outputs(runner, dir).await?;
  let statuses: Vec<ComponentStatus> = generated
    .iter()
    .map(|(name, hash)| ComponentStatus {
      name: name.clone(),
      generated: hash.clone(),
      applied: applied.remove(name).map(|output| output.hash),
    })
    .collect();

  debug!(
    dir = %dir.display(),
    components = statuses.len(),
    pending = statuses.iter().filter(|s| !s.is_current()).count(),
    "unit status"
  );
  Ok(statuses)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::RecordingRunner;

  const OUTPUTS: &str = r#"{
  "api": {
    "sensitive": true,
    "type": ["object", {}],
    "value": {"hash": "abc123", "version": "2.1.0", "variables": {"url": "api.example.com"}}
  },
  "zone_id": {
    "sensitive": false,
    "type": "string",
    "value": "Z123"
  }
}"#;

  #[tokio::test]
  async fn reads_component_output() {
    let runner = RecordingRunner::new().respond("output", OUTPUTS);
    let output = component_output(&runner, Path::new("/out/eu"), "api")
      .await
      .unwrap()
      .unwrap();

    assert_eq!(output.hash, "abc123");
    assert_eq!(output.version.as_deref(), Some("2.1.0"));
    assert_eq!(output.variables["url"], "api.example.com");
    assert_eq!(runner.commands(), vec!["eu output -json"]);
  }

  #[tokio::test]
  async fn non_component_and_missing_outputs_are_none() {
    let runner = RecordingRunner::new().respond("output", OUTPUTS);
    let dir = Path::new("/out/eu");
    assert!(component_output(&runner, dir, "zone_id").await.unwrap().is_none());
    assert!(component_output(&runner, dir, "worker").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn nothing_applied_yet() {
    let runner = RecordingRunner::new().respond("output", "\n");
    assert!(
      component_output(&runner, Path::new("/out/eu"), "api")
        .await
        .unwrap()
        .is_none()
    );
  }

  #[tokio::test]
  async fn warnings_before_document_are_ignored() {
    let runner = RecordingRunner::new().respond("output", &format!("Warning: deprecated\n\n{OUTPUTS}"));
    let output = component_output(&runner, Path::new("/out/eu"), "api").await.unwrap();
    assert_eq!(output.unwrap().hash, "abc123");
  }

  #[tokio::test]
  async fn malformed_output() {
    let runner = RecordingRunner::new().respond("output", "{ not json");
    let err = component_output(&runner, Path::new("/out/eu"), "api")
      .await
      .unwrap_err();
    assert!(matches!(err, ExecuteError::OutputParse { .. }));
  }

  #[tokio::test]
  async fn status_compares_hashes() {
    let runner = RecordingRunner::new().respond("output", OUTPUTS);
    let generated = BTreeMap::from([
      ("api".to_string(), ObjectHash("abc123".to_string())),
      ("network".to_string(), ObjectHash("def456".to_string())),
    ]);

    let statuses = unit_status(&runner, Path::new("/out/eu"), &generated).await.unwrap();
    assert_eq!(statuses.len(), 2);
    assert!(statuses[0].is_current());
    assert_eq!(statuses[1].name, "network");
    assert_eq!(statuses[1].applied, None);
    assert!(!statuses[1].is_current());
  }
}
