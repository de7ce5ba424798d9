//! Per-site lock files gating regeneration.
//!
//! Every generated site directory holds a `sitegen.lock` recording the
//! fingerprint of the inputs the site was last generated from. A site whose
//! current fingerprint matches is left untouched.
//!
//! # Lock File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "toolVersion": "0.7.0",
//!   "fingerprint": "9f86d081884c7d65...",
//!   "updatedAt": 1733667300,
//!   "components": {
//!     "api": "a1b2c3d4e5f6789012ab"
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::{LOCK_FILENAME, TOOL_VERSION};
use crate::util::hash::{ContentHash, Hashable, ObjectHash};

/// Current lock file format version.
pub const LOCK_VERSION: u32 = 1;

/// Errors that can occur when working with lock files.
#[derive(Debug, Error)]
pub enum LockError {
  /// Failed to read the lock file.
  #[error("failed to read lock file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to write the lock file.
  #[error("failed to write lock file {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to parse the lock file JSON.
  #[error("failed to parse lock file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// Failed to serialize the lock file or the fingerprint input.
  #[error("failed to serialize lock data: {0}")]
  Serialize(#[source] serde_json::Error),
}

/// The persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockEntry {
  pub version: u32,
  pub tool_version: String,
  pub fingerprint: ContentHash,
  /// Unix timestamp of the last successful write.
  pub updated_at: u64,
  /// Component name to rendered component hash.
  #[serde(default)]
  pub components: BTreeMap<String, ObjectHash>,
}

/// Where a site stands relative to its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
  /// No usable lock record.
  Unknown,
  /// Fingerprint matches the record.
  Clean,
  /// Fingerprint differs from the record.
  Dirty,
  /// Updated in this run, not necessarily saved yet.
  Written,
}

/// Lock file of one site directory.
#[derive(Debug, Clone)]
pub struct LockFile {
  path: PathBuf,
  entry: Option<LockEntry>,
  written: bool,
}

/// Fingerprint of any serializable input.
pub fn fingerprint<T: Serialize + ?Sized>(input: &T) -> Result<ContentHash, LockError> {
  input.compute_content_hash().map_err(LockError::Serialize)
}

fn now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or_default()
}

impl LockFile {
  /// Load the lock of a site directory.
  ///
  /// A missing file, or a record written by an incompatible format version,
  /// loads as an empty lock so the site is regenerated.
  pub fn load(site_dir: &Path) -> Result<Self, LockError> {
    let path = site_dir.join(LOCK_FILENAME);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Ok(Self {
          path,
          entry: None,
          written: false,
        });
      }
      Err(source) => return Err(LockError::Read { path, source }),
    };

    let entry: LockEntry = serde_json::from_str(&content).map_err(|source| LockError::Parse {
      path: path.clone(),
      source,
    })?;

    let entry = if entry.version == LOCK_VERSION {
      Some(entry)
    } else {
      warn!(
        path = %path.display(),
        found = entry.version,
        expected = LOCK_VERSION,
        "ignoring lock file with unsupported version"
      );
      None
    };

    Ok(Self {
      path,
      entry,
      written: false,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn entry(&self) -> Option<&LockEntry> {
    self.entry.as_ref()
  }

  /// Compare a fingerprint against the record.
  pub fn state(&self, fingerprint: &ContentHash) -> LockState {
    if self.written {
      return LockState::Written;
    }
    match &self.entry {
      None => LockState::Unknown,
      Some(entry) if &entry.fingerprint == fingerprint => LockState::Clean,
      Some(_) => LockState::Dirty,
    }
  }

  /// Whether the site must be regenerated for this fingerprint.
  pub fn has_changes(&self, fingerprint: &ContentHash) -> bool {
    matches!(self.state(fingerprint), LockState::Unknown | LockState::Dirty)
  }

  /// Record a new fingerprint. Call only after the site was written.
  pub fn update(&mut self, fingerprint: ContentHash, components: BTreeMap<String, ObjectHash>) {
    self.entry = Some(LockEntry {
      version: LOCK_VERSION,
      tool_version: TOOL_VERSION.to_string(),
      fingerprint,
      updated_at: now(),
      components,
    });
    self.written = true;
  }

  /// Persist the record as pretty-printed JSON.
  pub fn save(&self) -> Result<(), LockError> {
    let Some(entry) = &self.entry else {
      return Ok(());
    };
    let content = serde_json::to_string_pretty(entry).map_err(LockError::Serialize)?;
    fs::write(&self.path, content).map_err(|source| LockError::Write {
      path: self.path.clone(),
      source,
    })?;
    debug!(path = %self.path.display(), "lock file saved");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn components() -> BTreeMap<String, ObjectHash> {
    let mut map = BTreeMap::new();
    map.insert("api".to_string(), ObjectHash("a1b2c3d4e5f6789012ab".to_string()));
    map
  }

  mod fingerprints {
    use super::*;

    #[test]
    fn equal_inputs_equal_fingerprints() {
      assert_eq!(fingerprint(&("eu", 1)).unwrap(), fingerprint(&("eu", 1)).unwrap());
      assert_ne!(fingerprint(&("eu", 1)).unwrap(), fingerprint(&("eu", 2)).unwrap());
    }
  }

  mod state_machine {
    use super::*;

    #[test]
    fn missing_lock_is_unknown() {
      let temp = TempDir::new().unwrap();
      let lock = LockFile::load(temp.path()).unwrap();
      let fp = fingerprint("cfg").unwrap();

      assert!(lock.entry().is_none());
      assert_eq!(lock.state(&fp), LockState::Unknown);
      assert!(lock.has_changes(&fp));
    }

    #[test]
    fn saved_lock_is_clean_for_same_fingerprint() {
      let temp = TempDir::new().unwrap();
      let fp = fingerprint("cfg").unwrap();

      let mut lock = LockFile::load(temp.path()).unwrap();
      lock.update(fp.clone(), components());
      assert_eq!(lock.state(&fp), LockState::Written);
      lock.save().unwrap();

      let reloaded = LockFile::load(temp.path()).unwrap();
      assert_eq!(reloaded.state(&fp), LockState::Clean);
      assert!(!reloaded.has_changes(&fp));
      assert_eq!(reloaded.entry().unwrap().components, components());
      assert_eq!(reloaded.entry().unwrap().tool_version, TOOL_VERSION);
    }

    #[test]
    fn changed_fingerprint_is_dirty() {
      let temp = TempDir::new().unwrap();
      let mut lock = LockFile::load(temp.path()).unwrap();
      lock.update(fingerprint("old").unwrap(), BTreeMap::new());
      lock.save().unwrap();

      let reloaded = LockFile::load(temp.path()).unwrap();
      let fp = fingerprint("new").unwrap();
      assert_eq!(reloaded.state(&fp), LockState::Dirty);
      assert!(reloaded.has_changes(&fp));
    }

    #[test]
    fn update_without_save_does_not_touch_disk() {
      let temp = TempDir::new().unwrap();
      let mut lock = LockFile::load(temp.path()).unwrap();
      lock.update(fingerprint("cfg").unwrap(), BTreeMap::new());
      assert!(!temp.path().join(LOCK_FILENAME).exists());
    }
  }

  mod persistence {
    use super::*;

    #[test]
    fn format_uses_camel_case() {
      let temp = TempDir::new().unwrap();
      let mut lock = LockFile::load(temp.path()).unwrap();
      lock.update(fingerprint("cfg").unwrap(), components());
      lock.save().unwrap();

      let content = fs::read_to_string(temp.path().join(LOCK_FILENAME)).unwrap();
      assert!(content.contains("\"toolVersion\""));
      assert!(content.contains("\"updatedAt\""));
      assert!(content.contains("\"api\": \"a1b2c3d4e5f6789012ab\""));
    }

    #[test]
    fn unsupported_version_is_ignored() {
      let temp = TempDir::new().unwrap();
      let content = r#"{"version": 99, "toolVersion": "0.1.0", "fingerprint": "abc", "updatedAt": 0}"#;
      fs::write(temp.path().join(LOCK_FILENAME), content).unwrap();

      let lock = LockFile::load(temp.path()).unwrap();
      assert!(lock.entry().is_none());
      assert_eq!(lock.state(&ContentHash("abc".to_string())), LockState::Unknown);
    }

    #[test]
    fn corrupt_lock_is_an_error() {
      let temp = TempDir::new().unwrap();
      fs::write(temp.path().join(LOCK_FILENAME), "not json").unwrap();
      assert!(matches!(LockFile::load(temp.path()), Err(LockError::Parse { .. })));
    }

    #[test]
    fn save_into_missing_directory_fails() {
      let temp = TempDir::new().unwrap();
      let mut lock = LockFile::load(&temp.path().join("missing")).unwrap();
      lock.update(fingerprint("cfg").unwrap(), BTreeMap::new());
      assert!(matches!(lock.save(), Err(LockError::Write { .. })));
    }
  }
}
