//! The persisted record of what `vhostctl` manages.
//!
//! The state file is YAML. It is rewritten atomically (temporary file, then rename) after every
//! artifact that finishes applying, so an interrupted run loses at most the artifacts in flight.

use crate::core::{Kind, ObservedArtifact, Presence};
use crate::error::Operation;
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const VERSION: u32 = 1;

/// What `vhostctl` last knew about one artifact.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct StateRecord {
    pub identity: String,
    pub kind: Kind,
    pub destination_path: String,

    /// The content last written or read. [None] if it isn't known.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rendered_content: Option<String>,

    pub last_known_presence: Presence,
}

impl StateRecord {
    /// Builds a record from a successful store operation.
    pub fn observed(kind: Kind, observed: &ObservedArtifact) -> Self {
        StateRecord {
            identity: observed.identity.clone(),
            kind,
            destination_path: observed.path.clone(),
            rendered_content: observed.content.clone(),
            last_known_presence: observed.presence(),
        }
    }

    /// Builds a record for an artifact whose remote state couldn't be established.
    pub fn unknown(identity: &str, kind: Kind, path: &str) -> Self {
        StateRecord {
            identity: identity.to_string(),
            kind,
            destination_path: path.to_string(),
            rendered_content: None,
            last_known_presence: Presence::Unknown,
        }
    }

    /// The record as the store's input for an update.
    pub fn to_observed(&self) -> ObservedArtifact {
        ObservedArtifact {
            identity: self.identity.clone(),
            path: self.destination_path.clone(),
            content: self.rendered_content.clone(),
            outcome: Operation::Read,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct StateFile {
    version: u32,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_updated: Option<DateTime<Utc>>,

    /// Keyed by identity. Order is preserved so that diffs of the file stay small.
    #[serde(default)]
    pub records: IndexMap<String, StateRecord>,

    /// Where [Self::save] writes. [None] for in-memory state.
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for StateFile {
    fn default() -> Self {
        StateFile {
            version: VERSION,
            last_updated: None,
            records: IndexMap::new(),
            path: None,
        }
    }
}

impl StateFile {
    /// Loads state from `path`. A missing file is empty state that will be saved to `path`.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();

        if !path.try_exists().unwrap_or(false) {
            debug!("No state file at {}; starting empty", path.display());
            return Ok(StateFile {
                path: Some(path),
                ..Default::default()
            });
        }

        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        let mut state: StateFile = serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse state file {}", path.display()))?;

        if state.version != VERSION {
            bail!(
                "State file {} has version {}, but this build only understands version {VERSION}",
                path.display(),
                state.version,
            );
        }

        state.path = Some(path);
        Ok(state)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, identity: &str) -> Option<&StateRecord> {
        self.records.get(identity)
    }

    pub fn upsert(&mut self, record: StateRecord) {
        self.records.insert(record.identity.clone(), record);
    }

    pub fn remove(&mut self, identity: &str) -> Option<StateRecord> {
        self.records.shift_remove(identity)
    }

    /// Writes the state to its path, if it has one.
    pub fn save(&mut self) -> anyhow::Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        self.last_updated = Some(Utc::now());
        let yaml = serde_yaml::to_string(self).context("Failed to serialize state")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let mut temp = path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        fs::write(&temp, yaml)
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        fs::rename(&temp, &path)
            .with_context(|| format!("Failed to replace state file {}", path.display()))?;

        debug!("Saved state to {}", path.display());
        Ok(())
    }
}
