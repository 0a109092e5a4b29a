//! Types for representing manifest files.
//!
//! A manifest lists the artifacts that should exist on the host:
//!
//! ```yaml
//! artifacts:
//!   - name: blog
//!     kind: site
//!     path: /etc/site/blog.conf
//!     server_name: blog.example.com
//!     listen_port: 8080
//!     document_root: /var/www/blog
//! ```
//!
//! `kind` defaults to `site` and `path` to the kind's default path.

use crate::core::artifact::{DesiredArtifact, Kind, RenderParams};
use crate::core::schema::{self, RENDER_FIELDS};
use crate::error::ValidationError;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
};

/// Represents a manifest file.
///
/// This type is typically parsed from a manifest file, but it can be constructed programmatically
/// as well.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Manifest {
    /// Where this manifest came from.
    ///
    /// For instance, a manifest loaded from a file should set this to the path to the file.
    #[serde(skip)]
    pub source: Option<String>,

    /// Order is preserved from the source file and determines reporting order.
    #[serde(default)]
    pub artifacts: Vec<ArtifactEntry>,
}

/// One artifact as written in a manifest file. Field presence is checked when converting to a
/// [DesiredArtifact], so that a missing field is reported by name.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ArtifactEntry {
    pub name: String,

    #[serde(default)]
    pub kind: Kind,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub server_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub listen_port: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub document_root: Option<String>,
}

impl Manifest {
    /// Reads and parses a manifest file.
    pub fn load(path: &Path) -> anyhow::Result<Manifest> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let mut manifest = Self::parse(&text)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))?;
        manifest.source = Some(path.display().to_string());
        Ok(manifest)
    }

    pub fn parse(text: &str) -> Result<Manifest, serde_yaml::Error> {
        // An empty document is an empty manifest, not an error.
        if text.trim().is_empty() {
            return Ok(Manifest::default());
        }
        serde_yaml::from_str(text)
    }

    /// Validates and renders every entry.
    ///
    /// Returns every validation error rather than stopping at the first, so the user can fix a
    /// manifest in one pass. Two artifacts may not share a name, nor resolve to the same path.
    pub fn desired_artifacts(&self) -> Result<Vec<DesiredArtifact>, Vec<ValidationError>> {
        let mut seen = HashSet::new();
        let mut owners: HashMap<String, String> = HashMap::new();
        let mut artifacts = Vec::with_capacity(self.artifacts.len());
        let mut errors = Vec::new();

        for entry in &self.artifacts {
            if !seen.insert(entry.name.as_str()) {
                errors.push(ValidationError::new(
                    schema::schema_for(entry.kind).identity_field,
                    format!("{:?} is declared more than once", entry.name),
                ));
                continue;
            }

            let artifact = match entry.to_desired() {
                Ok(artifact) => artifact,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            match owners.get(artifact.path()) {
                Some(owner) => errors.push(ValidationError::new(
                    "path",
                    format!("{} is already used by {owner:?}", artifact.path()),
                )),
                None => {
                    owners.insert(artifact.path().to_string(), entry.name.clone());
                    artifacts.push(artifact);
                }
            }
        }

        if errors.is_empty() {
            Ok(artifacts)
        } else {
            Err(errors)
        }
    }
}

impl ArtifactEntry {
    pub fn to_desired(&self) -> Result<DesiredArtifact, ValidationError> {
        let params = RenderParams {
            server_name: schema::require(RENDER_FIELDS[0], self.server_name.clone())?,
            listen_port: schema::require(RENDER_FIELDS[1], self.listen_port)?,
            document_root: schema::require(RENDER_FIELDS[2], self.document_root.clone())?,
        };

        DesiredArtifact::new(self.kind, &self.name, self.path.clone(), params)
    }
}
