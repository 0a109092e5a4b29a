//! Types describing one configuration artifact, as declared and as observed on the host.

use crate::core::{render, schema};
use crate::error::{Operation, ValidationError};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The flavors of artifact `vhostctl` manages.
///
/// Every kind renders the same template. They differ only in the name of their identity
/// attribute, which shows up in error messages and manifest files. See [schema::schema_for].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    #[default]
    Site,
    Api,
    Config,
    Proxy,
}

impl Kind {
    pub const ALL: [Kind; 4] = [Kind::Site, Kind::Api, Kind::Config, Kind::Proxy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Site => "site",
            Kind::Api => "api",
            Kind::Config => "config",
            Kind::Proxy => "proxy",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                ValidationError::new("kind", format!("{s:?} is not one of site, api, config, proxy"))
            })
    }
}

/// The values substituted into the server-block template.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RenderParams {
    pub server_name: String,

    /// Signed and wide so that out-of-range input reaches validation instead of failing to parse.
    pub listen_port: i64,

    pub document_root: String,
}

/// Whether an artifact exists on the host, as far as `vhostctl` knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Present,
    Absent,

    /// A remote command was issued but did not complete successfully. The artifact may or may
    /// not exist, and it may hold partial content.
    Unknown,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Presence::Present => "present",
            Presence::Absent => "absent",
            Presence::Unknown => "unknown",
        })
    }
}

/// An artifact as the user declared it.
///
/// Construction validates every field and renders the content, so holding a [DesiredArtifact]
/// proves that it can be written without further local checks. The rendered content is derived
/// and can't be set directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesiredArtifact {
    identity: String,
    kind: Kind,
    path: String,
    params: RenderParams,
    content: String,
}

impl DesiredArtifact {
    /// Validates and renders an artifact. If `path` is [None], the kind's default path is used.
    pub fn new(
        kind: Kind,
        identity: impl Into<String>,
        path: Option<String>,
        params: RenderParams,
    ) -> Result<Self, ValidationError> {
        let identity = identity.into();
        let schema = schema::schema_for(kind);
        schema.validate_identity(&identity)?;

        let path = match path {
            Some(p) => {
                schema::validate_path(&p)?;
                p
            }
            None => schema.default_path(&identity),
        };

        let content = render(&params)?;

        Ok(DesiredArtifact {
            identity,
            kind,
            path,
            params,
            content,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The absolute path of the file on the host.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &RenderParams {
        &self.params
    }

    /// The rendered file content.
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// An artifact as last seen on the host, returned by every store operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedArtifact {
    pub identity: String,
    pub path: String,

    /// The file's content, or [None] if the file does not exist.
    pub content: Option<String>,

    /// The operation that produced this observation.
    pub outcome: Operation,
}

impl ObservedArtifact {
    pub fn presence(&self) -> Presence {
        match self.content {
            Some(_) => Presence::Present,
            None => Presence::Absent,
        }
    }
}
