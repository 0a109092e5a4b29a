//! Parses composite import identifiers.

use crate::error::ImportFormatError;
use std::{fmt, str::FromStr};

/// An `<identity>:<path>` pair naming an artifact that already exists on the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportId {
    pub identity: String,
    pub path: String,
}

impl FromStr for ImportId {
    type Err = ImportFormatError;

    /// Splits on `:`. Exactly two non-empty parts are required, so paths containing `:` can't be
    /// imported.
    fn from_str(id: &str) -> Result<Self, Self::Err> {
        let fail = |message: &str| ImportFormatError {
            id: id.to_string(),
            message: message.to_string(),
        };

        let parts: Vec<&str> = id.split(':').collect();
        let [identity, path] = parts.as_slice() else {
            return Err(fail("expected <identity>:<path>"));
        };

        if identity.is_empty() {
            return Err(fail("identity is empty"));
        }
        if path.is_empty() {
            return Err(fail("path is empty"));
        }

        Ok(ImportId {
            identity: identity.to_string(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for ImportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.identity, self.path)
    }
}
