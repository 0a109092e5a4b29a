//! Per-kind field rules.
//!
//! The four artifact kinds share one set of render fields and differ in the name of their
//! identity attribute. Keeping that in a table means adding a kind is a one-row change.

use crate::core::artifact::{Kind, RenderParams};
use crate::error::ValidationError;
use std::path::Path;

/// The directory holding artifacts whose path is not declared.
pub const DEFAULT_DIR: &str = "/etc/nginx/sites-available";

/// A constraint checked against one field value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Constraint {
    NonEmpty,
    PortRange,
    AbsolutePath,

    /// Letters, digits, `.`, `_`, and `-`, not starting with `.`. Identities double as file
    /// names and as the first half of an import ID, so `/` and `:` are excluded.
    Identifier,
}

/// One field of a manifest entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldRule {
    pub field: &'static str,
    pub required: bool,
    pub constraint: Constraint,
}

/// The render fields every kind carries.
pub const RENDER_FIELDS: &[FieldRule] = &[
    FieldRule {
        field: "server_name",
        required: true,
        constraint: Constraint::NonEmpty,
    },
    FieldRule {
        field: "listen_port",
        required: true,
        constraint: Constraint::PortRange,
    },
    FieldRule {
        field: "document_root",
        required: true,
        constraint: Constraint::NonEmpty,
    },
];

/// The optional destination path.
pub const PATH_FIELD: FieldRule = FieldRule {
    field: "path",
    required: false,
    constraint: Constraint::AbsolutePath,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KindSchema {
    pub kind: Kind,

    /// What the identity attribute is called for this kind, e.g. `site_name`.
    pub identity_field: &'static str,

    pub default_dir: &'static str,
}

static SCHEMAS: [KindSchema; 4] = [
    KindSchema {
        kind: Kind::Site,
        identity_field: "site_name",
        default_dir: DEFAULT_DIR,
    },
    KindSchema {
        kind: Kind::Api,
        identity_field: "api_name",
        default_dir: DEFAULT_DIR,
    },
    KindSchema {
        kind: Kind::Config,
        identity_field: "config_name",
        default_dir: DEFAULT_DIR,
    },
    KindSchema {
        kind: Kind::Proxy,
        identity_field: "proxy_name",
        default_dir: DEFAULT_DIR,
    },
];

pub fn schema_for(kind: Kind) -> &'static KindSchema {
    // SCHEMAS is indexed in declaration order of Kind.
    &SCHEMAS[kind as usize]
}

impl KindSchema {
    pub fn identity_rule(&self) -> FieldRule {
        FieldRule {
            field: self.identity_field,
            required: true,
            constraint: Constraint::Identifier,
        }
    }

    pub fn validate_identity(&self, identity: &str) -> Result<(), ValidationError> {
        check_text(self.identity_rule(), identity)
    }

    /// Returns `<default_dir>/<identity>.conf`.
    pub fn default_path(&self, identity: &str) -> String {
        format!("{}/{identity}.conf", self.default_dir)
    }
}

pub fn validate_path(path: &str) -> Result<(), ValidationError> {
    check_text(PATH_FIELD, path)
}

/// Checks the render fields against [RENDER_FIELDS].
pub fn validate_params(params: &RenderParams) -> Result<(), ValidationError> {
    for rule in RENDER_FIELDS {
        match rule.field {
            "listen_port" => check_integer(*rule, params.listen_port)?,
            "server_name" => check_text(*rule, &params.server_name)?,
            "document_root" => check_text(*rule, &params.document_root)?,
            _ => (),
        }
    }
    Ok(())
}

/// Returns an error naming the first required field that is missing.
pub fn require<T>(rule: FieldRule, value: Option<T>) -> Result<T, ValidationError> {
    value.ok_or_else(|| ValidationError::new(rule.field, "is required"))
}

pub fn check_text(rule: FieldRule, value: &str) -> Result<(), ValidationError> {
    let fail = |message: &str| Err(ValidationError::new(rule.field, message));

    if value.contains('\0') {
        return fail("must not contain a NUL byte");
    }

    match rule.constraint {
        Constraint::NonEmpty if value.trim().is_empty() => fail("must not be empty"),
        Constraint::AbsolutePath => {
            let path = Path::new(value);
            if !path.is_absolute() {
                fail("must be an absolute path")
            } else if value.ends_with('/')
                || path.file_name().is_none()
                || matches!(value.rsplit('/').next(), Some(".") | Some(".."))
            {
                fail("must name a file, not a directory")
            } else {
                Ok(())
            }
        }
        Constraint::Identifier => {
            if value.is_empty() {
                fail("must not be empty")
            } else if value.starts_with('.') {
                fail("must not start with '.'")
            } else if !value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            {
                fail("may only contain letters, digits, '.', '_', and '-'")
            } else {
                Ok(())
            }
        }
        Constraint::PortRange => check_integer(rule, value.parse().unwrap_or(-1)),
        Constraint::NonEmpty => Ok(()),
    }
}

pub fn check_integer(rule: FieldRule, value: i64) -> Result<(), ValidationError> {
    match rule.constraint {
        Constraint::PortRange if !(1..=65535).contains(&value) => Err(ValidationError::new(
            rule.field,
            format!("must be between 1 and 65535, got {value}"),
        )),
        _ => Ok(()),
    }
}
