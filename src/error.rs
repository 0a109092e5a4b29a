//! Error taxonomy shared by the store, the transports, and the reconciliation driver.
//!
//! The variants of [Error] map one-to-one onto the failure classes a user has to tell apart:
//! bad input (nothing was sent anywhere), no connection (nothing changed remotely), a command that
//! never completed (remote state is unknown), and a command that ran and failed.

use crate::core::artifact::Presence;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The lifecycle operation during which an error occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Import,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Operation::*;
        let name = match self {
            Create => "create",
            Read => "read",
            Update => "update",
            Delete => "delete",
            Import => "import",
        };
        f.write_str(name)
    }
}

/// Identifies the operation, artifact, and remote path an error belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Context {
    pub operation: Operation,
    pub identity: String,
    pub path: String,
}

impl Context {
    pub fn new(operation: Operation, identity: impl Into<String>, path: impl Into<String>) -> Self {
        Context {
            operation,
            identity: identity.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.operation, self.identity, self.path)
    }
}

/// A declared value was rejected locally. No remote call was made.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    /// The attribute at fault, named as the user spelled it (e.g. `listen_port`).
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Why a connection attempt failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectFailure {
    Dns,
    Refused,
    Auth,
    Timeout,
    HostKey,

    /// Anything the transport could not classify, e.g. a missing `ssh` binary.
    Other,
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ConnectFailure::*;
        let name = match self {
            Dns => "dns",
            Refused => "refused",
            Auth => "auth",
            Timeout => "timeout",
            HostKey => "hostkey",
            Other => "other",
        };
        f.write_str(name)
    }
}

/// Session acquisition failed. Fatal for the reconciliation cycle; never retried internally.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("could not connect to {host} ({reason}): {message}")]
pub struct ConnectionError {
    pub host: String,
    pub reason: ConnectFailure,
    pub message: String,
}

/// A remote command could not be completed, so its effect on the host is unknown.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("remote command did not finish within {}", humanize(.0))]
    TimedOut(Duration),

    #[error("connection lost: {0}")]
    Disconnected(String),

    #[error("could not run remote command: {0}")]
    Io(String),
}

/// A composite import identifier did not have the form `<identity>:<path>`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid import ID {id:?}: {message}")]
pub struct ImportFormatError {
    pub id: String,
    pub message: String,
}

/// Everything that can go wrong while converging one artifact.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("{context}: {source}")]
    Transport {
        context: Context,
        #[source]
        source: TransportError,
    },

    #[error("{context}: remote command {}: {}", exit_status(.exit_code), first_line(.stderr))]
    RemoteCommand {
        context: Context,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The command succeeded but printed something the store does not understand.
    #[error("{context}: unexpected output from remote command: {message}")]
    UnexpectedOutput { context: Context, message: String },

    #[error("identity cannot change on update (state has {observed:?}, configuration has {desired:?})")]
    IdentityChanged { observed: String, desired: String },

    #[error(transparent)]
    ImportFormat(#[from] ImportFormatError),
}

impl Error {
    /// The state this error leaves the artifact in, or [None] if no remote command was issued.
    ///
    /// A remote command that was issued but did not succeed may have partially applied, so the
    /// artifact is [Presence::Unknown]. It is never reported as absent.
    pub fn presence(&self) -> Option<Presence> {
        use Error::*;
        match self {
            Transport { .. } | RemoteCommand { .. } | UnexpectedOutput { .. } => {
                Some(Presence::Unknown)
            }
            Validation(_) | Connection(_) | IdentityChanged { .. } | ImportFormat(_) => None,
        }
    }

    /// The operation context, for errors raised while talking to the host.
    pub fn context(&self) -> Option<&Context> {
        use Error::*;
        match self {
            Transport { context, .. }
            | RemoteCommand { context, .. }
            | UnexpectedOutput { context, .. } => Some(context),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(i) => format!("exited with code {i}"),
        None => "was terminated by a signal".to_string(),
    }
}

fn first_line(stderr: &str) -> &str {
    stderr.trim().lines().next().unwrap_or("no error output")
}

fn humanize(duration: &Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}
