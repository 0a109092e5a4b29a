//! Connection and command settings, assembled once by the controller.
//!
//! The library never reads environment variables. The `vhostctl` binary resolves each setting
//! from its flag, then from the matching `VHOSTCTL_*` variable, and hands the result to
//! [Config::validate].

use crate::error::ValidationError;
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

/// How the transport treats the host's key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Only connect if the key is already in `known_hosts`.
    #[default]
    Strict,

    /// Trust and record a host's key the first time it is seen; reject changed keys afterwards.
    AcceptNew,

    /// Accept any key. This disables protection against man-in-the-middle attacks and is logged
    /// as a warning on every connect.
    InsecureAcceptAny,
}

impl HostKeyPolicy {
    pub fn is_insecure(&self) -> bool {
        *self == HostKeyPolicy::InsecureAcceptAny
    }
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HostKeyPolicy::Strict => "strict",
            HostKeyPolicy::AcceptNew => "accept-new",
            HostKeyPolicy::InsecureAcceptAny => "insecure-accept-any",
        })
    }
}

impl FromStr for HostKeyPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(HostKeyPolicy::Strict),
            "accept-new" => Ok(HostKeyPolicy::AcceptNew),
            "insecure-accept-any" => Ok(HostKeyPolicy::InsecureAcceptAny),
            _ => Err(ValidationError::new(
                "host_key_policy",
                format!("{s:?} is not one of strict, accept-new, insecure-accept-any"),
            )),
        }
    }
}

/// The credential a session authenticates with.
///
/// There is no password variant: the OpenSSH master runs in batch mode, which never answers a
/// password prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Proof<'a> {
    IdentityFile(&'a PathBuf),

    /// Whatever the SSH agent and the user's SSH configuration offer.
    Agent,
}

/// The default for [Config::max_sessions]. OpenSSH servers accept 10 sessions per connection
/// unless `MaxSessions` says otherwise.
pub const DEFAULT_MAX_SESSIONS: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub identity_file: Option<PathBuf>,
    pub host_key_policy: HostKeyPolicy,

    /// Upper bound for establishing the session.
    pub connect_timeout: Duration,

    /// Upper bound for each remote command, measured from submission to completion.
    pub command_timeout: Duration,

    /// Run remote commands through `sudo -n`, which fails instead of prompting.
    pub sudo: bool,

    /// Upper bound for remote commands in flight at once. Each one holds a session on the
    /// connection, and the server refuses sessions beyond its `MaxSessions`.
    pub max_sessions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: String::new(),
            port: 22,
            user: String::new(),
            identity_file: None,
            host_key_policy: HostKeyPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            sudo: false,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl Config {
    /// Picks a credential. An identity file wins over the agent.
    pub fn proof(&self) -> Proof<'_> {
        match &self.identity_file {
            Some(path) => Proof::IdentityFile(path),
            None => Proof::Agent,
        }
    }

    /// Checks that everything needed to open a session is present.
    ///
    /// Returns one error per missing attribute, so they can all be reported together.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.host.trim().is_empty() {
            errors.push(ValidationError::new(
                "host",
                "Missing Host: set --host or VHOSTCTL_HOST",
            ));
        }
        if self.user.trim().is_empty() {
            errors.push(ValidationError::new(
                "username",
                "Missing Username: set --user or VHOSTCTL_USER",
            ));
        }
        if self.port == 0 {
            errors.push(ValidationError::new("port", "must be between 1 and 65535"));
        }
        if self.command_timeout.is_zero() {
            errors.push(ValidationError::new("command_timeout", "must be positive"));
        }
        if self.connect_timeout.is_zero() {
            errors.push(ValidationError::new("connect_timeout", "must be positive"));
        }
        if self.max_sessions == 0 {
            errors.push(ValidationError::new("max_sessions", "must be at least 1"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
