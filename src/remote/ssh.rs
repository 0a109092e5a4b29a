//! The production transport: OpenSSH with a multiplexed master connection.
//!
//! One master connection is authenticated per [SshSession]. Each command opens its own channel
//! on it, so commands from concurrent tasks never share a stream.

use crate::config::{Config, HostKeyPolicy, Proof};
use crate::error::{ConnectionError, TransportError};
use crate::remote::command::CommandResult;
use crate::remote::session::{classify_connect_failure, ManageSession, RemoteShell};
use async_trait::async_trait;
use log::{debug, warn};
use openssh::{KnownHosts, Session, SessionBuilder};
use std::error::Error as _;

/// Production implementation of [ManageSession].
#[derive(Clone, Debug, Default)]
pub struct SessionManager;

#[async_trait]
impl ManageSession<SshSession> for SessionManager {
    async fn connect(&mut self, config: &Config) -> Result<SshSession, ConnectionError> {
        let mut builder = SessionBuilder::default();
        builder
            .user(config.user.clone())
            .port(config.port)
            .connect_timeout(config.connect_timeout)
            .known_hosts_check(known_hosts(config.host_key_policy));

        match config.proof() {
            Proof::IdentityFile(path) => {
                builder.keyfile(path);
            }
            Proof::Agent => (),
        }

        if config.host_key_policy.is_insecure() {
            warn!(
                "Host key checking is disabled for {}; the connection is open to \
                man-in-the-middle attacks",
                config.host,
            );
        }

        debug!(
            "Connecting to {}@{}:{} ({} host key policy)",
            config.user, config.host, config.port, config.host_key_policy,
        );

        let session = builder
            .connect_mux(&config.host)
            .await
            .map_err(|e| connection_error(&config.host, &e))?;

        debug!("Connected to {}", config.host);
        Ok(SshSession {
            session,
            host: config.host.clone(),
        })
    }
}

/// Production implementation of [RemoteShell].
#[derive(Debug)]
pub struct SshSession {
    session: Session,
    host: String,
}

#[async_trait]
impl RemoteShell for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command_line: &str) -> Result<CommandResult, TransportError> {
        // The command line is already quoted for a POSIX shell, so it must not be escaped again.
        let output = self
            .session
            .raw_command(command_line)
            .output()
            .await
            .map_err(|e| transport_error(&e))?;
        Ok(output.into())
    }

    async fn is_alive(&self) -> bool {
        self.session.check().await.is_ok()
    }
}

impl SshSession {
    /// Terminates the master connection.
    pub async fn close(self) -> anyhow::Result<()> {
        debug!("Closing session to {}", self.host);
        Ok(self.session.close().await?)
    }
}

fn known_hosts(policy: HostKeyPolicy) -> KnownHosts {
    match policy {
        HostKeyPolicy::Strict => KnownHosts::Strict,
        HostKeyPolicy::AcceptNew => KnownHosts::Add,
        HostKeyPolicy::InsecureAcceptAny => KnownHosts::Accept,
    }
}

/// Flattens `error` and its sources into one line. OpenSSH's own diagnostics are usually in a
/// source, not in the top-level message.
fn describe(error: &openssh::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(e) = source {
        message.push_str(": ");
        message.push_str(&e.to_string());
        source = e.source();
    }
    message
}

fn connection_error(host: &str, error: &openssh::Error) -> ConnectionError {
    let kind = match error {
        openssh::Error::Connect(e) | openssh::Error::Master(e) => Some(e.kind()),
        _ => None,
    };
    let message = describe(error);

    ConnectionError {
        host: host.to_string(),
        reason: classify_connect_failure(&message, kind),
        message,
    }
}

fn transport_error(error: &openssh::Error) -> TransportError {
    match error {
        openssh::Error::Disconnected | openssh::Error::RemoteProcessTerminated => {
            TransportError::Disconnected(describe(error))
        }
        _ => TransportError::Io(describe(error)),
    }
}
