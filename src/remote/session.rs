//! Provides the interface the store uses to run commands on the host.

use crate::config::Config;
use crate::error::{ConnectFailure, ConnectionError, TransportError};
use crate::remote::command::CommandResult;
use async_trait::async_trait;
use std::io;
use std::time::Duration;

/// Opens sessions to the managed host.
#[async_trait]
pub trait ManageSession<S: RemoteShell> {
    /// Connects and authenticates using `config` and, on success, returns a session that can run
    /// commands.
    async fn connect(&mut self, config: &Config) -> Result<S, ConnectionError>;
}

/// An authenticated session on the managed host.
///
/// Implementations must accept concurrent calls to [RemoteShell::run]: the reconciliation driver
/// runs one task per artifact over a shared session. Callers bound how many calls are in flight
/// (see [StoreOptions::max_concurrent_commands]), because an SSH server refuses sessions beyond
/// its `MaxSessions` limit, 10 by default.
///
/// [StoreOptions::max_concurrent_commands]: crate::store::StoreOptions::max_concurrent_commands
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// The host this session is connected to, for messages.
    fn host(&self) -> &str;

    /// Runs `command_line` with the remote user's shell and waits for it to finish.
    ///
    /// A non-zero exit is not an error here; it is reported in [CommandResult::exit_code]. An
    /// `Err` means the command's fate is unknown.
    async fn run(&self, command_line: &str) -> Result<CommandResult, TransportError>;

    /// Returns `false` if the session can no longer run commands.
    async fn is_alive(&self) -> bool;
}

/// Runs `command_line` on `shell`, giving up after `deadline`.
///
/// On timeout the command's future is dropped, which closes its channel, and the command is
/// reported as [TransportError::TimedOut]. Whatever it did before that is unknown.
pub async fn run_with_deadline<S: RemoteShell + ?Sized>(
    shell: &S,
    command_line: &str,
    deadline: Duration,
) -> Result<CommandResult, TransportError> {
    match tokio::time::timeout(deadline, shell.run(command_line)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::TimedOut(deadline)),
    }
}

/// Classifies a failed connection attempt from the error text and, if available, the
/// underlying I/O error kind.
///
/// OpenSSH reports most failures only as text on stderr, so the text is checked first.
pub fn classify_connect_failure(message: &str, kind: Option<io::ErrorKind>) -> ConnectFailure {
    const PATTERNS: &[(&str, ConnectFailure)] = &[
        ("host key verification failed", ConnectFailure::HostKey),
        ("remote host identification has changed", ConnectFailure::HostKey),
        ("host key is known", ConnectFailure::HostKey),
        ("could not resolve hostname", ConnectFailure::Dns),
        ("name or service not known", ConnectFailure::Dns),
        ("nodename nor servname", ConnectFailure::Dns),
        ("temporary failure in name resolution", ConnectFailure::Dns),
        ("connection refused", ConnectFailure::Refused),
        ("permission denied", ConnectFailure::Auth),
        ("too many authentication failures", ConnectFailure::Auth),
        ("no more authentication methods", ConnectFailure::Auth),
        ("timed out", ConnectFailure::Timeout),
    ];

    let message = message.to_lowercase();
    if let Some((_, reason)) = PATTERNS.iter().find(|(p, _)| message.contains(p)) {
        return *reason;
    }

    match kind {
        Some(io::ErrorKind::ConnectionRefused) => ConnectFailure::Refused,
        Some(io::ErrorKind::TimedOut) => ConnectFailure::Timeout,
        Some(io::ErrorKind::PermissionDenied) => ConnectFailure::Auth,
        _ => ConnectFailure::Other,
    }
}
