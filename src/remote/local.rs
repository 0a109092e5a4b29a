//! Runs commands on the controller itself.
//!
//! Useful for managing the local machine and for exercising the store end to end without an SSH
//! server.

use crate::config::Config;
use crate::error::{ConnectionError, TransportError};
use crate::remote::command::CommandResult;
use crate::remote::session::{ManageSession, RemoteShell};
use async_trait::async_trait;
use log::debug;
use std::process::Stdio;
use tokio::process::Command;

/// Implementation of [ManageSession] that "connects" to the local machine. Never fails.
#[derive(Clone, Debug, Default)]
pub struct LocalConnector;

#[async_trait]
impl ManageSession<LocalShell> for LocalConnector {
    async fn connect(&mut self, _: &Config) -> Result<LocalShell, ConnectionError> {
        Ok(LocalShell::new())
    }
}

/// Implementation of [RemoteShell] that runs each command line with `sh -c`.
#[derive(Clone, Debug)]
pub struct LocalShell {
    host: String,
}

impl LocalShell {
    pub fn new() -> Self {
        LocalShell {
            host: "localhost".to_string(),
        }
    }
}

impl Default for LocalShell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteShell for LocalShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command_line: &str) -> Result<CommandResult, TransportError> {
        debug!("Spawning local shell");

        // kill_on_drop reaps the child if the caller's deadline drops this future.
        let output = Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TransportError::Io(format!("failed to spawn sh: {e}")))?;

        Ok(output.into())
    }

    async fn is_alive(&self) -> bool {
        true
    }
}
