//! Create, read, update, and delete artifacts on the host.

use crate::config::Config;
use crate::core::{DesiredArtifact, ObservedArtifact, Presence};
use crate::error::{Context, Error, Operation, Result, TransportError};
use crate::remote::command::{self, CommandResult, ReadOutcome, Script};
use crate::remote::session::{run_with_deadline, RemoteShell};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// How the store runs its commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreOptions {
    pub command_timeout: Duration,
    pub sudo: bool,

    /// Commands beyond this many wait for a running one to finish. The wait doesn't count
    /// against [Self::command_timeout].
    pub max_concurrent_commands: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for StoreOptions {
    fn from(config: &Config) -> Self {
        StoreOptions {
            command_timeout: config.command_timeout,
            sudo: config.sudo,
            max_concurrent_commands: config.max_sessions,
        }
    }
}

/// Manages artifact files on one host through a [RemoteShell].
///
/// Each operation is exactly one remote command, bounded by [StoreOptions::command_timeout]. The
/// store can be shared between tasks; concurrent operations on different identities don't
/// interfere. At most [StoreOptions::max_concurrent_commands] commands run at once.
///
/// Besides returning observations, the store keeps its own belief about each identity it has
/// touched (see [Self::belief]). A command that was issued but didn't succeed leaves the belief
/// at [Presence::Unknown]. It is never silently treated as absent.
#[derive(Debug)]
pub struct RemoteArtifactStore<S: RemoteShell> {
    shell: Arc<S>,
    options: StoreOptions,
    slots: Semaphore,
    beliefs: Mutex<HashMap<String, Presence>>,
}

impl<S: RemoteShell> RemoteArtifactStore<S> {
    pub fn new(shell: Arc<S>, options: StoreOptions) -> Self {
        RemoteArtifactStore {
            shell,
            slots: Semaphore::new(options.max_concurrent_commands.max(1)),
            options,
            beliefs: Mutex::new(HashMap::new()),
        }
    }

    pub fn shell(&self) -> &Arc<S> {
        &self.shell
    }

    pub fn host(&self) -> &str {
        self.shell.host()
    }

    /// What the store last learned about `identity`. [Presence::Unknown] if it was never touched.
    pub fn belief(&self, identity: &str) -> Presence {
        self.beliefs_lock()
            .get(identity)
            .copied()
            .unwrap_or(Presence::Unknown)
    }

    /// Writes a new artifact. Overwrites whatever is at the path.
    pub async fn create(&self, desired: &DesiredArtifact) -> Result<ObservedArtifact> {
        let context = Context::new(Operation::Create, desired.identity(), desired.path());
        let script = command::write_file(desired.path(), desired.content(), None)?;

        self.execute(&context, script).await?;
        self.believe(desired.identity(), Presence::Present);
        info!("Created {} at {}:{}", desired.identity(), self.host(), desired.path());

        Ok(ObservedArtifact {
            identity: desired.identity().to_string(),
            path: desired.path().to_string(),
            content: Some(desired.content().to_string()),
            outcome: Operation::Create,
        })
    }

    /// Observes the artifact at `path`. A missing file is a successful read with no content.
    pub async fn read(&self, identity: &str, path: &str) -> Result<ObservedArtifact> {
        self.observe(Operation::Read, identity, path).await
    }

    /// Replaces `observed` with `desired`.
    ///
    /// The content is always written, even if it already matches; deciding whether an update
    /// is needed is the caller's job. If the path changed, the old file is removed by the same
    /// command. The identity can't change.
    pub async fn update(
        &self,
        desired: &DesiredArtifact,
        observed: &ObservedArtifact,
    ) -> Result<ObservedArtifact> {
        if observed.identity != desired.identity() {
            return Err(Error::IdentityChanged {
                observed: observed.identity.clone(),
                desired: desired.identity().to_string(),
            });
        }

        let context = Context::new(Operation::Update, desired.identity(), desired.path());
        let script =
            command::write_file(desired.path(), desired.content(), Some(&observed.path))?;

        self.execute(&context, script).await?;
        self.believe(desired.identity(), Presence::Present);
        if observed.path != desired.path() {
            info!(
                "Moved {} on {} from {} to {}",
                desired.identity(),
                self.host(),
                observed.path,
                desired.path(),
            );
        } else {
            info!("Updated {} at {}:{}", desired.identity(), self.host(), desired.path());
        }

        Ok(ObservedArtifact {
            identity: desired.identity().to_string(),
            path: desired.path().to_string(),
            content: Some(desired.content().to_string()),
            outcome: Operation::Update,
        })
    }

    /// Removes the artifact at `path`. Removing an artifact that doesn't exist succeeds.
    pub async fn delete(&self, identity: &str, path: &str) -> Result<ObservedArtifact> {
        let context = Context::new(Operation::Delete, identity, path);
        let script = command::remove_file(path)?;

        self.execute(&context, script).await?;
        self.believe(identity, Presence::Absent);
        info!("Deleted {identity} at {}:{path}", self.host());

        Ok(ObservedArtifact {
            identity: identity.to_string(),
            path: path.to_string(),
            content: None,
            outcome: Operation::Delete,
        })
    }

    /// Reads an artifact that exists outside of any state, named by an import ID.
    pub async fn import(&self, identity: &str, path: &str) -> Result<ObservedArtifact> {
        self.observe(Operation::Import, identity, path).await
    }

    async fn observe(
        &self,
        operation: Operation,
        identity: &str,
        path: &str,
    ) -> Result<ObservedArtifact> {
        let context = Context::new(operation, identity, path);
        let script = command::read_file(path)?;
        let result = self.execute(&context, script).await?;

        let content = match command::parse_read(&result.stdout) {
            Ok(ReadOutcome::Present(content)) => Some(content),
            Ok(ReadOutcome::Absent) => None,
            Err(message) => {
                self.believe(identity, Presence::Unknown);
                return Err(Error::UnexpectedOutput { context, message });
            }
        };

        let observed = ObservedArtifact {
            identity: identity.to_string(),
            path: path.to_string(),
            content,
            outcome: operation,
        };
        self.believe(identity, observed.presence());
        debug!("{context}: {}", observed.presence());
        Ok(observed)
    }

    /// Runs `script` and returns its result if it exited successfully.
    ///
    /// On any failure after the command was issued, the belief about the artifact becomes
    /// [Presence::Unknown].
    async fn execute(&self, context: &Context, script: Script) -> Result<CommandResult> {
        let command_line = script.command_line(self.options.sudo)?;

        let Ok(_slot) = self.slots.acquire().await else {
            return Err(Error::Transport {
                context: context.clone(),
                source: TransportError::Disconnected("the store is shutting down".to_string()),
            });
        };

        // Command lines embed file content, so they are never logged.
        debug!("{context}: running remote command on {}", self.host());
        let result =
            run_with_deadline(&*self.shell, &command_line, self.options.command_timeout).await;

        let result = match result {
            Ok(r) => r,
            Err(source) => {
                self.believe(&context.identity, Presence::Unknown);
                warn!("{context}: {source}");
                return Err(Error::Transport {
                    context: context.clone(),
                    source,
                });
            }
        };

        if !result.success() {
            self.believe(&context.identity, Presence::Unknown);
            return Err(Error::RemoteCommand {
                context: context.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr_lossy(),
            });
        }

        Ok(result)
    }

    fn believe(&self, identity: &str, presence: Presence) {
        self.beliefs_lock().insert(identity.to_string(), presence);
    }

    fn beliefs_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Presence>> {
        // A single insert can't leave the map inconsistent, so poisoning is ignored.
        self.beliefs.lock().unwrap_or_else(|e| e.into_inner())
    }
}
