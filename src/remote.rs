//! Talks to the managed host: opening sessions, running commands, and building the commands to
//! run.
//!
//! The store never sees a transport type. It sees a [RemoteShell], which runs one command line and
//! returns its exit code and output, and relies on [command] to produce command lines in which
//! every user-supplied value is quoted.

pub mod command;
pub mod local;
pub mod session;
#[cfg(feature = "openssh")]
pub mod ssh;

#[doc(inline)]
pub use command::CommandResult;

#[doc(inline)]
pub use session::{ManageSession, RemoteShell};

#[doc(inline)]
pub use local::{LocalConnector, LocalShell};

#[cfg(feature = "openssh")]
#[doc(inline)]
pub use ssh::{SessionManager, SshSession};

#[cfg(test)]
pub mod fixtures;
