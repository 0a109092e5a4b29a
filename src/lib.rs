//! Converge web-server virtual-host files on a remote host.
//!
//! # Artifacts
//!
//! An artifact is one configuration file on the managed host, e.g. an nginx `server` block under
//! `/etc/nginx/sites-available`. You declare artifacts in a manifest file; `vhostctl` renders
//! their content, compares it with what it last observed on the host, and writes, reads, or
//! deletes files until the host matches the manifest.
//!
//! # Program flow
//!
//! This section is meant for developers working on `vhostctl` itself.
//!
//! 1. The controller (usually the `vhostctl` binary) assembles one [Config] at start-up from
//!    command-line flags and their environment fallbacks. Nothing below this point reads the
//!    environment.
//!
//! 2. A [ManageSession] implementation opens one authenticated connection to the host. The
//!    reference implementation multiplexes OpenSSH; every command gets its own channel.
//!
//! 3. [DesiredArtifact]s are built from the manifest. Building one validates and renders it, so
//!    bad input is rejected before any remote call is made.
//!
//! 4. The [Reconciler] refreshes the previously persisted state through the
//!    [RemoteArtifactStore], plans the changes, and applies them concurrently, one task per
//!    artifact. Failures are reported per artifact and never abort siblings.
//!
//! [Config]: config::Config
//! [ManageSession]: remote::ManageSession
//! [DesiredArtifact]: core::DesiredArtifact
//! [Reconciler]: reconcile::Reconciler
//! [RemoteArtifactStore]: store::RemoteArtifactStore

pub mod config;
pub mod core;
pub mod error;
pub mod reconcile;
pub mod remote;
pub mod store;

#[doc(inline)]
pub use error::{Error, Result};
