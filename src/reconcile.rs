//! Drives artifacts from their recorded state to their declared state.
//!
//! The [Reconciler] exposes two layers. The lifecycle operations ([Reconciler::create],
//! [Reconciler::read], [Reconciler::update], [Reconciler::delete], [Reconciler::import]) turn one
//! store call into a [StateRecord] or a user-facing [Diagnostic]. [Reconciler::plan] and
//! [Reconciler::apply] run those operations for a whole manifest, one task per artifact.

pub mod report;
pub mod state;

use crate::core::schema;
use crate::core::{DesiredArtifact, ImportId, Kind, Presence};
use crate::error::{Error, ValidationError};
use crate::remote::RemoteShell;
use crate::store::RemoteArtifactStore;
use indexmap::IndexMap;
use log::{debug, error, warn};
use report::Report;
use state::{StateFile, StateRecord};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
        })
    }
}

/// A message for the user about one artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,

    /// The attribute the diagnostic is about, if it is about a single one.
    pub attribute: Option<String>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            attribute: None,
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            ..Self::error(summary, detail)
        }
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.summary)?;
        if let Some(attribute) = &self.attribute {
            write!(f, " ({attribute})")?;
        }
        write!(f, ": {}", self.detail)
    }
}

impl From<&ValidationError> for Diagnostic {
    fn from(error: &ValidationError) -> Self {
        Diagnostic::error("Invalid Attribute", error.to_string()).with_attribute(&error.field)
    }
}

impl From<&Error> for Diagnostic {
    fn from(error: &Error) -> Self {
        use Error::*;
        let detail = error.to_string();
        match error {
            Validation(e) => e.into(),
            Connection(e) => match e.reason {
                crate::error::ConnectFailure::HostKey => {
                    Diagnostic::error("Host Key Verification Failed", detail)
                }
                _ => Diagnostic::error("Connection Failed", detail),
            },
            Transport { .. } => Diagnostic::error("Remote Command Did Not Complete", detail),
            RemoteCommand { .. } => Diagnostic::error("Remote Command Failed", detail),
            UnexpectedOutput { .. } => Diagnostic::error("Unexpected Remote Output", detail),
            IdentityChanged { .. } => Diagnostic::error("Identity Cannot Change", detail),
            ImportFormat(_) => Diagnostic::error("Invalid Import ID", detail),
        }
    }
}

/// The result of refreshing one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Refreshed {
    /// [None] if the artifact no longer exists and should be dropped from state.
    pub record: Option<StateRecord>,
    pub warning: Option<Diagnostic>,
}

/// One planned step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    Create(DesiredArtifact),
    Update {
        desired: DesiredArtifact,
        prior: StateRecord,
    },
    Delete(StateRecord),
    Unchanged(StateRecord),
}

impl Change {
    pub fn identity(&self) -> &str {
        match self {
            Change::Create(desired) | Change::Update { desired, .. } => desired.identity(),
            Change::Delete(record) | Change::Unchanged(record) => &record.identity,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Change::Unchanged(_))
    }
}

/// What [Reconciler::plan] decided, and what it learned while refreshing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    /// Changes in manifest order, followed by deletions in state order.
    pub changes: Vec<Change>,

    /// Identities whose records refreshed as absent. [Reconciler::apply] drops them from state.
    pub forgotten: Vec<String>,

    /// Records whose content was refreshed from the host.
    pub refreshed: Vec<StateRecord>,

    /// Warnings, and errors for artifacts that were left out of the plan.
    pub diagnostics: Vec<(String, Diagnostic)>,
}

impl Plan {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|(_, d)| d.is_error())
    }

    /// Returns `true` if applying the plan would not touch the host.
    pub fn is_empty(&self) -> bool {
        self.changes.iter().all(Change::is_noop)
    }
}

/// Counts of what [Reconciler::apply] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub diagnostics: Vec<(String, Diagnostic)>,
}

impl ApplySummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.diagnostics.iter().any(|(_, d)| d.is_error())
    }
}

impl fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} unchanged, {} failed",
            self.created, self.updated, self.deleted, self.unchanged, self.failed,
        )
    }
}

/// Runs lifecycle operations against one host's [RemoteArtifactStore].
pub struct Reconciler<S: RemoteShell> {
    store: Arc<RemoteArtifactStore<S>>,
}

impl<S: RemoteShell> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Reconciler {
            store: self.store.clone(),
        }
    }
}

impl<S: RemoteShell + 'static> Reconciler<S> {
    pub fn new(store: RemoteArtifactStore<S>) -> Self {
        Reconciler {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &RemoteArtifactStore<S> {
        &self.store
    }

    /// Fails if the session can no longer run commands, e.g. because the connection dropped
    /// while the user was reading the plan.
    pub async fn check_connection(&self) -> Result<(), Diagnostic> {
        if self.store.shell().is_alive().await {
            return Ok(());
        }
        Err(Diagnostic::error(
            "Connection Lost",
            format!("the session to {} can no longer run commands", self.store.host()),
        ))
    }

    pub async fn create(&self, desired: &DesiredArtifact) -> Result<StateRecord, Diagnostic> {
        self.store
            .create(desired)
            .await
            .map(|observed| StateRecord::observed(desired.kind(), &observed))
            .map_err(|e| Diagnostic::from(&e))
    }

    /// Refreshes `prior` from the host.
    ///
    /// An artifact that disappeared is not an error: it is dropped from state with a "File Not
    /// Found" warning, so that the next plan creates it again.
    pub async fn read(&self, prior: &StateRecord) -> Result<Refreshed, Diagnostic> {
        let observed = self
            .store
            .read(&prior.identity, &prior.destination_path)
            .await
            .map_err(|e| Diagnostic::from(&e))?;

        if observed.presence() == Presence::Absent {
            return Ok(Refreshed {
                record: None,
                warning: Some(Diagnostic::warning(
                    "File Not Found",
                    format!(
                        "{} was not found at {}; it will be removed from state",
                        prior.identity, prior.destination_path,
                    ),
                )),
            });
        }

        Ok(Refreshed {
            record: Some(StateRecord::observed(prior.kind, &observed)),
            warning: None,
        })
    }

    pub async fn update(
        &self,
        desired: &DesiredArtifact,
        prior: &StateRecord,
    ) -> Result<StateRecord, Diagnostic> {
        self.store
            .update(desired, &prior.to_observed())
            .await
            .map(|observed| StateRecord::observed(desired.kind(), &observed))
            .map_err(|e| {
                let diagnostic = Diagnostic::from(&e);
                match e {
                    Error::IdentityChanged { .. } => diagnostic
                        .with_attribute(schema::schema_for(desired.kind()).identity_field),
                    _ => diagnostic,
                }
            })
    }

    pub async fn delete(&self, prior: &StateRecord) -> Result<(), Diagnostic> {
        self.store
            .delete(&prior.identity, &prior.destination_path)
            .await
            .map(|_| ())
            .map_err(|e| Diagnostic::from(&e))
    }

    /// Adopts an existing artifact named by an `<identity>:<path>` import ID.
    pub async fn import(&self, kind: Kind, id: &str) -> Result<StateRecord, Diagnostic> {
        let id: ImportId = id.parse().map_err(|e| Diagnostic::from(&Error::ImportFormat(e)))?;

        let schema = schema::schema_for(kind);
        schema
            .validate_identity(&id.identity)
            .and_then(|_| schema::validate_path(&id.path))
            .map_err(|e| Diagnostic::from(&e))?;

        let observed = self
            .store
            .import(&id.identity, &id.path)
            .await
            .map_err(|e| Diagnostic::from(&e))?;

        if observed.presence() == Presence::Absent {
            return Err(Diagnostic::error(
                "File Not Found",
                format!("cannot import {id}: nothing exists at {}", id.path),
            ));
        }

        Ok(StateRecord::observed(kind, &observed))
    }

    /// Refreshes every record in `state` and compares the result with `desired`.
    ///
    /// Artifacts whose refresh failed are left out of the plan, with an error diagnostic, because
    /// their remote state is unknown. Refreshes run concurrently.
    pub async fn plan(&self, desired: Vec<DesiredArtifact>, state: &StateFile) -> Plan {
        let mut plan = Plan::default();

        let mut tasks = JoinSet::new();
        for record in state.records.values().cloned() {
            let this = self.clone();
            tasks.spawn(async move {
                let result = this.read(&record).await;
                (record.identity, result)
            });
        }

        let mut refreshed: IndexMap<String, Option<StateRecord>> = IndexMap::new();
        let mut blocked = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (identity, result) = match joined {
                Ok(r) => r,
                Err(e) => {
                    error!("Refresh task failed: {e}");
                    continue;
                }
            };

            match result {
                Ok(Refreshed { record, warning }) => {
                    if let Some(w) = warning {
                        plan.diagnostics.push((identity.clone(), w));
                    }
                    match &record {
                        Some(r) => plan.refreshed.push(r.clone()),
                        None => plan.forgotten.push(identity.clone()),
                    }
                    refreshed.insert(identity, record);
                }
                Err(d) => {
                    plan.diagnostics.push((identity.clone(), d));
                    blocked.push(identity);
                }
            }
        }

        // Joins finish in any order; report in state order.
        let order = |identity: &String| state.records.get_index_of(identity);
        plan.refreshed.sort_by_key(|r| order(&r.identity));
        plan.forgotten.sort_by_key(|i| order(i));
        plan.diagnostics.sort_by_key(|(i, _)| order(i));

        for artifact in &desired {
            let identity = artifact.identity();
            if blocked.iter().any(|b| b == identity) {
                continue;
            }

            let change = match refreshed.get(identity).cloned().flatten() {
                None => Change::Create(artifact.clone()),
                Some(record)
                    if record.destination_path == artifact.path()
                        && record.rendered_content.as_deref() == Some(artifact.content()) =>
                {
                    Change::Unchanged(record)
                }
                Some(record) => Change::Update {
                    desired: artifact.clone(),
                    prior: record,
                },
            };
            plan.changes.push(change);
        }

        for (identity, record) in &refreshed {
            let declared = desired.iter().any(|d| d.identity() == identity);
            if let (false, Some(record)) = (declared, record) {
                plan.changes.push(Change::Delete(record.clone()));
            }
        }

        debug!(
            "Planned {} changes for {}",
            plan.changes.iter().filter(|c| !c.is_noop()).count(),
            self.store.host(),
        );
        plan
    }

    /// Applies `plan`, one task per artifact, recording every outcome in `state`.
    ///
    /// A failure never stops other artifacts. An artifact whose command was issued but didn't
    /// succeed is recorded with [Presence::Unknown] so that the next plan reads it again. State is
    /// saved after each artifact finishes. If a save fails, the summary carries a "State Not
    /// Saved" error, since the host then holds artifacts the state file doesn't know about.
    pub async fn apply<R: Report>(
        &self,
        plan: Plan,
        state: &mut StateFile,
        reporter: &mut R,
    ) -> ApplySummary {
        let host = self.store.host().to_string();
        let mut summary = ApplySummary {
            diagnostics: plan.diagnostics.clone(),
            ..Default::default()
        };

        for (identity, diagnostic) in &plan.diagnostics {
            report_io(reporter.diagnostic(&host, identity, diagnostic));
        }
        for identity in &plan.forgotten {
            state.remove(identity);
        }
        for record in plan.refreshed {
            state.upsert(record);
        }
        let mut save_error = save(state);

        let mut tasks = JoinSet::new();
        for change in plan.changes {
            if let Change::Unchanged(_) = change {
                summary.unchanged += 1;
                continue;
            }

            report_io(reporter.starting(&host, &change));
            let this = self.clone();
            tasks.spawn(async move {
                let result = this.apply_one(&change).await;
                (change, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (change, result) = match joined {
                Ok(r) => r,
                Err(e) => {
                    error!("Apply task failed: {e}");
                    summary.failed += 1;
                    continue;
                }
            };

            match &result {
                Ok(record) => {
                    match (&change, record) {
                        (Change::Create(_), Some(r)) => {
                            summary.created += 1;
                            state.upsert(r.clone());
                        }
                        (Change::Update { .. }, Some(r)) => {
                            summary.updated += 1;
                            state.upsert(r.clone());
                        }
                        _ => {
                            summary.deleted += 1;
                            state.remove(change.identity());
                        }
                    }
                }
                Err((diagnostic, presence)) => {
                    summary.failed += 1;
                    if *presence == Some(Presence::Unknown) {
                        state.upsert(unknown_record(&change));
                    }
                    summary
                        .diagnostics
                        .push((change.identity().to_string(), diagnostic.clone()));
                }
            }

            let outcome = result.as_ref().map(|_| ()).map_err(|(d, _)| d);
            report_io(reporter.report(&host, &change, outcome));
            save_error = save_error.or(save(state));
        }

        if let Some(diagnostic) = save_error {
            let key = state
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "state".to_string());
            report_io(reporter.diagnostic(&host, &key, &diagnostic));
            summary.diagnostics.push((key, diagnostic));
        }

        summary
    }

    /// Refreshes every record in `state` from the host without changing anything there.
    pub async fn refresh<R: Report>(&self, state: &mut StateFile, reporter: &mut R) -> ApplySummary {
        let mut plan = self.plan(Vec::new(), state).await;
        plan.changes.clear();
        self.apply(plan, state, reporter).await
    }

    /// Applies one change. On failure, also returns the presence the failure left behind.
    async fn apply_one(
        &self,
        change: &Change,
    ) -> Result<Option<StateRecord>, (Diagnostic, Option<Presence>)> {
        let fail = |e: Error| (Diagnostic::from(&e), e.presence());

        match change {
            Change::Create(desired) => self
                .store
                .create(desired)
                .await
                .map(|o| Some(StateRecord::observed(desired.kind(), &o)))
                .map_err(fail),
            Change::Update { desired, prior } => self
                .store
                .update(desired, &prior.to_observed())
                .await
                .map(|o| Some(StateRecord::observed(desired.kind(), &o)))
                .map_err(fail),
            Change::Delete(record) => self
                .store
                .delete(&record.identity, &record.destination_path)
                .await
                .map(|_| None)
                .map_err(fail),
            Change::Unchanged(record) => Ok(Some(record.clone())),
        }
    }
}

/// The record for an artifact whose change failed midway. A failed update keeps the prior path,
/// so the next refresh finds the file whether or not the move happened.
fn unknown_record(change: &Change) -> StateRecord {
    match change {
        Change::Create(desired) => {
            StateRecord::unknown(desired.identity(), desired.kind(), desired.path())
        }
        Change::Update { desired, prior } => {
            StateRecord::unknown(&prior.identity, desired.kind(), &prior.destination_path)
        }
        Change::Delete(record) | Change::Unchanged(record) => {
            StateRecord::unknown(&record.identity, record.kind, &record.destination_path)
        }
    }
}

/// Saves `state`, returning the first failure as a diagnostic.
fn save(state: &mut StateFile) -> Option<Diagnostic> {
    state.save().err().map(|e| {
        error!("{e:#}");
        Diagnostic::error("State Not Saved", format!("{e:#}"))
    })
}

fn report_io(result: std::io::Result<()>) {
    if let Err(e) = result {
        warn!("Failed to write report: {e}");
    }
}
