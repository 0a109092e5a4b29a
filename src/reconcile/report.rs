//! Reports plans and the outcome of each change to the user.
//!
//! As with most output in `vhostctl`, the logic lives in free functions that write to generic
//! writers (e.g. [_report]), and the [Report] trait picks the writers. The production
//! [Reporter] locks stdout and stderr just before reporting and releases them right after, so
//! reports from concurrently finishing artifacts never interleave.

use crate::reconcile::{Change, Diagnostic, Plan};
use std::fmt::Display;
use std::io::{self, Write};
use std::ops::DerefMut;

/// Prints feedback about each change to keep the user informed.
pub trait Report {
    /// Reports that a change is about to commence.
    fn starting(&mut self, host: &str, change: &Change) -> io::Result<()>;

    /// Reports the outcome of a change.
    fn report(
        &mut self,
        host: &str,
        change: &Change,
        outcome: Result<(), &Diagnostic>,
    ) -> io::Result<()>;

    /// Reports a diagnostic that isn't tied to a change, e.g. a refresh warning.
    fn diagnostic(&mut self, host: &str, identity: &str, diagnostic: &Diagnostic)
        -> io::Result<()>;
}

/// The real, production-ready [Report] implementation. Uses the real stdout/stderr.
#[derive(Clone, Debug, Default)]
pub struct Reporter;

impl Report for Reporter {
    fn starting(&mut self, host: &str, change: &Change) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        _starting(&mut stdout, host, change)
    }

    fn report(
        &mut self,
        host: &str,
        change: &Change,
        outcome: Result<(), &Diagnostic>,
    ) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        let mut stderr = io::stderr().lock();
        _report(&mut stdout, &mut stderr, host, change, outcome)
    }

    fn diagnostic(
        &mut self,
        host: &str,
        identity: &str,
        diagnostic: &Diagnostic,
    ) -> io::Result<()> {
        let mut stderr = io::stderr().lock();
        _diagnostic(&mut stderr, host, identity, diagnostic)
    }
}

/// Generates a one-line identifier for a [Change], suitable for use as its title in user output.
pub fn title(change: &Change) -> String {
    match change {
        Change::Create(desired) => format!("create {} ({})", desired.identity(), desired.path()),
        Change::Update { desired, prior } if prior.destination_path != desired.path() => format!(
            "move {} ({} -> {})",
            desired.identity(),
            prior.destination_path,
            desired.path(),
        ),
        Change::Update { desired, .. } => {
            format!("update {} ({})", desired.identity(), desired.path())
        }
        Change::Delete(record) => format!("delete {} ({})", record.identity, record.destination_path),
        Change::Unchanged(record) => {
            format!("unchanged {} ({})", record.identity, record.destination_path)
        }
    }
}

fn write_indented(
    mut writer: impl Write,
    header: impl Display,
    content: impl AsRef<str>,
) -> io::Result<()> {
    //                1234
    writeln!(writer, "    {header}")?;
    for line in content.as_ref().lines() {
        //                12345678
        writeln!(writer, "        {line}")?;
    }
    Ok(())
}

/// A testable function containing the logic for reporting the outcome of a [Change].
pub fn _report<OT: Write, ET: Write, O: DerefMut<Target = OT>, E: DerefMut<Target = ET>>(
    mut stdout: O,
    mut stderr: E,
    host: &str,
    change: &Change,
    outcome: Result<(), &Diagnostic>,
) -> io::Result<()> {
    match outcome {
        Ok(()) => writeln!(&mut stdout, "[{host}] Completed {}", title(change)),
        Err(diagnostic) => {
            writeln!(&mut stderr, "[{host}] Failed    {}", title(change))?;
            write_indented(
                stderr.deref_mut(),
                format!("{}:", diagnostic.summary),
                &diagnostic.detail,
            )
        }
    }
}

/// A testable function containing the logic for reporting that a [Change] is starting.
pub fn _starting<OT: Write, O: DerefMut<Target = OT>>(
    mut stdout: O,
    host: &str,
    change: &Change,
) -> io::Result<()> {
    let change = title(change);
    writeln!(
        &mut stdout,
        // Adding one extra space lines up "Starting" with "Completed" in the final output.
        "[{host}] Starting  {change}",
        // Ex:    Completed {change}
    )
}

/// A testable function containing the logic for reporting a stand-alone [Diagnostic].
pub fn _diagnostic<ET: Write, E: DerefMut<Target = ET>>(
    mut stderr: E,
    host: &str,
    identity: &str,
    diagnostic: &Diagnostic,
) -> io::Result<()> {
    writeln!(
        &mut stderr,
        "[{host}] {} for {identity}: {}",
        diagnostic.severity, diagnostic.summary,
    )?;
    write_indented(stderr.deref_mut(), "Details:", &diagnostic.detail)
}

/// Writes a human-readable plan, one line per change.
pub fn print_plan(mut writer: impl Write, host: &str, plan: &Plan) -> io::Result<()> {
    if plan.is_empty() && plan.has_errors() {
        writeln!(
            writer,
            "[{host}] No changes planned, but some artifacts could not be refreshed:",
        )?;
    } else if plan.is_empty() {
        writeln!(writer, "[{host}] No changes. The host matches the manifest.")?;
    } else {
        writeln!(writer, "[{host}] Planned changes:")?;
    }

    for change in &plan.changes {
        let marker = match change {
            Change::Create(_) => '+',
            Change::Update { .. } => '~',
            Change::Delete(_) => '-',
            Change::Unchanged(_) => ' ',
        };
        writeln!(writer, "  {marker} {}", title(change))?;
    }

    for (identity, diagnostic) in &plan.diagnostics {
        writeln!(writer, "  ! {identity}: {diagnostic}")?;
    }
    Ok(())
}
