//! A scriptable [RemoteShell] for tests.

use super::*;
use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// What [TestShell] does when it receives a matching command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Exit {
        code: Option<i32>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    Fail(TransportError),

    /// Never finishes, so the caller's deadline expires.
    Hang,
}

impl Response {
    pub fn ok() -> Self {
        Response::stdout("")
    }

    pub fn stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Response::Exit {
            code: Some(0),
            stdout: stdout.into(),
            stderr: vec![],
        }
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        Response::Exit {
            code: Some(code),
            stdout: vec![],
            stderr: stderr.into(),
        }
    }

    /// The output of the read script for a file holding `content`.
    pub fn present(content: &str) -> Self {
        Response::stdout(format!("present\n{content}"))
    }

    pub fn absent() -> Self {
        Response::stdout("absent\n")
    }
}

// Command line fragments that identify each store operation.
pub const READ: &str = "cat --";
pub const WRITE: &str = "mktemp";
pub const REMOVE: &str = "rm -f --";

/// A [RemoteShell] that records every command line it receives and answers from a list of rules.
///
/// A rule matches if the command line contains all of its fragments. The first matching rule
/// wins; if none match, the command succeeds with no output.
#[derive(Debug, Default)]
pub struct TestShell {
    records: Mutex<Vec<String>>,
    rules: Mutex<Vec<(Vec<String>, Response)>>,
    dead: Mutex<bool>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl TestShell {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// Adds a rule.
    pub fn on(&self, fragments: &[&str], response: Response) {
        let fragments = fragments.iter().map(|f| f.to_string()).collect();
        self.rules.lock().unwrap().push((fragments, response));
    }

    /// Makes every later command fail as if the connection dropped.
    pub fn disconnect(&self) {
        *self.dead.lock().unwrap() = true;
    }

    /// Makes every later command take `latency` before it answers.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// The most commands that were ever running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> MutexGuard<'_, Vec<String>> {
        self.records.lock().unwrap()
    }

    /// The number of recorded command lines containing `fragment`.
    pub fn count(&self, fragment: &str) -> usize {
        self.records().iter().filter(|r| r.contains(fragment)).count()
    }

    fn respond(&self, command_line: &str) -> Response {
        self.records.lock().unwrap().push(command_line.to_string());

        if *self.dead.lock().unwrap() {
            return Response::Fail(TransportError::Disconnected("test".into()));
        }

        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|(fragments, _)| fragments.iter().all(|f| command_line.contains(f.as_str())))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(Response::ok)
    }
}

#[async_trait]
impl RemoteShell for TestShell {
    fn host(&self) -> &str {
        "test-host"
    }

    async fn run(&self, command_line: &str) -> Result<CommandResult, TransportError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let result = self.answer(command_line).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn is_alive(&self) -> bool {
        !*self.dead.lock().unwrap()
    }
}

impl TestShell {
    async fn answer(&self, command_line: &str) -> Result<CommandResult, TransportError> {
        match self.respond(command_line) {
            Response::Exit {
                code,
                stdout,
                stderr,
            } => Ok(CommandResult {
                exit_code: code,
                stdout,
                stderr,
            }),
            Response::Fail(e) => Err(e),
            Response::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(CommandResult::default())
            }
        }
    }
}
