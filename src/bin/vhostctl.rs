use anyhow::{bail, Context as _};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use log::{debug, warn};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use vhostctl::config::{Config, HostKeyPolicy, DEFAULT_MAX_SESSIONS};
use vhostctl::core::{DesiredArtifact, Kind, Manifest};
use vhostctl::reconcile::report::{print_plan, Report, Reporter};
use vhostctl::reconcile::state::StateFile;
use vhostctl::reconcile::{Diagnostic, Reconciler};
use vhostctl::remote::{LocalConnector, ManageSession, RemoteShell, SessionManager};
use vhostctl::store::{RemoteArtifactStore, StoreOptions};

#[derive(Parser)]
#[command(name = "vhostctl")]
#[command(version)]
#[command(about = "Converge web-server virtual-host files on a remote host over SSH", long_about = None)]
struct Cli {
    /// Verbosity level
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Where to keep the record of managed artifacts
    #[arg(long, env = "VHOSTCTL_STATE", default_value = "vhostctl.state.yaml")]
    state: PathBuf,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ConnectionArgs {
    /// How to reach the host
    #[arg(long, env = "VHOSTCTL_TRANSPORT", value_enum, default_value_t = Transport::Ssh)]
    transport: Transport,

    /// The host to manage
    #[arg(long, env = "VHOSTCTL_HOST")]
    host: Option<String>,

    #[arg(long, env = "VHOSTCTL_PORT", default_value_t = 22)]
    port: u16,

    /// The remote user
    #[arg(long, env = "VHOSTCTL_USER")]
    user: Option<String>,

    /// Private key to authenticate with; the SSH agent is used without one
    #[arg(long, env = "VHOSTCTL_IDENTITY_FILE")]
    identity_file: Option<PathBuf>,

    /// strict, accept-new, or insecure-accept-any
    #[arg(long, env = "VHOSTCTL_HOST_KEY_POLICY", default_value = "strict")]
    host_key_policy: HostKeyPolicy,

    #[arg(long, env = "VHOSTCTL_CONNECT_TIMEOUT", value_name = "SECONDS", default_value_t = 10)]
    connect_timeout: u64,

    /// Upper bound for each remote command
    #[arg(long, env = "VHOSTCTL_COMMAND_TIMEOUT", value_name = "SECONDS", default_value_t = 30)]
    command_timeout: u64,

    /// Remote commands allowed to run at once over the shared connection
    #[arg(long, env = "VHOSTCTL_MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS)]
    max_sessions: usize,

    /// Run remote commands through `sudo -n`
    #[arg(long, env = "VHOSTCTL_SUDO")]
    sudo: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// OpenSSH with a multiplexed master connection
    Ssh,
    /// Run commands on this machine
    Local,
}

#[derive(Subcommand)]
enum Command {
    /// Print the rendered content of every artifact in a manifest
    Render { manifest: PathBuf },

    /// Show what `apply` would change
    Plan { manifest: PathBuf },

    /// Make the host match a manifest
    Apply { manifest: PathBuf },

    /// Update the state file from the host
    Refresh,

    /// Adopt an existing file, named as <identity>:<path>
    Import {
        id: String,

        #[arg(long, default_value = "site")]
        kind: Kind,
    },

    /// Delete every managed artifact
    Destroy,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` if any artifact failed.
async fn run(cli: Cli) -> anyhow::Result<bool> {
    // Validate the manifest before connecting, so that bad input never costs a round trip.
    let desired = match &cli.command {
        Command::Render { manifest } => return render(manifest),
        Command::Plan { manifest } | Command::Apply { manifest } => {
            match load_desired(manifest)? {
                Some(desired) => desired,
                None => return Ok(false),
            }
        }
        _ => Vec::new(),
    };

    let config = cli.connection.to_config();

    match cli.connection.transport {
        Transport::Ssh => {
            if let Err(errors) = config.validate() {
                for e in errors {
                    eprintln!("Error: {}", e.message);
                }
                return Ok(false);
            }

            let shell = Arc::new(SessionManager.connect(&config).await?);
            let result = execute(&cli.command, desired, &cli.state, &config, shell.clone()).await;

            match Arc::try_unwrap(shell) {
                Ok(session) => {
                    if let Err(e) = session.close().await {
                        warn!("Failed to close session: {e:#}");
                    }
                }
                Err(_) => debug!("Session still shared at exit; dropping it"),
            }
            result
        }
        Transport::Local => {
            let shell = Arc::new(LocalConnector.connect(&config).await?);
            execute(&cli.command, desired, &cli.state, &config, shell).await
        }
    }
}

impl ConnectionArgs {
    fn to_config(&self) -> Config {
        Config {
            host: self.host.clone().unwrap_or_default(),
            port: self.port,
            user: self.user.clone().unwrap_or_default(),
            identity_file: self.identity_file.clone(),
            host_key_policy: self.host_key_policy,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            command_timeout: Duration::from_secs(self.command_timeout),
            sudo: self.sudo,
            max_sessions: self.max_sessions,
        }
    }
}

async fn execute<S: RemoteShell + 'static>(
    command: &Command,
    desired: Vec<DesiredArtifact>,
    state_path: &Path,
    config: &Config,
    shell: Arc<S>,
) -> anyhow::Result<bool> {
    let reconciler = Reconciler::new(RemoteArtifactStore::new(shell, StoreOptions::from(config)));
    let host = reconciler.store().host().to_string();
    let mut state = StateFile::load(state_path)?;
    let mut reporter = Reporter;

    match command {
        Command::Plan { .. } => {
            let plan = reconciler.plan(desired, &state).await;
            print_plan(io::stdout().lock(), &host, &plan)?;
            Ok(!plan.has_errors())
        }
        Command::Apply { .. } | Command::Destroy => {
            let plan = reconciler.plan(desired, &state).await;
            print_plan(io::stdout().lock(), &host, &plan)?;
            if !plan.is_empty() {
                if let Err(diagnostic) = reconciler.check_connection().await {
                    reporter.diagnostic(&host, &host, &diagnostic)?;
                    return Ok(false);
                }
            }
            let summary = reconciler.apply(plan, &mut state, &mut reporter).await;
            println!("Apply complete: {summary}.");
            Ok(summary.is_success())
        }
        Command::Refresh => {
            let summary = reconciler.refresh(&mut state, &mut reporter).await;
            println!("Refreshed {} artifacts.", state.records.len());
            Ok(summary.is_success())
        }
        Command::Import { id, kind } => {
            let record = match reconciler.import(*kind, id).await {
                Ok(record) => record,
                Err(diagnostic) => {
                    reporter.diagnostic(&host, id, &diagnostic)?;
                    return Ok(false);
                }
            };

            if state.get(&record.identity).is_some() {
                bail!("{} is already managed in {}", record.identity, state_path.display());
            }

            println!(
                "[{host}] Imported {} ({})",
                record.identity, record.destination_path,
            );
            state.upsert(record);
            state.save()?;
            Ok(true)
        }
        Command::Render { manifest } => render(manifest),
    }
}

/// Loads and validates a manifest. Prints every validation error and returns [None] if there
/// were any.
fn load_desired(path: &Path) -> anyhow::Result<Option<Vec<DesiredArtifact>>> {
    let manifest = Manifest::load(path)?;
    match manifest.desired_artifacts() {
        Ok(desired) => Ok(Some(desired)),
        Err(errors) => {
            for e in &errors {
                eprintln!("{}", Diagnostic::from(e));
            }
            Ok(None)
        }
    }
}

fn render(path: &Path) -> anyhow::Result<bool> {
    let Some(desired) = load_desired(path)? else {
        return Ok(false);
    };

    let mut stdout = io::stdout().lock();
    for artifact in desired {
        writeln!(stdout, "# {} -> {}", artifact.identity(), artifact.path())
            .and_then(|_| write!(stdout, "{}", artifact.content()))
            .context("Failed to write to stdout")?;
    }
    Ok(true)
}
