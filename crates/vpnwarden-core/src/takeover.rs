//! Detection and takeover of daemon instances that are already running.
//!
//! Before launching a daemon we look for one left behind by an earlier run.
//! A process is a candidate when its argv carries the launch marker. It is
//! ours to stop only when it was started with `--management` and some
//! argument also carries both the brand and the provider-path markers.
//! Anything else is left alone.
//!
//! The fingerprint is a substring heuristic. A foreign process whose argv
//! happens to contain every marker would be taken for ours.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::{ProcessRefreshKind, RefreshKind, System, UpdateKind};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use vpnwarden_config::TakeoverConfig;

use crate::channel::ChannelError;
use crate::endpoint::ControlEndpoint;
use crate::protocol::{Command, Signal};
use crate::supervisor::Connector;

/// Flag introducing the management `(host, port)` pair on a daemon command line.
pub const MANAGEMENT_FLAG: &str = "--management";

const RESCAN_INTERVAL: Duration = Duration::from_millis(100);

/// A running process and its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredProcess {
    pub pid: u32,
    pub cmdline: Vec<String>,
}

/// Read-only view of the OS process table.
///
/// Implementations skip processes they are not allowed to inspect.
pub trait ProcessTable: Send + Sync {
    fn processes(&self) -> Vec<DiscoveredProcess>;
}

impl<F> ProcessTable for F
where
    F: Fn() -> Vec<DiscoveredProcess> + Send + Sync,
{
    fn processes(&self) -> Vec<DiscoveredProcess> {
        self()
    }
}

/// The live process table, read through `sysinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn processes(&self) -> Vec<DiscoveredProcess> {
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_processes(ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always)),
        );
        system
            .processes()
            .values()
            .filter_map(|process| {
                let pid = process.pid().as_u32();
                let cmdline: Vec<String> = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect();
                if cmdline.is_empty() {
                    // Kernel threads, and processes we may not inspect.
                    trace!(pid, "Skipping process without readable command line");
                    return None;
                }
                Some(DiscoveredProcess { pid, cmdline })
            })
            .collect()
    }
}

/// How a candidate process relates to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// Ours, with the management endpoint it listens on.
    Owned(ControlEndpoint),
    /// Ours, but its management arguments do not describe an endpoint.
    OwnedUnreachable(String),
    /// Not launched by us.
    Foreign,
}

/// Command-line markers identifying our own daemon launches.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub launch_marker: String,
    pub brand_marker: String,
    pub provider_marker: String,
}

impl From<&TakeoverConfig> for Fingerprint {
    fn from(config: &TakeoverConfig) -> Self {
        Self {
            launch_marker: config.launch_marker.clone(),
            brand_marker: config.brand_marker.clone(),
            provider_marker: config.provider_marker.clone(),
        }
    }
}

impl Fingerprint {
    pub fn is_candidate(&self, process: &DiscoveredProcess) -> bool {
        process
            .cmdline
            .iter()
            .any(|arg| arg.contains(&self.launch_marker))
    }

    pub fn ownership(&self, process: &DiscoveredProcess) -> Ownership {
        let cmdline = &process.cmdline;
        let Some(index) = cmdline.iter().position(|arg| arg == MANAGEMENT_FLAG) else {
            return Ownership::Foreign;
        };
        let smells_like_ours = cmdline
            .iter()
            .any(|arg| arg.contains(&self.brand_marker) && arg.contains(&self.provider_marker));
        if !smells_like_ours {
            return Ownership::Foreign;
        }

        let (Some(host), Some(port)) = (cmdline.get(index + 1), cmdline.get(index + 2)) else {
            return Ownership::OwnedUnreachable(format!(
                "{MANAGEMENT_FLAG} is missing its host/port arguments"
            ));
        };
        match ControlEndpoint::from_parts(host, port) {
            Ok(endpoint) => Ownership::Owned(endpoint),
            Err(e) => Ownership::OwnedUnreachable(e.to_string()),
        }
    }
}

/// Fatal conditions for startup.
#[derive(Debug, thiserror::Error)]
pub enum TakeoverError {
    #[error(
        "another VPN daemon instance (pid {pid}) is already running and could not be stopped"
    )]
    OwnProcessStillRunning { pid: u32 },

    #[error(
        "another VPN daemon instance (pid {pid}) is already running and was not launched by us; \
         stop it manually"
    )]
    ForeignProcessDetected { pid: u32 },
}

#[derive(Debug, thiserror::Error)]
enum TerminateError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("{0}")]
    Unreachable(String),
}

/// Finds and stops leftover daemon instances.
pub struct Takeover {
    table: Arc<dyn ProcessTable>,
    connector: Arc<dyn Connector>,
    fingerprint: Fingerprint,
    exit_grace: Duration,
}

impl Takeover {
    pub fn new(
        table: impl ProcessTable + 'static,
        connector: impl Connector,
        config: &TakeoverConfig,
    ) -> Self {
        Self {
            table: Arc::new(table),
            connector: Arc::new(connector),
            fingerprint: Fingerprint::from(config),
            exit_grace: config.exit_grace(),
        }
    }

    /// The first process carrying the launch marker, if any.
    pub fn find_daemon_process(&self) -> Option<DiscoveredProcess> {
        self.table
            .processes()
            .into_iter()
            .find(|p| self.fingerprint.is_candidate(p))
    }

    /// Stop a daemon left running by an earlier session.
    ///
    /// Returns `Ok(false)` when nothing was running and `Ok(true)` when a
    /// daemon of ours was stopped.
    pub async fn stop_if_already_running(&self) -> Result<bool, TakeoverError> {
        let Some(process) = self.find_daemon_process() else {
            debug!("Could not find daemon process while trying to stop it");
            return Ok(false);
        };
        let pid = process.pid;
        debug!(pid, "Daemon is already running, trying to stop it");

        let outcome = match self.fingerprint.ownership(&process) {
            Ownership::Foreign => {
                debug!(pid, "Not stopping daemon: not recognised as one of our launches");
                return Err(TakeoverError::ForeignProcessDetected { pid });
            }
            Ownership::Owned(endpoint) => self.terminate(&endpoint).await,
            Ownership::OwnedUnreachable(reason) => Err(TerminateError::Unreachable(reason)),
        };
        if let Err(e) = outcome {
            error!(pid, error = %e, "Problem trying to terminate daemon");
        }

        if self.wait_for_exit().await {
            info!(pid, "Successfully stopped already running daemon");
            Ok(true)
        } else {
            warn!(pid, "Unable to terminate daemon");
            Err(TakeoverError::OwnProcessStillRunning { pid })
        }
    }

    async fn terminate(&self, endpoint: &ControlEndpoint) -> Result<(), TerminateError> {
        debug!(endpoint = %endpoint, "Connecting to running daemon's management interface");
        let mut channel = self.connector.connect(endpoint).await?;
        channel
            .send_line(&Command::Signal(Signal::Term).to_string())
            .await?;
        channel.close(true).await;
        Ok(())
    }

    /// Re-scan until no candidate remains or the grace period runs out.
    /// Always scans at least once.
    async fn wait_for_exit(&self) -> bool {
        let deadline = Instant::now() + self.exit_grace;
        loop {
            if self.find_daemon_process().is_none() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(RESCAN_INTERVAL).await;
        }
    }
}
