//! Connection supervisor: owns the control channel and its retry loop.
//!
//! State machine:
//!
//! ```text
//! Disconnected ──connect ok──▶ Connected
//! Connected ──socket error──▶ Disconnected (reconnect loop scheduled)
//! Disconnected ──budget exhausted──▶ Aborted (until reset)
//! ```
//!
//! The retry loop never blocks: every attempt is its own spawned task that
//! schedules the next one after the retry interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use vpnwarden_config::{AppConfig, SupervisorConfig};

use crate::BoxFuture;
use crate::channel::{ChannelError, ChannelOptions, ControlChannel, TERMINATOR};
use crate::endpoint::ControlEndpoint;
use crate::events::{EventSink, ManagementEvent};
use crate::protocol::{self, Command, LogEntry, Signal, TrafficStatus};

/// Opens control channels. The seam between the supervisor and real sockets.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(
        &'a self,
        endpoint: &'a ControlEndpoint,
    ) -> BoxFuture<'a, Result<ControlChannel, ChannelError>>;
}

/// Connects over Unix domain or TCP sockets.
#[derive(Debug, Clone, Default)]
pub struct SocketConnector {
    options: ChannelOptions,
}

impl SocketConnector {
    pub fn new(options: ChannelOptions) -> Self {
        Self { options }
    }
}

impl Connector for SocketConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a ControlEndpoint,
    ) -> BoxFuture<'a, Result<ControlChannel, ChannelError>> {
        Box::pin(ControlChannel::connect(endpoint, self.options))
    }
}

/// Coarse connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    /// A retry budget was exhausted. Terminal until [`Supervisor::reset`].
    Aborted,
}

/// Errors from supervised management operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagementError {
    #[error("management connection is not configured")]
    NotConfigured,

    #[error("management connection is already configured for {0}")]
    AlreadyConfigured(String),

    #[error(transparent)]
    Connect(ChannelError),

    #[error("not connected to the management interface")]
    NotConnected,

    #[error("connection lost while sending {command:?}: {source}")]
    ConnectionLost {
        command: String,
        source: ChannelError,
    },

    #[error("no data in response to {0:?}")]
    NoData(String),

    #[error("no parseable record in response to {0:?}")]
    Malformed(String),
}

/// Retry tuning.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// Budget for the loop started after a mid-session socket error.
    pub reconnect_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            reconnect_retries: 5,
        }
    }
}

impl From<&SupervisorConfig> for RetryPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            interval: config.retry_interval(),
            reconnect_retries: config.reconnect_retries,
        }
    }
}

struct Inner {
    endpoint: OnceLock<ControlEndpoint>,
    channel: Mutex<Option<ControlChannel>>,
    connected: AtomicBool,
    aborted: AtomicBool,
    connector: Box<dyn Connector>,
    retry: RetryPolicy,
    events: EventSink,
}

/// Handle to the connection supervisor. Clones share the same channel.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(connector: impl Connector, retry: RetryPolicy, events: EventSink) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: OnceLock::new(),
                channel: Mutex::new(None),
                connected: AtomicBool::new(false),
                aborted: AtomicBool::new(false),
                connector: Box::new(connector),
                retry,
                events,
            }),
        }
    }

    /// Build a socket-backed supervisor with its endpoint set from config.
    pub fn from_config(config: &AppConfig, events: EventSink) -> Result<Self, crate::Error> {
        let connector = SocketConnector::new(ChannelOptions::from(&config.management));
        let retry = RetryPolicy::from(&config.supervisor);
        let supervisor = Self::new(connector, retry, events);
        supervisor.set_connection(ControlEndpoint::from_config(&config.management)?)?;
        Ok(supervisor)
    }

    /// Set the endpoint. It cannot be changed afterwards.
    pub fn set_connection(&self, endpoint: ControlEndpoint) -> Result<(), ManagementError> {
        self.inner
            .endpoint
            .set(endpoint)
            .map_err(|_| ManagementError::AlreadyConfigured(self.endpoint_label()))
    }

    pub fn endpoint(&self) -> Option<&ControlEndpoint> {
        self.inner.endpoint.get()
    }

    fn endpoint_label(&self) -> String {
        self.endpoint()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<unset>".to_string())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else if self.is_aborted() {
            ConnectionState::Aborted
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Leave the `Aborted` state so a new retry loop may run.
    pub fn reset(&self) {
        self.inner.aborted.store(false, Ordering::SeqCst);
    }

    /// Make one connection attempt. Already being connected is success.
    pub async fn connect(&self) -> Result<(), ManagementError> {
        let endpoint = self.endpoint().ok_or(ManagementError::NotConfigured)?;
        let mut guard = self.inner.channel.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        match self.inner.connector.connect(endpoint).await {
            Ok(channel) => {
                *guard = Some(channel);
                self.inner.connected.store(true, Ordering::SeqCst);
                info!(endpoint = %endpoint, "Connected to management interface");
                self.inner.events.emit(ManagementEvent::Connected);
                Ok(())
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Could not connect to management yet");
                Err(ManagementError::Connect(e))
            }
        }
    }

    /// Start the self-rescheduling connect loop at `attempt`.
    ///
    /// Attempts `attempt..=max_retries` are made one retry interval apart;
    /// past the budget the supervisor moves to `Aborted`. With no budget the
    /// loop runs until connected. Only configuration is checked here; the
    /// attempts themselves happen on spawned tasks.
    pub fn connect_retry(
        &self,
        attempt: u32,
        max_retries: Option<u32>,
    ) -> Result<(), ManagementError> {
        if self.endpoint().is_none() {
            error!("Refusing to connect: management connection is not configured");
            return Err(ManagementError::NotConfigured);
        }
        self.schedule_attempt(attempt, max_retries, Duration::ZERO);
        Ok(())
    }

    fn schedule_attempt(&self, attempt: u32, max_retries: Option<u32>, delay: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            this.retry_step(attempt, max_retries).await;
        });
    }

    async fn retry_step(&self, attempt: u32, max_retries: Option<u32>) {
        // A connected supervisor never moves to `Aborted`.
        if self.is_connected() {
            return;
        }
        if let Some(max) = max_retries
            && attempt > max
        {
            warn!(
                attempts = attempt,
                "Max retries reached while attempting to connect to management. Aborting."
            );
            if !self.inner.aborted.swap(true, Ordering::SeqCst) {
                self.inner.events.emit(ManagementEvent::Aborted);
            }
            return;
        }

        if self.is_aborted() {
            return;
        }

        debug!(attempt, "Connecting to management");
        if let Err(e) = self.connect().await {
            debug!(attempt, error = %e, "Management connect attempt failed");
        }
        self.schedule_attempt(attempt + 1, max_retries, self.inner.retry.interval);
    }

    /// Send a block command and return its response lines.
    ///
    /// A socket error collapses the channel and starts a bounded reconnect
    /// loop; the caller gets [`ManagementError::ConnectionLost`].
    pub async fn command(&self, command: Command) -> Result<Vec<String>, ManagementError> {
        let wire = command.to_string();
        let mut guard = self.inner.channel.lock().await;
        let channel = guard.as_mut().ok_or(ManagementError::NotConnected)?;

        let result = if command.expects_block() {
            channel.send_command(&wire, TERMINATOR).await
        } else {
            channel.send_line(&wire).await.map(|()| Vec::new())
        };

        match result {
            Ok(lines) => Ok(lines),
            Err(ChannelError::NoData) => Err(ManagementError::NoData(wire)),
            Err(e) => {
                warn!(command = %wire, error = %e, "Socket error");
                let dead = guard.take();
                self.inner.connected.store(false, Ordering::SeqCst);
                drop(guard);
                if let Some(channel) = dead {
                    channel.close(false).await;
                }
                self.inner.events.emit(ManagementEvent::Disconnected);

                debug!("Trying to connect to management again");
                self.schedule_attempt(
                    0,
                    Some(self.inner.retry.reconnect_retries),
                    Duration::ZERO,
                );
                Err(ManagementError::ConnectionLost {
                    command: wire,
                    source: e,
                })
            }
        }
    }

    /// Current status step, or an error explaining why there is none.
    pub async fn query_state(&self) -> Result<String, ManagementError> {
        let lines = self.command(Command::State).await?;
        match protocol::parse_state(&lines) {
            Some(step) => Ok(step),
            None if lines.is_empty() => Err(ManagementError::NoData(Command::State.to_string())),
            None => Err(ManagementError::Malformed(Command::State.to_string())),
        }
    }

    /// Current status step; empty when disconnected or unavailable.
    pub async fn get_state(&self) -> String {
        if !self.is_connected() {
            return String::new();
        }
        match self.query_state().await {
            Ok(step) => step,
            Err(e) => {
                debug!(error = %e, "No state available");
                String::new()
            }
        }
    }

    pub async fn query_traffic(&self) -> Result<TrafficStatus, ManagementError> {
        let lines = self.command(Command::Status).await?;
        Ok(protocol::parse_status(&lines))
    }

    /// Traffic counters; `None` when disconnected or unavailable.
    pub async fn get_traffic_status(&self) -> Option<TrafficStatus> {
        if !self.is_connected() {
            return None;
        }
        self.query_traffic()
            .await
            .inspect_err(|e| debug!(error = %e, "No traffic status available"))
            .ok()
    }

    /// Parsed entries from `log n`. Malformed lines are dropped.
    pub async fn recent_log(&self, n: u32) -> Result<Vec<LogEntry>, ManagementError> {
        let lines = self.command(Command::Log(n)).await?;
        Ok(lines
            .iter()
            .filter_map(|l| protocol::parse_log_line(l))
            .collect())
    }

    /// Ask the daemon to exit. With `shutdown`, also remove the temp
    /// directory holding a Unix socket endpoint.
    pub async fn terminate(&self, shutdown: bool) {
        if self.is_connected()
            && let Err(e) = self.command(Command::Signal(Signal::Term)).await
        {
            warn!(error = %e, "Could not send SIGTERM to daemon");
        }
        if shutdown {
            self.cleanup_tempfiles().await;
        }
    }

    /// Close the channel politely with `quit`.
    pub async fn disconnect(&self) {
        let channel = self.inner.channel.lock().await.take();
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Some(channel) = channel {
            channel.close(true).await;
            self.inner.events.emit(ManagementEvent::Disconnected);
        }
    }

    async fn cleanup_tempfiles(&self) {
        let Some(dir) = self.endpoint().and_then(ControlEndpoint::socket_dir) else {
            return;
        };
        if !tokio::fs::metadata(dir).await.is_ok_and(|m| m.is_dir()) {
            return;
        }
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => debug!(dir = %dir.display(), "Removed management socket directory"),
            Err(e) => error!(dir = %dir.display(), error = %e, "Could not delete tmpfolder"),
        }
    }
}
