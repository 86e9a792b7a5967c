//! Status/log observer: turns periodic polls into events.
//!
//! The daemon's log is a ring buffer, so consecutive `log N` reads overlap.
//! Lines are deduplicated by timestamp: once a timestamp has been seen its
//! message is never forwarded again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use vpnwarden_config::ObserverConfig;

use crate::events::{EventSink, ManagementEvent, Watcher};
use crate::protocol::TrafficStatus;
use crate::supervisor::Supervisor;

/// Shutdown signal for background tasks.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Polls the daemon through a [`Supervisor`] and forwards what is new.
pub struct LogObserver {
    supervisor: Supervisor,
    watcher: Option<Arc<dyn Watcher>>,
    seen: HashMap<String, String>,
    log_lines: u32,
    last_state: Option<String>,
    last_traffic: Option<TrafficStatus>,
    events: EventSink,
}

impl LogObserver {
    pub fn new(supervisor: Supervisor, config: &ObserverConfig, events: EventSink) -> Self {
        Self {
            supervisor,
            watcher: None,
            seen: HashMap::new(),
            log_lines: config.log_lines,
            last_state: None,
            last_traffic: None,
            events,
        }
    }

    pub fn set_watcher(&mut self, watcher: impl Watcher + 'static) {
        self.watcher = Some(Arc::new(watcher));
    }

    /// Timestamps recorded so far.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Fetch recent log lines and forward the novel ones to the watcher.
    pub async fn process_log(&mut self) {
        let Some(watcher) = self.watcher.clone() else {
            return;
        };
        if !self.supervisor.is_connected() {
            return;
        }

        let entries = match self.supervisor.recent_log(self.log_lines).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "No log lines this round");
                return;
            }
        };

        for entry in entries {
            if entry.is_management_chatter() || self.seen.contains_key(&entry.timestamp) {
                continue;
            }
            watcher.watch(&entry.message);
            info!("VPN: {}", entry.message);
            self.events
                .emit(ManagementEvent::LogLine(entry.message.clone()));
            self.seen.insert(entry.timestamp, entry.message);
        }
    }

    /// One poll: logs, then state and traffic, emitting changes only.
    pub async fn tick(&mut self) {
        self.process_log().await;

        let state = self.supervisor.get_state().await;
        if !state.is_empty() && self.last_state.as_deref() != Some(state.as_str()) {
            self.events.emit(ManagementEvent::StateChanged(state.clone()));
            self.last_state = Some(state);
        }

        if let Some(traffic) = self.supervisor.get_traffic_status().await
            && self.last_traffic.as_ref() != Some(&traffic)
        {
            self.events
                .emit(ManagementEvent::TrafficUpdate(traffic.clone()));
            self.last_traffic = Some(traffic);
        }
    }

    /// Run [`tick`](Self::tick) every `interval` until shutdown.
    /// The observer is handed back when the task ends.
    pub fn spawn_poller(
        mut self,
        interval: Duration,
        mut shutdown: broadcast::Receiver<ShutdownSignal>,
    ) -> JoinHandle<Self> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        debug!("Observer shutting down");
                        break;
                    }
                    _ = ticker.tick() => self.tick().await,
                }
            }
            self
        })
    }
}
