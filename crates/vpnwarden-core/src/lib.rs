#![deny(unsafe_code)]

//! vpnwarden core: supervision of an external VPN daemon.
//!
//! Talks to the daemon's line-oriented management interface, keeps that
//! connection alive, turns polled state/status/log output into events, and
//! detects daemon instances left running by earlier sessions.
//!
//! ```text
//! ┌──────────────┐  state/status/log  ┌──────────────┐   socket   ┌────────┐
//! │ LogObserver  │───────────────────▶│  Supervisor  │───────────▶│ daemon │
//! └──────┬───────┘                    └──────────────┘            └────────┘
//!        │ ManagementEvent                   ▲
//!        ▼                                   │ transient channel, SIGTERM
//!   event consumer                    ┌──────┴───────┐
//!                                     │   Takeover   │ (startup only)
//!                                     └──────────────┘
//! ```

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future.
///
/// Traits used as `dyn Trait` (such as [`supervisor::Connector`]) cannot
/// use `async fn`; they return this instead.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Line-oriented transport to the management interface.
pub mod channel;
/// Management endpoint addresses.
pub mod endpoint;
/// Event enumeration and watcher callback.
pub mod events;
/// Periodic polling and log deduplication.
pub mod observer;
/// Commands and response parsers.
pub mod protocol;
/// Connection lifecycle and retry loop.
pub mod supervisor;
/// Detection and termination of leftover daemon instances.
pub mod takeover;

pub use channel::{ChannelError, ChannelOptions, ControlChannel};
pub use endpoint::{ControlEndpoint, EndpointError};
pub use events::{EventSink, ManagementEvent, Watcher, event_channel};
pub use observer::{LogObserver, ShutdownSignal};
pub use protocol::{Command, LogEntry, Signal, TrafficCounters, TrafficStatus};
pub use supervisor::{
    ConnectionState, Connector, ManagementError, RetryPolicy, SocketConnector, Supervisor,
};
pub use takeover::{
    DiscoveredProcess, ProcessTable, SystemProcessTable, Takeover, TakeoverError,
};

/// Any error surfaced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    Management(#[from] ManagementError),

    #[error(transparent)]
    Takeover(#[from] TakeoverError),
}
