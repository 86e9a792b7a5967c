#![deny(unsafe_code)]

//! Shared test utilities for the vpnwarden workspace.
//!
//! Provides config builders, tracing helpers and [`fake_daemon::FakeDaemon`],
//! a scripted stand-in for a VPN daemon's management interface.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! vpnwarden-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod fake_daemon;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use fake_daemon::{CommandLog, FakeDaemon, FakeDaemonBuilder};
pub use tracing_setup::init_test_tracing;
