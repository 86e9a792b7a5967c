//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use vpnwarden_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// Defaults are tightened for tests: short retry interval, short exit grace.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .management("/tmp/x/management.socket", "unix")
///     .reconnect_retries(2)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.supervisor.retry_interval_ms = 50;
        config.management.command_timeout_ms = 1000;
        config.management.drain_window_ms = 5;
        config.takeover.exit_grace_ms = 500;
        Self { config }
    }

    pub fn management(mut self, host: &str, port: &str) -> Self {
        self.config.management.host = host.to_string();
        self.config.management.port = port.to_string();
        self
    }

    pub fn retry_interval_ms(mut self, ms: u64) -> Self {
        self.config.supervisor.retry_interval_ms = ms;
        self
    }

    pub fn reconnect_retries(mut self, n: u32) -> Self {
        self.config.supervisor.reconnect_retries = n;
        self
    }

    pub fn log_lines(mut self, n: u32) -> Self {
        self.config.observer.log_lines = n;
        self
    }

    pub fn exit_grace_ms(mut self, ms: u64) -> Self {
        self.config.takeover.exit_grace_ms = ms;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
