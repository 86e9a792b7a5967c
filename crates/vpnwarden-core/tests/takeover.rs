//! Takeover against a fake daemon reachable over TCP.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;

use vpnwarden_core::{
    ChannelOptions, DiscoveredProcess, SocketConnector, Takeover, TakeoverError,
};
use vpnwarden_test_utils::{FakeDaemon, TestConfigBuilder};

fn leftover(pid: u32, host: &str, port: &str) -> DiscoveredProcess {
    DiscoveredProcess {
        pid,
        cmdline: [
            "/usr/sbin/openvpn",
            "--setenv",
            "LEAPOPENVPN",
            "1",
            "--management",
            host,
            port,
            "--config",
            "/home/u/.config/leap/providers/demo.example.org/openvpn.conf",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
}

#[test_log::test(tokio::test)]
async fn test_own_leftover_is_signalled_and_stopped() {
    let daemon = FakeDaemon::builder().spawn_tcp().await;
    let log = daemon.command_log();
    let process = leftover(5150, daemon.host(), daemon.port());

    // The process disappears once the daemon has been told to terminate.
    let table = move || {
        if log.received("signal SIGTERM") {
            Vec::new()
        } else {
            vec![process.clone()]
        }
    };
    let config = TestConfigBuilder::new().exit_grace_ms(2000).build();
    let takeover = Takeover::new(
        table,
        SocketConnector::new(ChannelOptions::from(&config.management)),
        &config.takeover,
    );

    assert!(takeover.stop_if_already_running().await.unwrap());
    assert_eq!(daemon.commands(), vec!["signal SIGTERM", "quit"]);
}

#[test_log::test(tokio::test)]
async fn test_foreign_daemon_is_left_alone() {
    let daemon = FakeDaemon::builder().spawn_tcp().await;
    let mut process = leftover(6000, daemon.host(), daemon.port());
    process.cmdline[8] = "/etc/openvpn/client/work.conf".to_string();

    let scans = Arc::new(AtomicUsize::new(0));
    let counter = scans.clone();
    let table = move || {
        counter.fetch_add(1, Ordering::SeqCst);
        vec![process.clone()]
    };
    let config = TestConfigBuilder::new().build();
    let takeover = Takeover::new(
        table,
        SocketConnector::new(ChannelOptions::from(&config.management)),
        &config.takeover,
    );

    let err = takeover.stop_if_already_running().await.unwrap_err();
    assert!(matches!(err, TakeoverError::ForeignProcessDetected { pid: 6000 }));
    assert_eq!(scans.load(Ordering::SeqCst), 1);
    assert!(daemon.commands().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_own_leftover_that_ignores_sigterm() {
    let daemon = FakeDaemon::builder().spawn_tcp().await;
    let process = leftover(7000, daemon.host(), daemon.port());
    let config = TestConfigBuilder::new().exit_grace_ms(300).build();
    let takeover = Takeover::new(
        move || vec![process.clone()],
        SocketConnector::new(ChannelOptions::from(&config.management)),
        &config.takeover,
    );

    let err = takeover.stop_if_already_running().await.unwrap_err();
    assert!(matches!(err, TakeoverError::OwnProcessStillRunning { pid: 7000 }));
    assert!(daemon.command_log().received("signal SIGTERM"));
}
