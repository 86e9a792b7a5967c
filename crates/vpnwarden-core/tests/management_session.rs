//! End-to-end tests against a fake management interface on real sockets.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc::UnboundedReceiver;

use vpnwarden_core::{
    ConnectionState, EventSink, LogObserver, ManagementEvent, Supervisor, event_channel,
};
use vpnwarden_test_utils::{FakeDaemon, TestConfigBuilder, init_test_tracing};

async fn next_event(rx: &mut UnboundedReceiver<ManagementEvent>) -> ManagementEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event within 5s")
        .expect("event channel closed")
}

#[test_log::test(tokio::test)]
async fn test_queries_over_unix_socket() {
    let daemon = FakeDaemon::builder().spawn_unix().await;
    let config = TestConfigBuilder::new()
        .management(daemon.host(), daemon.port())
        .build();
    let (events, mut rx) = event_channel();
    let supervisor = Supervisor::from_config(&config, events).unwrap();

    supervisor.connect().await.unwrap();
    assert_eq!(next_event(&mut rx).await, ManagementEvent::Connected);
    assert_eq!(supervisor.state(), ConnectionState::Connected);

    assert_eq!(supervisor.get_state().await, "CONNECTED");

    let traffic = supervisor.get_traffic_status().await.unwrap();
    assert_eq!(traffic.download, "153789");
    assert_eq!(traffic.upload, "308764");

    let log = supervisor.recent_log(20).await.unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log[2].message, "Initialization Sequence Completed");

    supervisor.disconnect().await;
    assert_eq!(next_event(&mut rx).await, ManagementEvent::Disconnected);
    assert!(!supervisor.is_connected());

    assert_eq!(daemon.commands(), vec!["state", "status", "log 20", "quit"]);
}

#[test_log::test(tokio::test)]
async fn test_retry_loop_reaches_late_daemon_over_tcp() {
    // Reserve a port, release it, and start the daemon there after the loop
    // has already failed at least once.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let config = TestConfigBuilder::new()
        .management("127.0.0.1", &port.to_string())
        .retry_interval_ms(50)
        .build();
    let (events, mut rx) = event_channel();
    let supervisor = Supervisor::from_config(&config, events).unwrap();
    supervisor.connect_retry(0, None).unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!supervisor.is_connected());

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        stream
    });

    assert_eq!(next_event(&mut rx).await, ManagementEvent::Connected);
    assert!(supervisor.is_connected());
    drop(accept.await.unwrap());
}

#[tokio::test]
async fn test_hang_up_triggers_reconnect() {
    init_test_tracing();
    let daemon = FakeDaemon::builder().hang_up_on("status").spawn_unix().await;
    let config = TestConfigBuilder::new()
        .management(daemon.host(), daemon.port())
        .retry_interval_ms(20)
        .build();
    let (events, mut rx) = event_channel();
    let supervisor = Supervisor::from_config(&config, events).unwrap();

    supervisor.connect().await.unwrap();
    assert_eq!(next_event(&mut rx).await, ManagementEvent::Connected);

    assert_eq!(supervisor.get_traffic_status().await, None);
    assert_eq!(next_event(&mut rx).await, ManagementEvent::Disconnected);

    // The daemon is still listening, so the reconnect loop gets back in.
    assert_eq!(next_event(&mut rx).await, ManagementEvent::Connected);
    assert_eq!(supervisor.get_state().await, "CONNECTED");
}

#[test_log::test(tokio::test)]
async fn test_terminate_signals_and_removes_socket_dir() {
    let daemon = FakeDaemon::builder().spawn_unix().await;
    let socket_dir = daemon.socket_dir().unwrap().to_path_buf();
    let config = TestConfigBuilder::new()
        .management(daemon.host(), daemon.port())
        .build();
    let supervisor = Supervisor::from_config(&config, EventSink::discard()).unwrap();

    supervisor.connect().await.unwrap();
    supervisor.terminate(true).await;

    assert!(!socket_dir.exists());
    assert!(daemon.command_log().received("signal SIGTERM"));
}

#[test_log::test(tokio::test)]
async fn test_observer_forwards_each_log_line_once() {
    let daemon = FakeDaemon::builder()
        .reply(
            "log",
            "1700000000,I,TCP/UDP: Preserving recently used remote address\r\n\
             1700000001,,MANAGEMENT: Client connected\r\n\
             1700000002,I,Peer Connection Initiated with [AF_INET]203.0.113.7:1194\r\n\
             END\r\n",
        )
        .spawn_unix()
        .await;
    let config = TestConfigBuilder::new()
        .management(daemon.host(), daemon.port())
        .log_lines(5)
        .build();
    let (events, _rx) = event_channel();
    let supervisor = Supervisor::from_config(&config, events.clone()).unwrap();
    supervisor.connect().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut observer = LogObserver::new(supervisor, &config.observer, events);
    observer.set_watcher(move |m: &str| sink.lock().unwrap().push(m.to_string()));

    observer.process_log().await;
    observer.process_log().await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "TCP/UDP: Preserving recently used remote address",
            "Peer Connection Initiated with [AF_INET]203.0.113.7:1194",
        ]
    );
    assert_eq!(daemon.commands(), vec!["log 5", "log 5"]);
}
