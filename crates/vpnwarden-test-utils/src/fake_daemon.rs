//! A scripted stand-in for a VPN daemon's management interface.
//!
//! [`FakeDaemon`] listens on a Unix socket inside a temporary directory or on
//! a loopback TCP port. Every connection gets a greeting banner, then each
//! received line is recorded and answered from a fixed script. `quit` closes
//! the connection, as the real interface does.
//!
//! # Example
//!
//! ```ignore
//! let daemon = FakeDaemon::builder().spawn_unix().await;
//! // point the supervisor at daemon.host() / daemon.port()
//! assert!(daemon.commands().contains(&"state".to_string()));
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinHandle;
use tracing::debug;

const BANNER: &str = ">INFO:OpenVPN Management Interface Version 5 -- type 'help' for more info\r\n";
const UNKNOWN: &str = "ERROR: unknown command, enter 'help' for more options\r\n";

/// Default reply to `state`.
pub const STATE_REPLY: &str = "1700000000,CONNECTED,SUCCESS,10.8.0.2,203.0.113.7,1194,,,\r\nEND\r\n";

/// Default reply to `status`.
pub const STATUS_REPLY: &str = "OpenVPN STATISTICS\r\n\
                                Updated,2023-11-14 22:13:20\r\n\
                                TUN/TAP read bytes,153789\r\n\
                                TUN/TAP write bytes,308764\r\n\
                                END\r\n";

/// Default log tail, served for any `log N`.
pub const LOG_REPLY: &str = "1700000000,I,OpenVPN 2.6.8 x86_64-pc-linux-gnu\r\n\
                             1700000001,,MANAGEMENT: Client connected from /run/management.socket\r\n\
                             1700000002,I,Initialization Sequence Completed\r\n\
                             END\r\n";

/// Shared record of the commands a [`FakeDaemon`] received.
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    inner: Arc<Mutex<Vec<String>>>,
}

impl CommandLog {
    fn push(&self, command: String) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(command);
    }

    /// Every command received so far, in arrival order.
    pub fn all(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn received(&self, command: &str) -> bool {
        self.all().iter().any(|c| c == command)
    }
}

#[derive(Debug, Clone)]
struct Script {
    replies: HashMap<String, String>,
    hang_up_on: HashSet<String>,
    banner: bool,
}

impl Script {
    fn reply(&self, command: &str) -> String {
        if let Some(reply) = self.replies.get(command) {
            return reply.clone();
        }
        if command.starts_with("log ")
            && let Some(reply) = self.replies.get("log")
        {
            return reply.clone();
        }
        UNKNOWN.to_string()
    }
}

/// Configures the script before the daemon starts listening.
pub struct FakeDaemonBuilder {
    script: Script,
}

impl FakeDaemonBuilder {
    fn new() -> Self {
        let mut replies = HashMap::new();
        replies.insert("state".to_string(), STATE_REPLY.to_string());
        replies.insert("status".to_string(), STATUS_REPLY.to_string());
        replies.insert("log".to_string(), LOG_REPLY.to_string());
        replies.insert(
            "signal SIGTERM".to_string(),
            "SUCCESS: signal SIGTERM thrown\r\n".to_string(),
        );
        Self {
            script: Script {
                replies,
                hang_up_on: HashSet::new(),
                banner: true,
            },
        }
    }

    /// Answer `command` with `reply` verbatim. Use `"log"` to cover every
    /// `log N` request.
    pub fn reply(mut self, command: &str, reply: &str) -> Self {
        self.script
            .replies
            .insert(command.to_string(), reply.to_string());
        self
    }

    /// Close the connection, without answering, when `command` arrives.
    pub fn hang_up_on(mut self, command: &str) -> Self {
        self.script.hang_up_on.insert(command.to_string());
        self
    }

    /// Skip the greeting banner.
    pub fn without_banner(mut self) -> Self {
        self.script.banner = false;
        self
    }

    /// Listen on `management.socket` inside a fresh temporary directory.
    pub async fn spawn_unix(self) -> FakeDaemon {
        let dir = tempfile::Builder::new()
            .prefix("vpnwarden-test-")
            .tempdir()
            .expect("failed to create temp dir");
        let path = dir.path().join("management.socket");
        let listener = UnixListener::bind(&path).expect("failed to bind unix socket");
        let commands = CommandLog::default();

        let script = Arc::new(self.script);
        let log = commands.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, script.clone(), log.clone()));
            }
        });

        FakeDaemon {
            host: path.to_string_lossy().into_owned(),
            port: "unix".to_string(),
            socket_path: Some(path),
            commands,
            task,
            _temp_dir: Some(dir),
        }
    }

    /// Listen on an ephemeral loopback TCP port.
    pub async fn spawn_tcp(self) -> FakeDaemon {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind tcp listener");
        let port = listener
            .local_addr()
            .expect("listener has no local address")
            .port();
        let commands = CommandLog::default();

        let script = Arc::new(self.script);
        let log = commands.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, script.clone(), log.clone()));
            }
        });

        FakeDaemon {
            host: "127.0.0.1".to_string(),
            port: port.to_string(),
            socket_path: None,
            commands,
            task,
            _temp_dir: None,
        }
    }
}

async fn serve<S>(stream: S, script: Arc<Script>, commands: CommandLog)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    if script.banner && writer.write_all(BANNER.as_bytes()).await.is_err() {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        let command = line.trim().to_string();
        if command.is_empty() {
            continue;
        }
        debug!(%command, "Fake daemon received");
        commands.push(command.clone());

        if command == "quit" || script.hang_up_on.contains(&command) {
            break;
        }
        if writer
            .write_all(script.reply(&command).as_bytes())
            .await
            .is_err()
        {
            break;
        }
    }
}

/// A running fake management interface. Stops listening when dropped.
pub struct FakeDaemon {
    host: String,
    port: String,
    socket_path: Option<PathBuf>,
    commands: CommandLog,
    task: JoinHandle<()>,
    _temp_dir: Option<TempDir>,
}

impl FakeDaemon {
    pub fn builder() -> FakeDaemonBuilder {
        FakeDaemonBuilder::new()
    }

    /// Management host as it would appear in config: a socket path for Unix
    /// daemons, `127.0.0.1` for TCP ones.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// `"unix"` or the TCP port number.
    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    /// Directory holding the Unix socket, if any.
    pub fn socket_dir(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.all()
    }

    /// A handle on the command record that outlives borrows of the daemon.
    pub fn command_log(&self) -> CommandLog {
        self.commands.clone()
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixStream;

    #[tokio::test]
    async fn test_unix_daemon_answers_script() {
        let daemon = FakeDaemon::builder().spawn_unix().await;
        let stream = UnixStream::connect(daemon.socket_path().unwrap())
            .await
            .unwrap();
        let mut stream = BufReader::new(stream);

        let mut banner = String::new();
        stream.read_line(&mut banner).await.unwrap();
        assert!(banner.starts_with(">INFO:"));

        stream.get_mut().write_all(b"state\n").await.unwrap();
        let mut line = String::new();
        stream.read_line(&mut line).await.unwrap();
        assert!(line.contains("CONNECTED"));

        stream.get_mut().write_all(b"quit\n").await.unwrap();
        let mut rest = String::new();
        stream.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "END\r\n");

        assert_eq!(daemon.commands(), vec!["state", "quit"]);
    }

    #[tokio::test]
    async fn test_tcp_daemon_hangs_up_on_request() {
        let daemon = FakeDaemon::builder()
            .without_banner()
            .hang_up_on("status")
            .spawn_tcp()
            .await;
        let addr = format!("{}:{}", daemon.host(), daemon.port());
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"status\n").await.unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(daemon.command_log().received("status"));
    }
}
