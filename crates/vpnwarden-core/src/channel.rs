//! Line-oriented control channel to a daemon's management interface.
//!
//! Commands are single lines. Multi-line responses end with a line holding
//! only the terminator token (`END`). After every exchange the channel
//! drains whatever bytes are already buffered so the next command starts
//! on a clean stream.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

use vpnwarden_config::ManagementConfig;

use crate::endpoint::ControlEndpoint;

/// Terminator line closing every multi-line response.
pub const TERMINATOR: &str = "END";

/// Any bidirectional byte stream a channel can run over.
pub trait ChannelIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ChannelIo for T {}

/// Errors from the control channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to connect to management interface at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: io::Error,
    },

    #[error("unix socket endpoints are not supported on this platform")]
    Unsupported,

    #[error("management connection lost: {0}")]
    ConnectionLost(#[from] io::Error),

    #[error("no terminator within {0:?}")]
    Timeout(Duration),

    #[error("response did not end with {TERMINATOR}")]
    NoData,
}

impl ChannelError {
    /// Whether the channel must be discarded after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::NoData)
    }
}

/// Timing knobs for a channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    /// Upper bound for connecting and for waiting on a terminator line.
    pub command_timeout: Duration,
    /// How long a drain waits for further bytes before it stops.
    pub drain_window: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
            drain_window: Duration::from_millis(20),
        }
    }
}

impl From<&ManagementConfig> for ChannelOptions {
    fn from(config: &ManagementConfig) -> Self {
        Self {
            command_timeout: config.command_timeout(),
            drain_window: config.drain_window(),
        }
    }
}

/// An open connection to a management interface.
pub struct ControlChannel {
    stream: BufReader<Box<dyn ChannelIo>>,
    peer: String,
    options: ChannelOptions,
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl ControlChannel {
    /// Open a socket to `endpoint` and discard the greeting banner.
    pub async fn connect(
        endpoint: &ControlEndpoint,
        options: ChannelOptions,
    ) -> Result<Self, ChannelError> {
        let connect_err = |source: io::Error| ChannelError::Connect {
            endpoint: endpoint.to_string(),
            source,
        };
        let timed_out = || io::Error::new(io::ErrorKind::TimedOut, "connect timed out");

        let io: Box<dyn ChannelIo> = match endpoint {
            #[cfg(unix)]
            ControlEndpoint::Unix(path) => {
                let stream = tokio::time::timeout(
                    options.command_timeout,
                    tokio::net::UnixStream::connect(path),
                )
                .await
                .map_err(|_| connect_err(timed_out()))?
                .map_err(connect_err)?;
                Box::new(stream)
            }
            #[cfg(not(unix))]
            ControlEndpoint::Unix(_) => return Err(ChannelError::Unsupported),
            ControlEndpoint::Tcp { host, port } => {
                let stream = tokio::time::timeout(
                    options.command_timeout,
                    tokio::net::TcpStream::connect((host.as_str(), *port)),
                )
                .await
                .map_err(|_| connect_err(timed_out()))?
                .map_err(connect_err)?;
                Box::new(stream)
            }
        };

        let mut channel = Self::from_stream(io, endpoint.to_string(), options);
        channel.drain().await.map_err(connect_err)?;
        debug!(peer = %channel.peer, "Management channel open");
        Ok(channel)
    }

    /// Wrap an already-connected stream. No banner drain is performed.
    pub fn from_stream(
        io: impl ChannelIo + 'static,
        peer: impl Into<String>,
        options: ChannelOptions,
    ) -> Self {
        let io: Box<dyn ChannelIo> = Box::new(io);
        Self {
            stream: BufReader::new(io),
            peer: peer.into(),
            options,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send `command` and collect the response lines up to `terminator`.
    ///
    /// The terminator line itself is never part of the result.
    pub async fn send_command(
        &mut self,
        command: &str,
        terminator: &str,
    ) -> Result<Vec<String>, ChannelError> {
        trace!(peer = %self.peer, command, "Sending management command");
        self.write_line(command).await?;

        let limit = self.options.command_timeout;
        let (raw, eof) = tokio::time::timeout(limit, self.read_response(terminator))
            .await
            .map_err(|_| ChannelError::Timeout(limit))??;

        if let Err(e) = self.drain().await {
            debug!(peer = %self.peer, error = %e, "Could not read from socket. Assuming it died.");
        }

        match split_response(&raw, terminator) {
            Some(lines) => Ok(lines),
            None if eof => Err(ChannelError::ConnectionLost(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "management interface closed the connection",
            ))),
            None => Err(ChannelError::NoData),
        }
    }

    /// Send a command that has no terminated response, then drain.
    pub async fn send_line(&mut self, command: &str) -> Result<(), ChannelError> {
        trace!(peer = %self.peer, command, "Sending management command (no reply expected)");
        self.write_line(command).await?;
        if let Err(e) = self.drain().await {
            debug!(peer = %self.peer, error = %e, "Socket closed after command");
        }
        Ok(())
    }

    /// Close the channel. With `announce`, say `quit` and read until the
    /// daemon hangs up first.
    pub async fn close(mut self, announce: bool) {
        if announce {
            let limit = self.options.command_timeout;
            let farewell = async {
                self.write_line("quit").await?;
                let mut rest = Vec::new();
                self.stream.read_to_end(&mut rest).await?;
                Ok::<_, ChannelError>(())
            };
            match tokio::time::timeout(limit, farewell).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(peer = %self.peer, error = %e, "Error during quit handshake"),
                Err(_) => debug!(peer = %self.peer, "Quit handshake timed out"),
            }
        }
        if let Err(e) = self.stream.get_mut().shutdown().await {
            trace!(peer = %self.peer, error = %e, "Socket shutdown failed");
        }
        debug!(peer = %self.peer, announce, "Management channel closed");
    }

    async fn write_line(&mut self, command: &str) -> Result<(), ChannelError> {
        let inner = self.stream.get_mut();
        inner.write_all(format!("{command}\n").as_bytes()).await?;
        inner.flush().await?;
        Ok(())
    }

    /// Read until a line equal to `terminator` or end of stream.
    /// Returns the raw text and whether the stream ended.
    async fn read_response(&mut self, terminator: &str) -> Result<(String, bool), ChannelError> {
        let mut raw = String::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = self.stream.read_until(b'\n', &mut line).await?;
            if n == 0 {
                return Ok((raw, true));
            }
            let text = String::from_utf8_lossy(&line);
            raw.push_str(&text);
            if text.trim_end_matches(['\r', '\n']) == terminator {
                return Ok((raw, false));
            }
        }
    }

    /// Discard whatever arrives within the drain window. End of stream is
    /// reported as an error.
    async fn drain(&mut self) -> io::Result<usize> {
        let mut buf = [0u8; 1024];
        let mut total = 0;
        loop {
            match tokio::time::timeout(self.options.drain_window, self.stream.read(&mut buf)).await
            {
                Err(_) => return Ok(total),
                Ok(Ok(0)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "management interface closed the connection",
                    ));
                }
                Ok(Ok(n)) => total += n,
                Ok(Err(e)) => return Err(e),
            }
        }
    }
}

/// Split a buffered response into lines, accepting CRLF or LF endings.
///
/// Returns `None` unless the final line starts with `terminator`; that line
/// is dropped from the result.
pub fn split_response(raw: &str, terminator: &str) -> Option<Vec<String>> {
    let mut lines: Vec<String> = raw
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    match lines.last() {
        Some(last) if last.starts_with(terminator) => {
            lines.pop();
            Some(lines)
        }
        _ => None,
    }
}
