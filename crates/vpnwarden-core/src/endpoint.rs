//! Management interface addresses.
//!
//! The daemon is told where to listen with `--management <host> <port>`.
//! When `<port>` is the literal `unix`, `<host>` is a socket path.

use std::fmt;
use std::path::{Path, PathBuf};

use vpnwarden_config::ManagementConfig;

/// The port token that marks a Unix domain socket endpoint.
pub const UNIX_PORT: &str = "unix";

/// Where a daemon's management interface can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEndpoint {
    /// Unix domain socket at the given path.
    Unix(PathBuf),
    /// TCP socket, normally on loopback.
    Tcp { host: String, port: u16 },
}

/// Errors from describing an endpoint.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("management host must not be empty")]
    EmptyHost,

    #[error("management port must be \"unix\" or a TCP port, got {0:?}")]
    InvalidPort(String),
}

impl ControlEndpoint {
    /// Build an endpoint from the `(host, port)` pair the daemon was launched with.
    pub fn from_parts(host: &str, port: &str) -> Result<Self, EndpointError> {
        if host.is_empty() {
            return Err(EndpointError::EmptyHost);
        }
        if port == UNIX_PORT {
            return Ok(Self::Unix(PathBuf::from(host)));
        }
        match port.parse::<u16>() {
            Ok(p) if p != 0 => Ok(Self::Tcp {
                host: host.to_string(),
                port: p,
            }),
            _ => Err(EndpointError::InvalidPort(port.to_string())),
        }
    }

    pub fn from_config(config: &ManagementConfig) -> Result<Self, EndpointError> {
        Self::from_parts(&config.host, &config.port)
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Self::Unix(_))
    }

    /// The directory holding a Unix socket, which is a per-launch temp dir.
    pub fn socket_dir(&self) -> Option<&Path> {
        match self {
            Self::Unix(path) => path.parent().filter(|p| !p.as_os_str().is_empty()),
            Self::Tcp { .. } => None,
        }
    }
}

impl fmt::Display for ControlEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
        }
    }
}
