//! Management protocol commands and response parsers.
//!
//! Parsers never fail on a single bad line: unparseable lines are logged at
//! debug level and skipped.

use std::fmt;

use serde::Serialize;
use tracing::debug;

/// Log messages with this prefix are the interface talking about itself.
pub const MANAGEMENT_PREFIX: &str = "MANAGEMENT";

/// Label of the download counter in `status` output.
pub const TUN_TAP_READ: &str = "TUN/TAP read bytes";

/// Label of the upload counter in `status` output.
pub const TUN_TAP_WRITE: &str = "TUN/TAP write bytes";

/// Signals sent to the daemon through the management interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Signal::Term => "SIGTERM",
        })
    }
}

/// Commands issued over the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    State,
    Status,
    /// Last `n` lines of the daemon's log ring buffer.
    Log(u32),
    Signal(Signal),
    Quit,
}

impl Command {
    /// Whether the daemon answers with an `END`-terminated block.
    pub fn expects_block(&self) -> bool {
        matches!(self, Command::State | Command::Status | Command::Log(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::State => f.write_str("state"),
            Command::Status => f.write_str("status"),
            Command::Log(n) => write!(f, "log {n}"),
            Command::Signal(sig) => write!(f, "signal {sig}"),
            Command::Quit => f.write_str("quit"),
        }
    }
}

/// Raw traffic counters as reported by `status`. Empty when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrafficStatus {
    pub download: String,
    pub upload: String,
}

/// Numeric traffic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrafficCounters {
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl TrafficStatus {
    /// Both counters as integers, if both are present and numeric.
    pub fn counters(&self) -> Option<TrafficCounters> {
        Some(TrafficCounters {
            bytes_received: self.download.trim().parse().ok()?,
            bytes_sent: self.upload.trim().parse().ok()?,
        })
    }
}

/// One line of the daemon's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
}

impl LogEntry {
    pub fn is_management_chatter(&self) -> bool {
        self.message.starts_with(MANAGEMENT_PREFIX)
    }
}

/// Status step of the last parseable `state` line.
///
/// Records have 8 or 9 comma-separated fields depending on the daemon
/// version; the status step is always the second. Later lines win.
pub fn parse_state(lines: &[String]) -> Option<String> {
    let mut step = None;
    for line in lines {
        let stripped = line.trim();
        if stripped == "END" {
            continue;
        }
        let parts: Vec<&str> = stripped.split(',').collect();
        if parts.len() < 5 {
            continue;
        }
        match parts.len() {
            8 | 9 => step = Some(parts[1].to_string()),
            _ => debug!(line = %line, "Could not parse state line"),
        }
    }
    step
}

/// TUN/TAP read and write byte counters from `status` output.
pub fn parse_status(lines: &[String]) -> TrafficStatus {
    let mut traffic = TrafficStatus::default();
    for line in lines {
        let stripped = line.trim();
        if stripped.ends_with("STATISTICS") || stripped == "END" {
            continue;
        }
        let Some((label, value)) = stripped.split_once(',') else {
            debug!(line = %line, "Could not parse status line");
            continue;
        };
        if value.contains(',') {
            debug!(line = %line, "Could not parse status line");
            continue;
        }
        match label {
            TUN_TAP_READ => traffic.download = value.to_string(),
            TUN_TAP_WRITE => traffic.upload = value.to_string(),
            _ => {}
        }
    }
    traffic
}

/// Split a `log` line into timestamp and message.
///
/// The second field holds flags; everything after it is the message, which
/// may itself contain commas.
pub fn parse_log_line(line: &str) -> Option<LogEntry> {
    let mut parts = line.splitn(3, ',');
    let (Some(timestamp), Some(_flags), Some(message)) = (parts.next(), parts.next(), parts.next())
    else {
        debug!(line = %line, "Could not parse log line");
        return None;
    };
    Some(LogEntry {
        timestamp: timestamp.to_string(),
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_command_wire_format() {
        assert_eq!(Command::State.to_string(), "state");
        assert_eq!(Command::Status.to_string(), "status");
        assert_eq!(Command::Log(20).to_string(), "log 20");
        assert_eq!(Command::Signal(Signal::Term).to_string(), "signal SIGTERM");
        assert_eq!(Command::Quit.to_string(), "quit");
        assert!(Command::Log(1).expects_block());
        assert!(!Command::Signal(Signal::Term).expects_block());
    }

    #[test]
    fn test_parse_state_nine_fields() {
        let out = lines(&["stats,CONNECTED,1,10.0.0.1,1.2.3.4,1194,0,0,0", "END"]);
        assert_eq!(parse_state(&out).as_deref(), Some("CONNECTED"));
    }

    #[test]
    fn test_parse_state_eight_fields() {
        let out = lines(&["1700000000,WAIT,,,,,,", "END"]);
        assert_eq!(parse_state(&out).as_deref(), Some("WAIT"));
    }

    #[test]
    fn test_parse_state_last_line_wins() {
        let out = lines(&[
            "1700000000,RECONNECTING,ping-restart,,,,,",
            "1700000005,CONNECTED,SUCCESS,10.8.0.2,1.2.3.4,1194,,,",
            "END",
        ]);
        assert_eq!(parse_state(&out).as_deref(), Some("CONNECTED"));
    }

    #[test]
    fn test_parse_state_skips_noise() {
        let out = lines(&[
            ">INFO:banner",
            "a,b,c",
            "1,TOO,MANY,FIELDS,x,x,x,x,x,x",
            "1700000000,EXITING,SIGTERM,,,,,,",
            "1,SIX,f,f,f,f",
        ]);
        assert_eq!(parse_state(&out).as_deref(), Some("EXITING"));
    }

    #[test]
    fn test_parse_state_nothing_parseable() {
        assert_eq!(parse_state(&lines(&["END"])), None);
        assert_eq!(parse_state(&[]), None);
    }

    #[test]
    fn test_parse_status_counters() {
        let out = lines(&["TUN/TAP read bytes,1000", "TUN/TAP write bytes,2000", "END"]);
        assert_eq!(
            parse_status(&out),
            TrafficStatus {
                download: "1000".to_string(),
                upload: "2000".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_status_full_block() {
        let out = lines(&[
            "OpenVPN STATISTICS",
            "Updated,Thu Jan  1 00:00:00 2026",
            "TUN/TAP read bytes,153789",
            "TUN/TAP write bytes,308764",
            "TCP/UDP read bytes,292806",
            "TCP/UDP write bytes,197558",
            "Auth read bytes,308788",
            "bogus line without comma",
            "a,b,c",
            "END",
        ]);
        let traffic = parse_status(&out);
        assert_eq!(traffic.download, "153789");
        assert_eq!(traffic.upload, "308764");
        assert_eq!(
            traffic.counters(),
            Some(TrafficCounters {
                bytes_received: 153789,
                bytes_sent: 308764,
            })
        );
    }

    #[test]
    fn test_parse_status_missing_counters() {
        let traffic = parse_status(&lines(&["OpenVPN STATISTICS", "END"]));
        assert_eq!(traffic, TrafficStatus::default());
        assert_eq!(traffic.counters(), None);
    }

    #[test]
    fn test_parse_log_line_keeps_commas_in_message() {
        let entry = parse_log_line("1700000000,I,Peer Connection Initiated with [AF_INET]1.2.3.4:1194, cipher AES").unwrap();
        assert_eq!(entry.timestamp, "1700000000");
        assert_eq!(
            entry.message,
            "Peer Connection Initiated with [AF_INET]1.2.3.4:1194, cipher AES"
        );
        assert!(!entry.is_management_chatter());
    }

    #[test]
    fn test_parse_log_line_management_chatter() {
        let entry = parse_log_line("1700000001,,MANAGEMENT: Client connected from /tmp/x").unwrap();
        assert_eq!(entry.message, "MANAGEMENT: Client connected from /tmp/x");
        assert!(entry.is_management_chatter());
    }

    #[test]
    fn test_parse_log_line_rejects_short_lines() {
        assert_eq!(parse_log_line("1700000000"), None);
        assert_eq!(parse_log_line("1700000000,I"), None);
    }
}
