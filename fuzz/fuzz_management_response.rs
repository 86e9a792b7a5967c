//! Fuzz target for management-interface response handling.
//!
//! Run with: cargo +nightly fuzz run fuzz_management_response
//!
//! Feeds arbitrary daemon output through block splitting and the
//! state/status/log parsers.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vpnwarden_core::channel::{TERMINATOR, split_response};
use vpnwarden_core::protocol::{parse_log_line, parse_state, parse_status};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Some(lines) = split_response(&raw, TERMINATOR) else {
        return;
    };
    let _ = parse_state(&lines);
    let _ = parse_status(&lines).counters();
    for line in &lines {
        let _ = parse_log_line(line);
    }
});
