// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pluggable sink for handshake dumps.
//!
//! The consumer reports the outgoing websocket handshake request and the
//! response it received. Nothing else flows through this hook, and printing
//! never changes the outcome of a connection attempt.

use std::fmt::Write as _;

use tokio_tungstenite::tungstenite::http::HeaderMap;

use crate::http1::ResponseHead;

/// Placeholder written in place of credential values.
pub(crate) const PRIVATE_DATA_PLACEHOLDER: &str = "[PRIVATE DATA HIDDEN]";

/// Title used for the outgoing handshake dump.
pub const REQUEST_TITLE: &str = "WEBSOCKET REQUEST:";
/// Title used for the handshake response dump.
pub const RESPONSE_TITLE: &str = "WEBSOCKET RESPONSE:";

/// Receives a title and a formatted dump for each handshake request and response.
pub trait DebugPrinter: Send + Sync {
    fn print(&self, title: &str, dump: &str);
}

/// Default printer that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDebugPrinter;

impl DebugPrinter for NullDebugPrinter {
    fn print(&self, _title: &str, _dump: &str) {}
}

/// Printer forwarding dumps to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDebugPrinter;

impl DebugPrinter for TracingDebugPrinter {
    fn print(&self, title: &str, dump: &str) {
        tracing::debug!(title = %title, "{dump}");
    }
}

/// Formats the outgoing handshake the way it would appear on the wire.
///
/// The authorization value is replaced with a placeholder.
pub(crate) fn request_dump(path: &str, headers: &HeaderMap) -> String {
    let mut dump = format!("GET {path} HTTP/1.1\n");
    let pairs = headers
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_bytes()));
    for (name, display) in redact_headers(pairs) {
        let _ = writeln!(dump, "{name}: {display}");
    }
    dump
}

/// Formats the status line and headers of a handshake response.
pub(crate) fn response_dump(head: &ResponseHead) -> String {
    let mut dump = format!(
        "HTTP/1.{} {} {}\n",
        head.minor_version, head.status, head.reason
    );
    let pairs = head
        .headers
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_slice()));
    for (name, display) in redact_headers(pairs) {
        let _ = writeln!(dump, "{name}: {display}");
    }
    dump
}

/// Returns a redacted view of headers suitable for dumps and debug logging.
fn redact_headers<'a>(
    headers: impl IntoIterator<Item = (&'a str, &'a [u8])>,
) -> Vec<(String, String)> {
    const SENSITIVE_HEADERS: [&str; 3] = ["authorization", "proxy-authorization", "cookie"];

    headers
        .into_iter()
        .map(|(name, value)| {
            let lower = name.to_ascii_lowercase();
            let display = if SENSITIVE_HEADERS.contains(&lower.as_str()) {
                PRIVATE_DATA_PLACEHOLDER.to_string()
            } else {
                std::str::from_utf8(value)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| "<non-utf8>".to_string())
            };
            (canonical_name(&lower), display)
        })
        .collect()
}

/// Capitalises each dash-separated segment (`sec-websocket-key` → `Sec-Websocket-Key`).
fn canonical_name(lower: &str) -> String {
    lower
        .split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
