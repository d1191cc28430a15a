//! Parser for Nginx/Apache access log lines.
//!
//! Format: `IP - - [DD/Mon/YYYY:HH:MM:SS +ZZZZ] "METHOD /path HTTP/x.x" status size "referer" "user-agent"`
//!
//! Several format variants are tried in order; when everything fails, a
//! last-resort pattern salvages the leading dotted-quad so the source IP is
//! never lost to a mangled request line.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::{Event, EventSource};

// ---------------------------------------------------------------------------
// Compiled regexes, most specific first
// ---------------------------------------------------------------------------

/// Standard format with protocol, referer and user agent.
static RE_FULL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(\S+) \S+ \S+ \[([^\]]+)\] "(\S+) ([^"]*) [^"]*" (\d{3}) (\S+) "([^"]*)" "([^"]*)""#,
    )
    .expect("regex")
});

/// Combined variant anchored on the HTTP/ protocol token.
static RE_COMBINED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(\S+) - - \[([^\]]+)\] "([A-Z]+) ([^"]*) HTTP/[^"]*" (\d{3}) (\S+) "([^"]*)" "([^"]*)""#,
    )
    .expect("regex")
});

/// Common log format without referer or user agent.
static RE_COMMON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\S+) \S+ \S+ \[([^\]]+)\] "(\S+) ([^"]*)" (\d{3}) (\S+)"#).expect("regex")
});

/// Last resort: the leading dotted-quad.
static RE_LEADING_IP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+\.\d+\.\d+\.\d+)").expect("regex")
});

/// Parse one access-log line into an HTTP [`Event`].
pub fn parse_line(line: &str) -> Option<Event> {
    for re in [&*RE_FULL, &*RE_COMBINED, &*RE_COMMON] {
        if let Some(caps) = re.captures(line) {
            let ip = caps.get(1)?.as_str();
            let timestamp = parse_http_timestamp(caps.get(2)?.as_str()).unwrap_or_else(Utc::now);
            let method = caps.get(3)?.as_str();
            let url = caps.get(4)?.as_str();
            let status: u16 = caps.get(5)?.as_str().parse().ok()?;
            let user_agent = caps.get(8).map(|m| m.as_str().to_string());

            return Some(Event {
                timestamp,
                source: EventSource::Http,
                ip: ip.to_string(),
                user: None,
                method: Some(method.to_string()),
                url: Some(url.to_string()),
                status_code: Some(status),
                user_agent,
                raw_event_kind: "request".to_string(),
            });
        }
    }

    // Salvage the IP when the request line is too mangled for full parsing.
    let caps = RE_LEADING_IP.captures(line)?;
    Some(Event {
        timestamp: Utc::now(),
        source: EventSource::Http,
        ip: caps.get(1)?.as_str().to_string(),
        user: None,
        method: Some("GET".to_string()),
        url: Some("/".to_string()),
        status_code: Some(200),
        user_agent: None,
        raw_event_kind: "raw_ip".to_string(),
    })
}

/// Parse "02/Jan/2006:15:04:05 +0000" into UTC.
fn parse_http_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(ts, "%d/%b/%Y:%H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
