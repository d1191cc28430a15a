//! Parser for sshd lines in `/var/log/auth.log` (or `/var/log/secure`).
//!
//! Recognizes failed password, accepted password, invalid user and
//! received-disconnect events. Timestamps are syslog-short (`Mon D HH:MM:SS`)
//! with no year; the current year is assumed, which mis-dates December lines
//! read in January by one year. The 24 h threat TTL makes that harmless.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::{Event, EventSource};

// ---------------------------------------------------------------------------
// Compiled regexes (compiled once, used forever)
// ---------------------------------------------------------------------------

/// "Failed password for [invalid user] <user> from <ip> port <port> ssh2"
static RE_FAILED_PASSWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Failed password for (?:invalid user )?(\S+) from (\d+\.\d+\.\d+\.\d+)")
        .expect("regex")
});

/// "Accepted password for <user> from <ip> port <port> ssh2"
static RE_ACCEPTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Accepted password for (\S+) from (\d+\.\d+\.\d+\.\d+)").expect("regex")
});

/// "Invalid user <user> from <ip> port <port>"
static RE_INVALID_USER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Invalid user (\S+) from (\d+\.\d+\.\d+\.\d+)").expect("regex")
});

/// "Received disconnect from <ip> port <port>: ..."
static RE_DISCONNECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Received disconnect from (\d+\.\d+\.\d+\.\d+)").expect("regex")
});

/// Parse one auth-log line into an SSH [`Event`].
///
/// Returns `None` for lines that match no recognized sshd pattern.
pub fn parse_line(line: &str) -> Option<Event> {
    // Quick reject: every pattern we care about comes from sshd.
    if !line.contains("sshd") {
        return None;
    }

    let timestamp = parse_syslog_timestamp(line).unwrap_or_else(Utc::now);

    // Failed password first: the "invalid user" variant would otherwise be
    // swallowed by the bare invalid-user pattern below.
    if let Some(caps) = RE_FAILED_PASSWORD.captures(line) {
        return Some(ssh_event(
            timestamp,
            caps.get(2)?.as_str(),
            Some(caps.get(1)?.as_str()),
            "failed_password",
        ));
    }

    if let Some(caps) = RE_ACCEPTED.captures(line) {
        return Some(ssh_event(
            timestamp,
            caps.get(2)?.as_str(),
            Some(caps.get(1)?.as_str()),
            "accepted_password",
        ));
    }

    if let Some(caps) = RE_INVALID_USER.captures(line) {
        return Some(ssh_event(
            timestamp,
            caps.get(2)?.as_str(),
            Some(caps.get(1)?.as_str()),
            "invalid_user",
        ));
    }

    if let Some(caps) = RE_DISCONNECT.captures(line) {
        return Some(ssh_event(timestamp, caps.get(1)?.as_str(), None, "disconnect"));
    }

    None
}

fn ssh_event(
    timestamp: DateTime<Utc>,
    ip: &str,
    user: Option<&str>,
    kind: &str,
) -> Event {
    Event {
        timestamp,
        source: EventSource::Ssh,
        ip: ip.to_string(),
        user: user.map(str::to_string),
        method: None,
        url: None,
        status_code: None,
        user_agent: None,
        raw_event_kind: kind.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Timestamp parsing
// ---------------------------------------------------------------------------

/// Parse the leading "Mon D HH:MM:SS" syslog header of a line.
fn parse_syslog_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let mut fields = line.split_whitespace();
    let month = fields.next()?;
    let day = fields.next()?;
    let time = fields.next()?;

    let month_num = match month {
        "Jan" => 1, "Feb" => 2, "Mar" => 3, "Apr" => 4,
        "May" => 5, "Jun" => 6, "Jul" => 7, "Aug" => 8,
        "Sep" => 9, "Oct" => 10, "Nov" => 11, "Dec" => 12,
        _ => return None,
    };
    let year = Utc::now().year();
    let day_num: u32 = day.parse().ok()?;
    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hour: u32 = parts[0].parse().ok()?;
    let minute: u32 = parts[1].parse().ok()?;
    let second: u32 = parts[2].parse().ok()?;
    let naive = NaiveDateTime::new(
        chrono::NaiveDate::from_ymd_opt(year, month_num, day_num)?,
        chrono::NaiveTime::from_hms_opt(hour, minute, second)?,
    );
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_password() {
        let line = "Jan  5 14:23:01 webserver sshd[12345]: Failed password for admin from 203.0.113.100 port 54321 ssh2";
        let event = parse_line(line).expect("should parse");
        assert_eq!(event.source, EventSource::Ssh);
        assert_eq!(event.raw_event_kind, "failed_password");
        assert_eq!(event.ip, "203.0.113.100");
        assert_eq!(event.user.as_deref(), Some("admin"));
        assert_eq!(event.timestamp.month(), 1);
        assert_eq!(event.timestamp.day(), 5);
    }

    #[test]
    fn test_failed_password_invalid_user_variant() {
        let line = "Feb 12 03:44:55 prod sshd[9999]: Failed password for invalid user oracle from 198.51.100.5 port 22222 ssh2";
        let event = parse_line(line).expect("should parse");
        assert_eq!(event.raw_event_kind, "failed_password");
        assert_eq!(event.user.as_deref(), Some("oracle"));
    }

    #[test]
    fn test_accepted_password() {
        let line = "Mar  1 08:00:00 bastion sshd[1111]: Accepted password for deploy from 203.0.113.50 port 60000 ssh2";
        let event = parse_line(line).expect("should parse");
        assert_eq!(event.raw_event_kind, "accepted_password");
        assert_eq!(event.user.as_deref(), Some("deploy"));
    }

    #[test]
    fn test_invalid_user() {
        let line = "May 20 16:45:30 firewall sshd[3333]: Invalid user testuser from 203.0.113.50 port 12345";
        let event = parse_line(line).expect("should parse");
        assert_eq!(event.raw_event_kind, "invalid_user");
        assert_eq!(event.user.as_deref(), Some("testuser"));
    }

    #[test]
    fn test_received_disconnect() {
        let line = "Jun 10 02:15:00 mail sshd[4444]: Received disconnect from 45.33.22.11 port 55555:11: Bye Bye [preauth]";
        let event = parse_line(line).expect("should parse");
        assert_eq!(event.raw_event_kind, "disconnect");
        assert_eq!(event.ip, "45.33.22.11");
        assert!(event.user.is_none());
    }

    #[test]
    fn test_non_ssh_line_returns_none() {
        let line = "Nov  1 12:00:00 server kernel: [12345.678] eth0: link up";
        assert!(parse_line(line).is_none());
    }

    #[test]
    fn test_garbage_returns_none() {
        assert!(parse_line("").is_none());
        assert!(parse_line("not a log line at all").is_none());
        assert!(parse_line("sshd but no structure").is_none());
    }

    #[test]
    fn test_parsing_is_stable_across_calls() {
        let line = "Jul  3 11:00:00 db sshd[5555]: Failed password for root from 198.51.100.1 port 33333 ssh2";
        let a = parse_line(line).unwrap();
        let b = parse_line(line).unwrap();
        assert_eq!(a.ip, b.ip);
        assert_eq!(a.raw_event_kind, b.raw_event_kind);
        assert_eq!(a.timestamp, b.timestamp);
    }
}
