//! Synthetic log lines for dev mode.
//!
//! When the engine runs on a development machine there is no sshd under
//! attack and no production access log. Dev mode feeds the real parsers a
//! small scripted attack instead, stamped with the current time so the
//! records survive the 24 h sweep.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use chrono::Utc;

/// Synthetic sshd lines: a small brute-force burst plus one clean login.
pub fn ssh_lines() -> Vec<String> {
    let ts = Utc::now().format("%b %e %H:%M:%S");
    [
        "sshd[1234]: Failed password for admin from 203.0.113.61 port 40022 ssh2",
        "sshd[1235]: Failed password for root from 203.0.113.61 port 40024 ssh2",
        "sshd[1236]: Failed password for admin from 203.0.113.61 port 40026 ssh2",
        "sshd[1237]: Invalid user hacker from 198.51.100.23 port 51824",
        "sshd[1238]: Accepted password for deploy from 192.0.2.50 port 51000 ssh2",
        "sshd[1239]: Failed password for root from 198.51.100.23 port 51830 ssh2",
        "sshd[1240]: Received disconnect from 198.51.100.23 port 51830:11: Bye Bye [preauth]",
    ]
    .iter()
    .map(|rest| format!("{} devbox {}", ts, rest))
    .collect()
}

/// Synthetic access-log lines covering the common attack classes.
pub fn http_lines() -> Vec<String> {
    let ts = Utc::now().format("%d/%b/%Y:%H:%M:%S +0000");
    [
        r#"203.0.113.77 - - [{TS}] "GET / HTTP/1.1" 200 615 "-" "Mozilla/5.0""#,
        r#"203.0.113.77 - - [{TS}] "GET /?id=1' union select 1,2,3-- HTTP/1.1" 400 150 "-" "sqlmap/1.7""#,
        r#"198.51.100.44 - - [{TS}] "GET /wp-admin/setup-config.php HTTP/1.1" 404 162 "-" "zgrab/0.x""#,
        r#"198.51.100.44 - - [{TS}] "GET /wp-content/uploads/shell.php HTTP/1.1" 404 162 "-" "zgrab/0.x""#,
        r#"192.0.2.91 - - [{TS}] "GET /../../etc/passwd HTTP/1.1" 404 162 "-" "Mozilla/5.0""#,
        r#"192.0.2.91 - - [{TS}] "POST /login HTTP/1.1" 401 82 "-" "curl/8.0""#,
        r#"203.0.113.78 - - [{TS}] "CONNECT example.com:443 HTTP/1.1" 405 0 "-" "-""#,
        r#"203.0.113.78 - - [{TS}] "GET /boaform/admin/formlogin HTTP/1.1" 404 162 "-" "Mozilla/5.0""#,
    ]
    .iter()
    .map(|line| line.replace("{TS}", &ts.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sources::parse_line;
    use crate::EventSource;

    #[test]
    fn test_every_ssh_line_parses() {
        for line in ssh_lines() {
            assert!(
                parse_line(EventSource::Ssh, &line).is_some(),
                "unparsable dev line: {}",
                line,
            );
        }
    }

    #[test]
    fn test_every_http_line_parses() {
        for line in http_lines() {
            assert!(
                parse_line(EventSource::Http, &line).is_some(),
                "unparsable dev line: {}",
                line,
            );
        }
    }
}
