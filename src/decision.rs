//! Auto-ban decision rules.
//!
//! A pure function over a [`ThreatRecord`] snapshot. The rule set is closed:
//! high score, SSH brute force volume, attack diversity, or any of the
//! injection-class tags. Whitelist screening happens in the engine before a
//! record ever reaches enforcement; the rules here only look at the record.

use crate::ThreatRecord;

/// Tags that trigger an immediate ban on first sight.
const IMMEDIATE_BAN_TAGS: &[&str] = &["sql_injection", "xss", "path_traversal"];

/// Decide whether a record warrants an automatic ban.
///
/// Already-banned records are always skipped.
pub fn should_auto_ban(record: &ThreatRecord) -> bool {
    if record.banned {
        return false;
    }

    // 1. Score threshold.
    if record.score >= 80 {
        return true;
    }

    // 2. SSH brute force volume.
    if record.ssh_attempts >= 10 {
        return true;
    }

    // 3. Diverse attacker with substantial score.
    if record.attack_types.len() >= 3 && record.score >= 60 {
        return true;
    }

    // 4. Injection-class attacks ban on the first event.
    record
        .attack_types
        .iter()
        .any(|tag| IMMEDIATE_BAN_TAGS.contains(&tag.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventSource;
    use chrono::Utc;

    fn record() -> ThreatRecord {
        ThreatRecord::new("203.0.113.5", Utc::now())
    }

    #[test]
    fn test_high_score_bans() {
        let mut r = record();
        r.raise_score(80);
        assert!(should_auto_ban(&r));
    }

    #[test]
    fn test_score_just_below_threshold_does_not_ban() {
        let mut r = record();
        r.raise_score(79);
        assert!(!should_auto_ban(&r));
    }

    #[test]
    fn test_ssh_volume_bans() {
        let mut r = record();
        for _ in 0..10 {
            // Low per-event weight keeps the score below the score rule,
            // proving the volume rule fires on its own.
            r.register(EventSource::Ssh, "disconnect", 5, Utc::now());
        }
        assert!(r.score < 80);
        assert!(should_auto_ban(&r));
    }

    #[test]
    fn test_nine_ssh_attempts_do_not_ban() {
        let mut r = record();
        for _ in 0..9 {
            r.register(EventSource::Ssh, "disconnect", 5, Utc::now());
        }
        assert!(!should_auto_ban(&r));
    }

    #[test]
    fn test_diversity_with_score_bans() {
        let mut r = record();
        r.register(EventSource::Http, "wordpress_scan", 8, Utc::now());
        r.register(EventSource::Http, "directory_scan", 12, Utc::now());
        r.register(EventSource::Http, "malicious_bot", 15, Utc::now());
        r.register(EventSource::Http, "proxy_abuse", 7, Utc::now());
        r.register(EventSource::Http, "wordpress_file_access", 6, Utc::now());
        r.raise_score(15);
        assert!(r.score >= 60 && r.score < 80);
        assert!(r.attack_types.len() >= 3);
        assert!(should_auto_ban(&r));
    }

    #[test]
    fn test_diversity_without_score_does_not_ban() {
        let mut r = record();
        r.register(EventSource::Http, "wordpress_scan", 8, Utc::now());
        r.register(EventSource::Http, "php_file_scan", 5, Utc::now());
        r.register(EventSource::Http, "webdav_scan", 6, Utc::now());
        assert!(r.attack_types.len() >= 3);
        assert!(r.score < 60);
        assert!(!should_auto_ban(&r));
    }

    #[test]
    fn test_sql_injection_bans_on_single_event() {
        let mut r = record();
        r.register(EventSource::Http, "sql_injection", 25, Utc::now());
        assert_eq!(r.http_attempts, 1);
        assert!(should_auto_ban(&r));
    }

    #[test]
    fn test_xss_and_traversal_ban_immediately() {
        for tag in ["xss", "path_traversal"] {
            let mut r = record();
            r.register(EventSource::Http, tag, 20, Utc::now());
            assert!(should_auto_ban(&r), "tag {} should ban", tag);
        }
    }

    #[test]
    fn test_banned_record_is_always_skipped() {
        let mut r = record();
        r.raise_score(100);
        r.banned = true;
        assert!(!should_auto_ban(&r));
    }

    #[test]
    fn test_quiet_record_is_left_alone() {
        let mut r = record();
        r.register(EventSource::Http, "http_error", 5, Utc::now());
        assert!(!should_auto_ban(&r));
    }
}
