//! Attack classifier.
//!
//! Pure, stateless mapping from a normalized [`Event`] to an attack tag and
//! weight. SSH events map directly off their raw kind. HTTP events run an
//! ordered list of rule families, most specific first; when several families
//! match the same request the tags comma-join into a composite whose weight
//! is the sum of the components.
//!
//! The `http_error` fallback is deliberately lonely: it only fires when no
//! richer rule matched, and never joins a composite.

use crate::Event;
use crate::EventSource;

/// A classified event: one tag (possibly composite) and its weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub tag: String,
    pub weight: u32,
}

// ---------------------------------------------------------------------------
// Pattern tables
// ---------------------------------------------------------------------------

const PHP_SCAN_TARGETS: &[&str] = &[
    "config.php", "admin.php", "login.php", "test.php",
    "info.php", "shell.php", "upload.php", "index.php",
];

const SQLI_TOKENS: &[&str] = &[
    "union", "select", "insert", "delete", "drop", "alter", "'", "\"", "--", "/*",
];

const XSS_TOKENS: &[&str] = &[
    "<script", "javascript:", "onerror=", "onload=", "alert(", "document.cookie",
];

const SCANNER_AGENTS: &[&str] = &["xfa1", "zgrab", "masscan", "nmap", "nikto", "sqlmap"];

const BOT_AGENTS: &[&str] = &["bot", "crawler", "spider", "scraper", "scanner"];

const SCAN_STYLE_PATHS: &[&str] = &[
    ".php", ".asp", ".jsp", "admin", "login", "config", ".env", ".git",
];

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

const SSH_DEFAULT_WEIGHT: u32 = 8;
const HTTP_DEFAULT_WEIGHT: u32 = 10;

/// Baseline weight for a single (non-composite) tag.
pub fn tag_weight(tag: &str, source: EventSource) -> u32 {
    let known = match tag {
        // SSH taxonomy
        "failed_password" => Some(10),
        "invalid_user" => Some(15),
        "authentication_failure" => Some(12),
        "disconnect" => Some(5),
        // HTTP taxonomy
        "sql_injection" => Some(25),
        "xss" => Some(20),
        "path_traversal" => Some(20),
        "malicious_bot" => Some(15),
        "wordpress_exploitation" => Some(15),
        "admin_config_exploit" => Some(12),
        "router_exploit" => Some(12),
        "directory_scan" => Some(12),
        "router_admin_exploit" => Some(10),
        "auth_failure" => Some(10),
        "wordpress_scan" => Some(8),
        "admin_login_scan" => Some(8),
        "tomcat_manager_scan" => Some(8),
        "rate_limit" => Some(8),
        "proxy_abuse" => Some(7),
        "webdav_scan" => Some(6),
        "wordpress_file_access" => Some(6),
        "php_file_scan" => Some(5),
        "malicious_scanner" => Some(5),
        "http_error" => Some(5),
        _ => None,
    };
    known.unwrap_or(match source {
        EventSource::Ssh => SSH_DEFAULT_WEIGHT,
        EventSource::Http => HTTP_DEFAULT_WEIGHT,
    })
}

/// Classify an event. Returns `None` for benign traffic.
pub fn classify(event: &Event) -> Option<Classification> {
    match event.source {
        EventSource::Ssh => classify_ssh(event),
        EventSource::Http => classify_http(event),
    }
}

/// SSH classification is trivial: the raw kind is the tag. Successful logins
/// are not threats.
fn classify_ssh(event: &Event) -> Option<Classification> {
    let kind = event.raw_event_kind.as_str();
    if kind == "accepted_password" {
        return None;
    }
    Some(Classification {
        tag: kind.to_string(),
        weight: tag_weight(kind, EventSource::Ssh),
    })
}

/// HTTP classification: ordered rule families over lowercase URL, method and
/// user agent. Each family contributes at most one tag.
fn classify_http(event: &Event) -> Option<Classification> {
    let url = event.url.as_deref().unwrap_or("").to_lowercase();
    let method = event.method.as_deref().unwrap_or("").to_lowercase();
    let agent = event.user_agent.as_deref().unwrap_or("").to_lowercase();
    let status = event.status_code.unwrap_or(0);

    let mut tags: Vec<&str> = Vec::new();
    let push = |tags: &mut Vec<&str>, tag: &'static str| {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    };

    // 1. WordPress exploit endpoints
    if url.contains("/wp-admin/setup-config.php") {
        push(&mut tags, "wordpress_exploitation");
    }
    // 2. WordPress scan patterns
    if url.contains("/wordpress/wp-admin/") || url.contains("/wp-admin/") {
        push(&mut tags, "wordpress_scan");
    }
    // 3. WordPress content paths
    if url.contains("/wp-content/") || url.contains("/wp-includes/") {
        push(&mut tags, "wordpress_file_access");
    }
    // 4. Admin panel exploits
    if url.contains("/admin/config.php") {
        push(&mut tags, "admin_config_exploit");
    }
    if url.contains("/admin/login.php") || url.contains("login.asp") {
        push(&mut tags, "admin_login_scan");
    }
    if url.contains("/boaform/admin/formlogin") {
        push(&mut tags, "router_admin_exploit");
    }
    // 5. PHP file scan
    if url.contains(".php") {
        if PHP_SCAN_TARGETS.iter().any(|t| url.contains(t)) {
            push(&mut tags, "php_file_scan");
        } else {
            push(&mut tags, "php_access");
        }
    }
    // 6. Router / IoT endpoints
    if url.contains("/cgi-bin/luci/") {
        push(&mut tags, "router_exploit");
    }
    if url.contains("/manager/text/list") {
        push(&mut tags, "tomcat_manager_scan");
    }
    // 7. Proxy abuse
    if method == "connect" && url.contains(":443") {
        push(&mut tags, "proxy_abuse");
    }
    if method == "propfind" {
        push(&mut tags, "webdav_scan");
    }
    // 8. SQL injection tokens
    if SQLI_TOKENS.iter().any(|t| url.contains(t)) {
        push(&mut tags, "sql_injection");
    }
    // 9. XSS tokens
    if XSS_TOKENS.iter().any(|t| url.contains(t)) {
        push(&mut tags, "xss");
    }
    // 10. Path traversal
    if url.contains("../") || url.contains("..\\") {
        push(&mut tags, "path_traversal");
    }
    // 11/12. Suspicious user agents; scanners outrank generic bots
    if SCANNER_AGENTS.iter().any(|a| agent.contains(a)) {
        push(&mut tags, "malicious_scanner");
    } else if BOT_AGENTS.iter().any(|a| agent.contains(a)) {
        push(&mut tags, "malicious_bot");
    }
    // 13. Status-code heuristics
    match status {
        401 => push(&mut tags, "auth_failure"),
        429 => push(&mut tags, "rate_limit"),
        403 | 404 => {
            if SCAN_STYLE_PATHS.iter().any(|p| url.contains(p)) {
                push(&mut tags, "directory_scan");
            }
        }
        _ => {}
    }

    if tags.is_empty() {
        // Bare errors still count a little; never composite.
        if status >= 400 {
            return Some(Classification {
                tag: "http_error".to_string(),
                weight: tag_weight("http_error", EventSource::Http),
            });
        }
        return None;
    }

    let weight = tags
        .iter()
        .map(|t| tag_weight(t, EventSource::Http))
        .sum();
    Some(Classification {
        tag: tags.join(","),
        weight,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn http_event(method: &str, url: &str, status: u16, agent: &str) -> Event {
        Event {
            timestamp: Utc::now(),
            source: EventSource::Http,
            ip: "203.0.113.9".to_string(),
            user: None,
            method: Some(method.to_string()),
            url: Some(url.to_string()),
            status_code: Some(status),
            user_agent: Some(agent.to_string()),
            raw_event_kind: "request".to_string(),
        }
    }

    fn ssh_event(kind: &str) -> Event {
        Event {
            timestamp: Utc::now(),
            source: EventSource::Ssh,
            ip: "203.0.113.9".to_string(),
            user: Some("root".to_string()),
            method: None,
            url: None,
            status_code: None,
            user_agent: None,
            raw_event_kind: kind.to_string(),
        }
    }

    #[test]
    fn test_ssh_failed_password() {
        let c = classify(&ssh_event("failed_password")).unwrap();
        assert_eq!(c.tag, "failed_password");
        assert_eq!(c.weight, 10);
    }

    #[test]
    fn test_ssh_invalid_user_outweighs_failed_password() {
        let invalid = classify(&ssh_event("invalid_user")).unwrap();
        let failed = classify(&ssh_event("failed_password")).unwrap();
        assert_eq!(invalid.weight, 15);
        assert!(invalid.weight > failed.weight);
    }

    #[test]
    fn test_ssh_accepted_is_benign() {
        assert!(classify(&ssh_event("accepted_password")).is_none());
    }

    #[test]
    fn test_ssh_unknown_kind_gets_default_weight() {
        let c = classify(&ssh_event("kex_exchange_failure")).unwrap();
        assert_eq!(c.tag, "kex_exchange_failure");
        assert_eq!(c.weight, 8);
    }

    #[test]
    fn test_sql_injection() {
        let c = classify(&http_event("GET", "/x?id=1' union select 1,2--", 200, "Mozilla/5.0"))
            .unwrap();
        assert!(c.tag.contains("sql_injection"));
        assert!(c.weight >= 25);
    }

    #[test]
    fn test_xss() {
        let c = classify(&http_event("GET", "/q=<script>alert(1)</script>", 200, "Mozilla/5.0"))
            .unwrap();
        assert!(c.tag.contains("xss"));
    }

    #[test]
    fn test_path_traversal() {
        let c = classify(&http_event("GET", "/files?name=../../secrets", 200, "Mozilla/5.0"))
            .unwrap();
        assert!(c.tag.contains("path_traversal"));
    }

    #[test]
    fn test_wordpress_exploit_is_a_composite() {
        // setup-config.php also trips the wp-admin scan family and the
        // php scan family; the composite sums all three weights.
        let c = classify(&http_event(
            "GET",
            "/wp-admin/setup-config.php",
            404,
            "Mozilla/5.0",
        ))
        .unwrap();
        assert!(c.tag.starts_with("wordpress_exploitation"));
        assert!(c.tag.contains("wordpress_scan"));
        assert!(c.tag.contains("php_file_scan"));
        assert!(c.weight >= 15 + 8 + 5);
    }

    #[test]
    fn test_router_admin_exploit() {
        let c = classify(&http_event("POST", "/boaform/admin/formlogin", 404, "-")).unwrap();
        assert!(c.tag.contains("router_admin_exploit"));
    }

    #[test]
    fn test_proxy_abuse() {
        let c = classify(&http_event("CONNECT", "example.com:443", 405, "-")).unwrap();
        assert!(c.tag.contains("proxy_abuse"));
    }

    #[test]
    fn test_webdav_scan() {
        let c = classify(&http_event("PROPFIND", "/", 405, "-")).unwrap();
        assert!(c.tag.contains("webdav_scan"));
    }

    #[test]
    fn test_scanner_agent_beats_generic_bot() {
        let c = classify(&http_event("GET", "/", 200, "sqlmap/1.7")).unwrap();
        assert!(c.tag.contains("malicious_scanner"));
        assert!(!c.tag.contains("malicious_bot"));
    }

    #[test]
    fn test_generic_bot_agent() {
        let c = classify(&http_event("GET", "/", 200, "FancyCrawler/2.0")).unwrap();
        assert_eq!(c.tag, "malicious_bot");
        assert_eq!(c.weight, 15);
    }

    #[test]
    fn test_status_401_auth_failure() {
        let c = classify(&http_event("POST", "/", 401, "Mozilla/5.0")).unwrap();
        assert_eq!(c.tag, "auth_failure");
        assert_eq!(c.weight, 10);
    }

    #[test]
    fn test_status_429_rate_limit() {
        let c = classify(&http_event("GET", "/", 429, "Mozilla/5.0")).unwrap();
        assert_eq!(c.tag, "rate_limit");
    }

    #[test]
    fn test_404_with_scan_path_is_directory_scan() {
        let c = classify(&http_event("GET", "/secret/.git/head", 404, "Mozilla/5.0")).unwrap();
        assert!(c.tag.contains("directory_scan"));
    }

    #[test]
    fn test_bare_error_is_http_error_alone() {
        let c = classify(&http_event("GET", "/oops", 500, "Mozilla/5.0")).unwrap();
        assert_eq!(c.tag, "http_error");
        assert_eq!(c.weight, 5);
    }

    #[test]
    fn test_http_error_never_joins_composites() {
        // 404 on a scan-style path: directory_scan fires, http_error must not.
        let c = classify(&http_event("GET", "/admin", 404, "Mozilla/5.0")).unwrap();
        assert!(!c.tag.contains("http_error"));
    }

    #[test]
    fn test_benign_200_is_none() {
        assert!(classify(&http_event("GET", "/index.html", 200, "Mozilla/5.0")).is_none());
    }

    #[test]
    fn test_php_access_uses_http_default_weight() {
        let c = classify(&http_event("GET", "/app/view.php", 200, "Mozilla/5.0")).unwrap();
        assert_eq!(c.tag, "php_access");
        assert_eq!(c.weight, 10);
    }

    #[test]
    fn test_classifier_is_pure() {
        let event = http_event("GET", "/wp-admin/", 404, "zgrab/0.x");
        let a = classify(&event).unwrap();
        let b = classify(&event).unwrap();
        assert_eq!(a, b);
    }
}
