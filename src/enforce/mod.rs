//! Enforcement bridge.
//!
//! Turns a ban decision into backend invocations and a ledger row. The
//! backend is best-effort with partial failure: candidate jails are tried in
//! preference order and the first one that accepts the ban wins. A ban that
//! is already active in the ledger is a success, not an error.

pub mod backend;
pub mod ledger;

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::{BanwatchError, BanwatchResult, ThreatRecord};
use self::backend::BanBackend;
use self::ledger::{BanLedger, RecordOutcome};

/// SSH-bucket jails, in preference order.
const SSH_JAILS: &[&str] = &["sshd", "sshd-ddos"];

/// Preferred nginx jail; other nginx-named jails follow in discovery order.
const NGINX_PREFERRED_JAIL: &str = "nginx-http-auth";

/// Outcome of a ban request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanOutcome {
    /// The backend accepted the ban in this jail and a ledger row was written.
    Banned { jail: String },
    /// The ledger already held an active ban; nothing was invoked.
    AlreadyBanned,
}

pub struct EnforcementBridge {
    backend: Arc<dyn BanBackend>,
    ledger: Arc<BanLedger>,
    ban_duration: Duration,
}

impl EnforcementBridge {
    pub fn new(backend: Arc<dyn BanBackend>, ledger: Arc<BanLedger>, ban_duration: Duration) -> Self {
        Self {
            backend,
            ledger,
            ban_duration,
        }
    }

    pub fn ledger(&self) -> &BanLedger {
        &self.ledger
    }

    pub fn backend(&self) -> &dyn BanBackend {
        self.backend.as_ref()
    }

    /// Ban an IP for the decision engine.
    ///
    /// Tries the candidate jails for the record in preference order and
    /// stops at the first success.
    pub async fn auto_ban(&self, record: &ThreatRecord) -> BanwatchResult<BanOutcome> {
        if self.ledger.has_active_ban(&record.ip)? {
            log::info!("IP {} already has an active ban, skipping", record.ip);
            return Ok(BanOutcome::AlreadyBanned);
        }

        let available = self.backend.jails().await?;
        if available.is_empty() {
            return Err(BanwatchError::NoJailAvailable);
        }

        let candidates = candidate_jails(record, &available);
        let mut last_error = None;
        for jail in &candidates {
            match self.backend.ban(jail, &record.ip).await {
                Ok(()) => {
                    self.write_ledger_row(&record.ip, jail, &ban_reason(record))?;
                    return Ok(BanOutcome::Banned { jail: jail.clone() });
                }
                Err(e) => {
                    log::warn!("Ban of {} in jail {} failed: {}", record.ip, jail, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(BanwatchError::NoJailAvailable))
    }

    /// Ban an IP at an operator's request.
    ///
    /// Unlike the automatic path this fires every plausible jail (SSH and
    /// nginx buckets both) and reports success if at least one accepted.
    /// The ledger records the first jail that did.
    pub async fn manual_ban(&self, ip: &str, reason: &str) -> BanwatchResult<BanOutcome> {
        if self.ledger.has_active_ban(ip)? {
            log::info!("IP {} already has an active ban, skipping manual ban", ip);
            return Ok(BanOutcome::AlreadyBanned);
        }

        let available = self.backend.jails().await?;
        if available.is_empty() {
            return Err(BanwatchError::NoJailAvailable);
        }

        let mut plausible: Vec<String> = Vec::new();
        for jail in SSH_JAILS {
            if available.iter().any(|a| a == jail) {
                plausible.push(jail.to_string());
            }
        }
        for jail in &available {
            if jail.contains("nginx") && !plausible.contains(jail) {
                plausible.push(jail.clone());
            }
        }
        if plausible.is_empty() {
            plausible.push(available[0].clone());
        }

        let mut banned_jail: Option<String> = None;
        for jail in &plausible {
            match self.backend.ban(jail, ip).await {
                Ok(()) => {
                    if banned_jail.is_none() {
                        banned_jail = Some(jail.clone());
                    }
                }
                Err(e) => {
                    log::warn!("Manual ban of {} in jail {} failed: {}", ip, jail, e);
                }
            }
        }

        match banned_jail {
            Some(jail) => {
                self.write_ledger_row(ip, &jail, reason)?;
                Ok(BanOutcome::Banned { jail })
            }
            None => Err(BanwatchError::Backend(format!(
                "no jail accepted the manual ban of {}",
                ip
            ))),
        }
    }

    /// Lift a ban: backend unban in the recorded jail plus ledger flip.
    pub async fn unban(&self, ip: &str) -> BanwatchResult<bool> {
        let jail = self
            .ledger
            .active_bans()?
            .into_iter()
            .find(|ban| ban.ip == ip)
            .map(|ban| ban.jail);
        if let Some(jail) = &jail {
            if let Err(e) = self.backend.unban(jail, ip).await {
                log::warn!("Backend unban of {} from {} failed: {}", ip, jail, e);
            }
        }
        self.ledger.deactivate(ip)
    }

    fn write_ledger_row(&self, ip: &str, jail: &str, reason: &str) -> BanwatchResult<()> {
        let now = Utc::now();
        match self
            .ledger
            .record_ban(ip, jail, reason, now, now + self.ban_duration)?
        {
            RecordOutcome::Recorded => {
                log::info!("Recorded ban of {} via jail {} in ledger", ip, jail);
            }
            RecordOutcome::AlreadyActive => {
                log::info!("Ledger already holds an active ban for {}", ip);
            }
        }
        Ok(())
    }
}

/// Ordered candidate jails for an automatic ban.
///
/// SSH activity prefers the sshd jails, web activity the nginx jails; the
/// first jail the backend reports is the catch-all so a ban never dies for
/// lack of a perfectly matching jail.
fn candidate_jails(record: &ThreatRecord, available: &[String]) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    if record.ssh_attempts > 0 {
        for jail in SSH_JAILS {
            if available.iter().any(|a| a == jail) {
                candidates.push(jail.to_string());
            }
        }
    }

    if record.http_attempts > 0 {
        if available.iter().any(|a| a == NGINX_PREFERRED_JAIL) {
            candidates.push(NGINX_PREFERRED_JAIL.to_string());
        }
        for jail in available {
            if jail.contains("nginx") && !candidates.contains(jail) {
                candidates.push(jail.clone());
            }
        }
    }

    if !candidates.contains(&available[0]) {
        candidates.push(available[0].clone());
    }

    candidates
}

/// Human-readable reason for an automatic ban.
fn ban_reason(record: &ThreatRecord) -> String {
    format!(
        "threat score={}, ssh={}, http={}, types=[{}]",
        record.score,
        record.ssh_attempts,
        record.http_attempts,
        record.attack_types.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventSource;
    use super::backend::MockBackend;

    fn bridge_with(backend: MockBackend) -> (EnforcementBridge, Arc<BanLedger>) {
        let ledger = Arc::new(BanLedger::open_in_memory().unwrap());
        let bridge = EnforcementBridge::new(
            Arc::new(backend),
            ledger.clone(),
            Duration::hours(24),
        );
        (bridge, ledger)
    }

    fn ssh_record(ip: &str, attempts: u32) -> ThreatRecord {
        let mut record = ThreatRecord::new(ip, Utc::now());
        for _ in 0..attempts {
            record.register(EventSource::Ssh, "failed_password", 10, Utc::now());
        }
        record
    }

    fn http_record(ip: &str, tag: &str, weight: u32) -> ThreatRecord {
        let mut record = ThreatRecord::new(ip, Utc::now());
        record.register(EventSource::Http, tag, weight, Utc::now());
        record
    }

    #[tokio::test]
    async fn test_ssh_record_prefers_sshd_jail() {
        let (bridge, ledger) = bridge_with(MockBackend::new(&["nginx-http-auth", "sshd"]));
        let outcome = bridge.auto_ban(&ssh_record("203.0.113.5", 10)).await.unwrap();
        assert_eq!(outcome, BanOutcome::Banned { jail: "sshd".to_string() });

        let bans = ledger.active_bans().unwrap();
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].jail, "sshd");
        assert!(bans[0].reason.contains("ssh=10"));
    }

    #[tokio::test]
    async fn test_http_record_prefers_nginx_jail() {
        let (bridge, _) = bridge_with(MockBackend::new(&["sshd", "nginx-http-auth"]));
        let outcome = bridge
            .auto_ban(&http_record("203.0.113.6", "sql_injection", 25))
            .await
            .unwrap();
        assert_eq!(outcome, BanOutcome::Banned { jail: "nginx-http-auth".to_string() });
    }

    #[tokio::test]
    async fn test_ssh_ban_falls_back_to_nginx_jail() {
        // Backend reports only an nginx jail; the SSH attacker still gets
        // banned through the catch-all path.
        let (bridge, ledger) = bridge_with(MockBackend::new(&["nginx-http-auth"]));
        let outcome = bridge.auto_ban(&ssh_record("198.51.100.1", 10)).await.unwrap();
        assert_eq!(outcome, BanOutcome::Banned { jail: "nginx-http-auth".to_string() });
        assert_eq!(ledger.active_bans().unwrap()[0].jail, "nginx-http-auth");
    }

    #[tokio::test]
    async fn test_failed_jail_tries_next_candidate() {
        let backend = MockBackend::new(&["sshd", "sshd-ddos"]).with_failing_jail("sshd");
        let (bridge, _) = bridge_with(backend);
        let outcome = bridge.auto_ban(&ssh_record("203.0.113.7", 10)).await.unwrap();
        assert_eq!(outcome, BanOutcome::Banned { jail: "sshd-ddos".to_string() });
    }

    #[tokio::test]
    async fn test_no_jails_is_an_error_and_no_ledger_row() {
        let (bridge, ledger) = bridge_with(MockBackend::new(&[]));
        let err = bridge.auto_ban(&ssh_record("203.0.113.8", 10)).await.unwrap_err();
        assert!(matches!(err, BanwatchError::NoJailAvailable));
        assert!(ledger.active_bans().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_auto_ban_skips_backend() {
        let backend = MockBackend::new(&["sshd"]);
        let (bridge, _) = bridge_with(backend);
        let record = ssh_record("203.0.113.9", 10);

        bridge.auto_ban(&record).await.unwrap();
        let second = bridge.auto_ban(&record).await.unwrap();
        assert_eq!(second, BanOutcome::AlreadyBanned);

        // Exactly one backend invocation despite two ban requests.
        let calls = bridge
            .backend()
            .jail_status("sshd")
            .await
            .unwrap();
        assert_eq!(calls.currently_banned, 1);
    }

    #[tokio::test]
    async fn test_manual_ban_fires_every_plausible_jail() {
        let backend = MockBackend::new(&["sshd", "nginx-http-auth", "nginx-botsearch"]);
        let (bridge, ledger) = bridge_with(backend);
        let outcome = bridge.manual_ban("203.0.113.10", "operator request").await.unwrap();
        assert_eq!(outcome, BanOutcome::Banned { jail: "sshd".to_string() });

        // One ledger row even though three jails accepted.
        assert_eq!(ledger.active_bans().unwrap().len(), 1);

        let sshd = bridge.backend().jail_status("sshd").await.unwrap();
        let nginx = bridge.backend().jail_status("nginx-http-auth").await.unwrap();
        let bot = bridge.backend().jail_status("nginx-botsearch").await.unwrap();
        assert_eq!(sshd.currently_banned, 1);
        assert_eq!(nginx.currently_banned, 1);
        assert_eq!(bot.currently_banned, 1);
    }

    #[tokio::test]
    async fn test_manual_ban_aggregate_success_with_partial_failure() {
        let backend =
            MockBackend::new(&["sshd", "nginx-http-auth"]).with_failing_jail("sshd");
        let (bridge, ledger) = bridge_with(backend);
        let outcome = bridge.manual_ban("203.0.113.11", "operator request").await.unwrap();
        assert_eq!(outcome, BanOutcome::Banned { jail: "nginx-http-auth".to_string() });
        assert_eq!(ledger.active_bans().unwrap()[0].jail, "nginx-http-auth");
    }

    #[tokio::test]
    async fn test_manual_ban_all_jails_failing_is_an_error() {
        let backend = MockBackend::new(&["sshd"]).with_failing_jail("sshd");
        let (bridge, ledger) = bridge_with(backend);
        assert!(bridge.manual_ban("203.0.113.12", "operator request").await.is_err());
        assert!(ledger.active_bans().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unban_clears_ledger() {
        let (bridge, ledger) = bridge_with(MockBackend::new(&["sshd"]));
        bridge.auto_ban(&ssh_record("203.0.113.13", 10)).await.unwrap();
        assert!(bridge.unban("203.0.113.13").await.unwrap());
        assert!(!ledger.has_active_ban("203.0.113.13").unwrap());
    }

    #[test]
    fn test_candidate_order_ssh_then_nginx_then_first() {
        let available: Vec<String> = ["nginx-limit-req", "sshd", "nginx-http-auth"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut record = ssh_record("203.0.113.14", 1);
        record.register(EventSource::Http, "http_error", 5, Utc::now());

        let candidates = candidate_jails(&record, &available);
        assert_eq!(
            candidates,
            vec!["sshd", "nginx-http-auth", "nginx-limit-req"],
        );
    }

    #[test]
    fn test_ban_reason_format() {
        let mut record = ssh_record("203.0.113.15", 3);
        record.register(EventSource::Http, "sql_injection", 25, Utc::now());
        let reason = ban_reason(&record);
        assert!(reason.starts_with("threat score="));
        assert!(reason.contains("ssh=3"));
        assert!(reason.contains("http=1"));
        assert!(reason.contains("types=[failed_password, sql_injection]"));
    }
}
