//! The intelligent scan engine.
//!
//! Owns the registry, whitelist, source adapter and enforcement bridge, and
//! runs the three periodic drivers:
//!
//! - **scan** (default 5 min): tail each source, classify, ingest, sweep.
//! - **decision** (default 30 s): snapshot the registry, auto-ban qualifying
//!   records through the bridge.
//! - **analysis** (default 30 min): whole-file scan of the access log.
//!
//! All drivers share one watch-channel shutdown signal; `stop()` returns
//! only after every driver task has joined. The registry lock is never held
//! across a file read, a backend call or a ledger write.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::classifier::classify;
use crate::decision::should_auto_ban;
use crate::enforce::backend::BanBackend;
use crate::enforce::ledger::BanLedger;
use crate::enforce::{BanOutcome, EnforcementBridge};
use crate::log_sources::LogSourceAdapter;
use crate::registry::ThreatRegistry;
use crate::whitelist::Whitelist;
use crate::{
    BanwatchConfig, BanwatchError, BanwatchResult, EventSource, ScanResult, ThreatRecord,
    ThreatStats,
};

pub struct ScanEngine {
    config: BanwatchConfig,
    adapter: LogSourceAdapter,
    registry: ThreatRegistry,
    whitelist: Arc<Whitelist>,
    bridge: EnforcementBridge,
    shutdown: watch::Sender<bool>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    recent_bans: Mutex<Vec<(String, DateTime<Utc>)>>,
    backend_healthy: AtomicBool,
}

impl ScanEngine {
    pub fn new(
        config: BanwatchConfig,
        backend: Arc<dyn BanBackend>,
        ledger: Arc<BanLedger>,
    ) -> Arc<Self> {
        let adapter = LogSourceAdapter::new(&config.log_sources, config.backend.dev_mode);
        let bridge = EnforcementBridge::new(backend, ledger, config.ban_duration());
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            adapter,
            registry: ThreatRegistry::new(),
            whitelist: Arc::new(Whitelist::builtin()),
            bridge,
            shutdown,
            tasks: tokio::sync::Mutex::new(Vec::new()),
            recent_bans: Mutex::new(Vec::new()),
            backend_healthy: AtomicBool::new(true),
        })
    }

    pub fn config(&self) -> &BanwatchConfig {
        &self.config
    }

    pub fn bridge(&self) -> &EnforcementBridge {
        &self.bridge
    }

    /// Spawn the three periodic drivers.
    pub async fn start(self: &Arc<Self>) {
        self.check_backend_health().await;

        let mut tasks = self.tasks.lock().await;

        let engine = self.clone();
        tasks.push(tokio::spawn(async move { engine.run_scan_ticker().await }));

        let engine = self.clone();
        tasks.push(tokio::spawn(async move { engine.run_decision_ticker().await }));

        let engine = self.clone();
        tasks.push(tokio::spawn(async move { engine.run_analysis_ticker().await }));

        log::info!("Scan engine started (3 drivers)");
    }

    /// Signal shutdown and wait for every driver to finish its in-flight
    /// iteration and exit.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        log::info!("Scan engine stopped");
    }

    pub fn is_stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn run_scan_ticker(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = self.ticker(self.config.engine.scan_interval_secs);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.scan_cycle().await,
                _ = shutdown.changed() => break,
            }
        }
        log::info!("Scan driver stopped");
    }

    async fn run_decision_ticker(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = self.ticker(self.config.engine.decision_interval_secs);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.decision_cycle().await,
                _ = shutdown.changed() => break,
            }
        }
        log::info!("Decision driver stopped");
    }

    async fn run_analysis_ticker(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = self.ticker(self.config.engine.analysis_interval_secs);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.analysis_cycle().await,
                _ = shutdown.changed() => break,
            }
        }
        log::info!("Analysis driver stopped");
    }

    fn ticker(&self, period_secs: u64) -> tokio::time::Interval {
        let mut ticker = tokio::time::interval(Duration::from_secs(period_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    // -----------------------------------------------------------------------
    // Drivers
    // -----------------------------------------------------------------------

    /// One scan iteration: tail both sources, classify and ingest, then
    /// sweep stale records and expire old ledger rows.
    pub async fn scan_cycle(&self) {
        let mut ingested = 0usize;
        for source in [EventSource::Ssh, EventSource::Http] {
            let events = self.adapter.tail(source, self.config.engine.tail_lines);
            for event in &events {
                if self.whitelist.contains(&event.ip) {
                    continue;
                }
                if let Some(classification) = classify(event) {
                    self.registry.ingest(event, &classification);
                    ingested += 1;
                }
            }
        }

        let evicted = self.registry.sweep(Utc::now());
        match self.bridge.ledger().deactivate_expired(Utc::now()) {
            Ok(expired) if expired > 0 => {
                log::info!("Expired {} ledger bans", expired);
            }
            Ok(_) => {}
            Err(e) => log::error!("Ledger expiry sweep failed: {}", e),
        }

        log::info!(
            "Scan cycle done: {} events ingested, {} records evicted, {} IPs tracked",
            ingested,
            evicted,
            self.registry.len(),
        );
    }

    /// One decision iteration: walk the snapshot and push qualifying records
    /// through enforcement.
    pub async fn decision_cycle(&self) {
        self.check_backend_health().await;

        let snapshot = self.registry.snapshot();
        let mut banned = 0usize;
        let mut failed = 0usize;

        for (ip, record) in snapshot {
            if record.banned {
                continue;
            }
            if self.whitelist.contains(&ip) {
                log::info!("Skipping whitelisted IP {} (score {})", ip, record.score);
                continue;
            }
            if !should_auto_ban(&record) {
                continue;
            }

            match self.bridge.auto_ban(&record).await {
                Ok(BanOutcome::Banned { jail }) => {
                    self.registry.mark_banned(&ip, true);
                    self.note_ban(&ip);
                    banned += 1;
                    log::info!(
                        "Auto-banned {} via jail {} (score {}, ssh {}, http {})",
                        ip,
                        jail,
                        record.score,
                        record.ssh_attempts,
                        record.http_attempts,
                    );
                }
                Ok(BanOutcome::AlreadyBanned) => {
                    self.registry.mark_banned(&ip, true);
                }
                Err(e) => {
                    failed += 1;
                    log::error!("Auto-ban of {} failed: {}", ip, e);
                }
            }
        }

        if banned > 0 || failed > 0 {
            log::info!("Decision cycle done: {} banned, {} failed", banned, failed);
        }
    }

    /// Whole-file pass over the first existing access log.
    async fn analysis_cycle(&self) {
        let Some(path) = self.adapter.default_analysis_path() else {
            log::info!("No access log found for periodic analysis, skipping");
            return;
        };
        if let Err(e) = self.analyze_file(&path).await {
            log::warn!("Periodic analysis of {} failed: {}", path.display(), e);
        }
    }

    // -----------------------------------------------------------------------
    // Analysis
    // -----------------------------------------------------------------------

    /// Analyze an arbitrary access-log file and ban what qualifies.
    ///
    /// The file is aggregated into a standalone batch first (volume and
    /// diversity bonuses apply to the batch), then absorbed into the
    /// registry and run through the normal decision rules.
    pub async fn analyze_file(&self, path: &Path) -> BanwatchResult<()> {
        log::info!("Analyzing log file: {}", path.display());

        let scan = self.adapter.scan_file(path)?;
        let whitelist = self.whitelist.clone();
        let shutdown = self.shutdown.subscribe();

        let (mut batch, lines_read, dropped) =
            tokio::task::spawn_blocking(move || aggregate_scan(scan, &whitelist, &shutdown))
                .await
                .map_err(|e| BanwatchError::Parse(format!("analysis task died: {}", e)))??;

        for record in batch.values_mut() {
            apply_analysis_bonus(record);
        }

        log::info!(
            "Analyzed {}: {} lines, {} dropped, {} hostile IPs",
            path.display(),
            lines_read,
            dropped,
            batch.len(),
        );

        let ips: Vec<String> = batch.keys().cloned().collect();
        self.registry.absorb(batch);

        for ip in ips {
            let Some(record) = self.registry.get(&ip) else {
                continue;
            };
            if record.banned || !should_auto_ban(&record) {
                continue;
            }
            match self.bridge.auto_ban(&record).await {
                Ok(BanOutcome::Banned { jail }) => {
                    self.registry.mark_banned(&ip, true);
                    self.note_ban(&ip);
                    log::info!(
                        "Banned {} via jail {} from log analysis (types: [{}])",
                        ip,
                        jail,
                        record.attack_types.join(", "),
                    );
                }
                Ok(BanOutcome::AlreadyBanned) => {
                    self.registry.mark_banned(&ip, true);
                }
                Err(e) => {
                    log::error!("Ban of {} from log analysis failed: {}", ip, e);
                }
            }
        }

        Ok(())
    }

    /// Analyze the default access log, wherever it lives on this host.
    pub async fn analyze_access_log(&self) -> BanwatchResult<()> {
        match self.adapter.default_analysis_path() {
            Some(path) => self.analyze_file(&path).await,
            None => {
                log::info!("No access log found, skipping analysis");
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Manual ban
    // -----------------------------------------------------------------------

    /// Operator-requested ban of one IP.
    pub async fn manual_ban(&self, ip: &str, reason: &str) -> BanwatchResult<()> {
        if self.is_stopping() {
            return Err(BanwatchError::Cancelled);
        }
        if ip.is_empty() {
            return Err(BanwatchError::Config("ip must not be empty".to_string()));
        }
        if self.whitelist.contains(ip) {
            log::warn!("Refusing manual ban of whitelisted IP {}", ip);
            return Err(BanwatchError::Whitelisted(ip.to_string()));
        }

        self.registry.pin_manual(ip);

        match self.bridge.manual_ban(ip, reason).await? {
            BanOutcome::Banned { jail } => {
                self.registry.mark_banned(ip, false);
                self.note_ban(ip);
                log::info!("Manually banned {} via jail {} ({})", ip, jail, reason);
            }
            BanOutcome::AlreadyBanned => {
                self.registry.mark_banned(ip, false);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read APIs
    // -----------------------------------------------------------------------

    /// Deep copy of every live threat record.
    pub fn threats(&self) -> HashMap<String, ThreatRecord> {
        self.registry.snapshot()
    }

    /// Summary of the current scan state.
    pub fn scan_result(&self) -> ScanResult {
        let threats = self.registry.snapshot();
        let mut result = ScanResult {
            timestamp: Utc::now(),
            ssh_threats: Vec::new(),
            http_threats: Vec::new(),
            new_bans: self.bans_since(Utc::now() - ChronoDuration::seconds(
                self.config.engine.scan_interval_secs as i64,
            )),
            high_risk_ips: Vec::new(),
            recommended_actions: Vec::new(),
            total_threats: threats.len(),
        };

        for record in threats.values() {
            if record.ssh_attempts > 0 {
                result.ssh_threats.push(record.clone());
            }
            if record.http_attempts > 0 {
                result.http_threats.push(record.clone());
            }
            if record.score >= 80 {
                result.high_risk_ips.push(record.ip.clone());
            }
        }
        result.ssh_threats.sort_by(|a, b| b.score.cmp(&a.score).then(a.ip.cmp(&b.ip)));
        result.http_threats.sort_by(|a, b| b.score.cmp(&a.score).then(a.ip.cmp(&b.ip)));
        result.high_risk_ips.sort();

        result.recommended_actions = recommendations(&result);
        result
    }

    /// Aggregate counters for the stats endpoint.
    pub fn stats(&self) -> ThreatStats {
        let threats = self.registry.snapshot();
        let mut stats = ThreatStats::default();
        for record in threats.values() {
            stats.total_threats += 1;
            if record.auto_banned {
                stats.auto_banned += 1;
            }
            if record.ssh_attempts > 0 {
                stats.ssh_threats += 1;
            }
            if record.http_attempts > 0 {
                stats.http_threats += 1;
            }
            match record.score {
                80..=u8::MAX => stats.high_risk += 1,
                50..=79 => stats.medium_risk += 1,
                _ => stats.low_risk += 1,
            }
        }
        stats
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn note_ban(&self, ip: &str) {
        let mut bans = self.recent_bans.lock().expect("recent bans lock");
        let cutoff = Utc::now() - ChronoDuration::hours(24);
        bans.retain(|(_, at)| *at >= cutoff);
        bans.push((ip.to_string(), Utc::now()));
    }

    fn bans_since(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let bans = self.recent_bans.lock().expect("recent bans lock");
        bans.iter()
            .filter(|(_, at)| *at >= cutoff)
            .map(|(ip, _)| ip.clone())
            .collect()
    }

    /// Probe the backend and warn once per state change.
    async fn check_backend_health(&self) {
        let healthy = self.bridge.backend().ping().await.is_ok();
        let was = self.backend_healthy.swap(healthy, Ordering::SeqCst);
        if healthy && !was {
            log::info!("Banning backend is reachable again");
        } else if !healthy && was {
            log::warn!("Banning backend unreachable; bans will fail until it returns");
        }
    }
}

/// Aggregate a file scan into per-IP records, off the async runtime.
/// Cancellation is checked every 1000 lines.
fn aggregate_scan(
    scan: crate::log_sources::FileScan,
    whitelist: &Whitelist,
    shutdown: &watch::Receiver<bool>,
) -> BanwatchResult<(HashMap<String, ThreatRecord>, u64, u64)> {
    let mut batch: HashMap<String, ThreatRecord> = HashMap::new();
    let mut scan = scan;
    let mut processed = 0u64;
    while let Some(event) = scan.next() {
        processed += 1;
        if processed % 1000 == 0 && *shutdown.borrow() {
            return Err(BanwatchError::Cancelled);
        }
        if whitelist.contains(&event.ip) {
            continue;
        }
        let Some(classification) = classify(&event) else {
            continue;
        };
        batch
            .entry(event.ip.clone())
            .or_insert_with(|| ThreatRecord::new(&event.ip, event.timestamp))
            .register(event.source, &classification.tag, classification.weight, event.timestamp);
    }
    let lines = scan.lines_read();
    let dropped = scan.lines_dropped();
    Ok((batch, lines, dropped))
}

/// Volume and diversity bonus for a whole-file analysis batch.
fn apply_analysis_bonus(record: &mut ThreatRecord) {
    let volume = if record.http_attempts > 10 {
        10
    } else if record.http_attempts > 5 {
        5
    } else if record.http_attempts > 1 {
        2
    } else {
        0
    };
    let diversity = if record.attack_types.len() > 3 {
        8
    } else if record.attack_types.len() > 1 {
        4
    } else {
        0
    };
    if volume + diversity > 0 {
        record.raise_score(volume + diversity);
    }
}

/// Operator-facing suggestions derived from a scan result.
fn recommendations(result: &ScanResult) -> Vec<String> {
    let mut actions = Vec::new();
    if !result.high_risk_ips.is_empty() {
        actions.push("High-risk IPs detected, review them immediately".to_string());
    }
    if result.ssh_threats.len() > 5 {
        actions.push(
            "Frequent SSH attacks, consider moving the SSH port or enforcing key auth".to_string(),
        );
    }
    if result.http_threats.len() > 10 {
        actions.push("Heavy web attack traffic, consider a WAF or rate limiting".to_string());
    }
    if !result.new_bans.is_empty() {
        actions.push(format!("Auto-banned {} malicious IPs", result.new_bans.len()));
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_bonus_tiers() {
        let now = Utc::now();
        let mut record = ThreatRecord::new("203.0.113.5", now);
        for _ in 0..12 {
            record.register(EventSource::Http, "wordpress_scan", 0, now);
        }
        record.add_attack_type("php_file_scan");
        apply_analysis_bonus(&mut record);
        // 12 attempts -> +10, two tags -> +4
        assert_eq!(record.score, 14);
    }

    #[test]
    fn test_analysis_bonus_single_hit_is_zero() {
        let now = Utc::now();
        let mut record = ThreatRecord::new("203.0.113.5", now);
        record.register(EventSource::Http, "wordpress_scan", 0, now);
        apply_analysis_bonus(&mut record);
        assert_eq!(record.score, 0);
    }

    #[test]
    fn test_recommendations_mention_new_bans() {
        let result = ScanResult {
            timestamp: Utc::now(),
            ssh_threats: Vec::new(),
            http_threats: Vec::new(),
            new_bans: vec!["203.0.113.5".to_string(), "198.51.100.7".to_string()],
            high_risk_ips: vec!["203.0.113.5".to_string()],
            recommended_actions: Vec::new(),
            total_threats: 2,
        };
        let actions = recommendations(&result);
        assert!(actions.iter().any(|a| a.contains("High-risk")));
        assert!(actions.iter().any(|a| a.contains("Auto-banned 2")));
    }
}
