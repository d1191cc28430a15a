//! Threat registry: the shared IP -> [`ThreatRecord`] map.
//!
//! All mutation and snapshotting goes through one reader-writer lock. No
//! caller holds the lock across a file read, a backend invocation or a
//! ledger write; the lock only ever guards in-memory map work, so readers
//! wait at most one copy.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::classifier::Classification;
use crate::{Event, ThreatRecord};

/// Records older than this (by `last_seen`) are swept.
const RECORD_TTL_HOURS: i64 = 24;

pub struct ThreatRegistry {
    records: RwLock<HashMap<String, ThreatRecord>>,
}

impl ThreatRegistry {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Fold a classified event into the record for its IP, creating the
    /// record on first sight.
    pub fn ingest(&self, event: &Event, classification: &Classification) {
        let mut records = self.records.write().expect("registry lock poisoned");
        let record = records
            .entry(event.ip.clone())
            .or_insert_with(|| ThreatRecord::new(&event.ip, event.timestamp));
        record.register(
            event.source,
            &classification.tag,
            classification.weight,
            event.timestamp,
        );
    }

    /// Merge a pre-aggregated batch (whole-file analysis) into the registry.
    pub fn absorb(&self, batch: HashMap<String, ThreatRecord>) {
        let mut records = self.records.write().expect("registry lock poisoned");
        for (ip, incoming) in batch {
            match records.get_mut(&ip) {
                Some(existing) => existing.merge(&incoming),
                None => {
                    records.insert(ip, incoming);
                }
            }
        }
    }

    /// Evict records whose `last_seen` is older than the 24 h TTL.
    /// Idempotent; a later re-entry starts a fresh record.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(RECORD_TTL_HOURS);
        let mut records = self.records.write().expect("registry lock poisoned");
        let before = records.len();
        records.retain(|_, record| record.last_seen >= cutoff);
        before - records.len()
    }

    /// Deep copy of every record still inside the TTL window.
    pub fn snapshot(&self) -> HashMap<String, ThreatRecord> {
        let cutoff = Utc::now() - Duration::hours(RECORD_TTL_HOURS);
        let records = self.records.read().expect("registry lock poisoned");
        records
            .iter()
            .filter(|(_, record)| record.last_seen >= cutoff)
            .map(|(ip, record)| (ip.clone(), record.clone()))
            .collect()
    }

    /// Copy of a single record, if present.
    pub fn get(&self, ip: &str) -> Option<ThreatRecord> {
        let records = self.records.read().expect("registry lock poisoned");
        records.get(ip).cloned()
    }

    /// Mark an IP banned. Creates the record if the manual path raced a sweep.
    pub fn mark_banned(&self, ip: &str, auto: bool) {
        let mut records = self.records.write().expect("registry lock poisoned");
        let record = records
            .entry(ip.to_string())
            .or_insert_with(|| ThreatRecord::new(ip, Utc::now()));
        record.banned = true;
        record.auto_banned = auto;
    }

    /// Ensure a record exists for a manual ban and pin it to maximum score.
    pub fn pin_manual(&self, ip: &str) {
        let mut records = self.records.write().expect("registry lock poisoned");
        let record = records
            .entry(ip.to_string())
            .or_insert_with(|| ThreatRecord::new(ip, Utc::now()));
        record.last_seen = Utc::now();
        record.pin_max_score();
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ThreatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
