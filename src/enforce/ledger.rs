//! Persistent ban ledger.
//!
//! One SQLite row per ban action. The duplicate check before insert is
//! advisory; a partial unique index on `(ip_address) WHERE is_active = 1`
//! is what actually enforces at-most-one active ban per IP, so a racing
//! second writer degrades to a no-op instead of a double row.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use crate::{BanwatchError, BanwatchResult};

/// One row of the `banned_ip` table.
#[derive(Debug, Clone)]
pub struct BanRecord {
    pub id: i64,
    pub ip: String,
    pub jail: String,
    pub ban_time: DateTime<Utc>,
    pub unban_time: DateTime<Utc>,
    pub active: bool,
    pub reason: String,
}

/// Result of recording a ban.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new ledger row was written.
    Recorded,
    /// An active row already existed for this IP; nothing was written.
    AlreadyActive,
}

pub struct BanLedger {
    conn: Mutex<Connection>,
}

impl BanLedger {
    /// Open (creating if needed) the ledger database at `path`.
    pub fn open(path: &Path) -> BanwatchResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory ledger for tests.
    pub fn open_in_memory() -> BanwatchResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> BanwatchResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS banned_ip (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ip_address TEXT NOT NULL,
                jail TEXT NOT NULL,
                ban_time TEXT NOT NULL,
                unban_time TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                reason TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_banned_ip_one_active
                ON banned_ip(ip_address) WHERE is_active = 1;
            CREATE INDEX IF NOT EXISTS idx_banned_ip_address
                ON banned_ip(ip_address);

            CREATE TABLE IF NOT EXISTS fail2ban_jail (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                enabled INTEGER NOT NULL DEFAULT 1,
                port TEXT,
                protocol TEXT NOT NULL DEFAULT 'tcp',
                filter TEXT,
                log_path TEXT,
                max_retry INTEGER NOT NULL DEFAULT 5,
                find_time INTEGER NOT NULL DEFAULT 600,
                ban_time INTEGER NOT NULL DEFAULT 3600,
                action TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// True if the ledger holds an active ban for this IP.
    pub fn has_active_ban(&self, ip: &str) -> BanwatchResult<bool> {
        let conn = self.conn.lock().expect("ledger lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM banned_ip WHERE ip_address = ?1 AND is_active = 1",
            params![ip],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Record a ban. The advisory duplicate check plus the unique index
    /// guarantee at most one active row per IP under concurrent writers.
    pub fn record_ban(
        &self,
        ip: &str,
        jail: &str,
        reason: &str,
        ban_time: DateTime<Utc>,
        unban_time: DateTime<Utc>,
    ) -> BanwatchResult<RecordOutcome> {
        if self.has_active_ban(ip)? {
            return Ok(RecordOutcome::AlreadyActive);
        }
        let now = Utc::now();
        let conn = self.conn.lock().expect("ledger lock poisoned");
        let result = conn.execute(
            r#"INSERT INTO banned_ip
               (ip_address, jail, ban_time, unban_time, is_active, reason, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)"#,
            params![ip, jail, ban_time, unban_time, reason, now],
        );
        match result {
            Ok(_) => Ok(RecordOutcome::Recorded),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // Lost the race against another writer; same outcome.
                Ok(RecordOutcome::AlreadyActive)
            }
            Err(e) => Err(BanwatchError::Ledger(e)),
        }
    }

    /// Deactivate the active ban for an IP, if any.
    pub fn deactivate(&self, ip: &str) -> BanwatchResult<bool> {
        let conn = self.conn.lock().expect("ledger lock poisoned");
        let changed = conn.execute(
            "UPDATE banned_ip SET is_active = 0, updated_at = ?2
             WHERE ip_address = ?1 AND is_active = 1",
            params![ip, Utc::now()],
        )?;
        Ok(changed > 0)
    }

    /// Flip rows whose unban time has passed. Returns how many expired.
    pub fn deactivate_expired(&self, now: DateTime<Utc>) -> BanwatchResult<usize> {
        let conn = self.conn.lock().expect("ledger lock poisoned");
        let changed = conn.execute(
            "UPDATE banned_ip SET is_active = 0, updated_at = ?1
             WHERE is_active = 1 AND unban_time < ?1",
            params![now],
        )?;
        Ok(changed)
    }

    /// Every active ban, most recent first.
    pub fn active_bans(&self) -> BanwatchResult<Vec<BanRecord>> {
        let conn = self.conn.lock().expect("ledger lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, ip_address, jail, ban_time, unban_time, is_active, reason
             FROM banned_ip WHERE is_active = 1 ORDER BY ban_time DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BanRecord {
                id: row.get(0)?,
                ip: row.get(1)?,
                jail: row.get(2)?,
                ban_time: row.get(3)?,
                unban_time: row.get(4)?,
                active: row.get::<_, i64>(5)? != 0,
                reason: row.get(6)?,
            })
        })?;
        let mut bans = Vec::new();
        for row in rows {
            bans.push(row?);
        }
        Ok(bans)
    }

    /// (total rows, active rows) for status reporting.
    pub fn counts(&self) -> BanwatchResult<(u64, u64)> {
        let conn = self.conn.lock().expect("ledger lock poisoned");
        let total: i64 =
            conn.query_row("SELECT COUNT(*) FROM banned_ip", [], |row| row.get(0))?;
        let active: i64 = conn.query_row(
            "SELECT COUNT(*) FROM banned_ip WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok((total as u64, active as u64))
    }
}
