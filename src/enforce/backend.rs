//! Banning backend abstraction.
//!
//! The engine talks to fail2ban through a small verb set - ping, status,
//! banip/unbanip, version - so tests can swap in a mock. The real client
//! shells out to `fail2ban-client`, optionally through sudo; the choice is
//! probed once at startup. Every invocation carries a 5 second timeout so a
//! hung backend cannot pin a driver.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;

use crate::{BackendConfig, BanwatchError, BanwatchResult};

/// Per-invocation timeout for the external client.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed `status <jail>` output.
#[derive(Debug, Clone, Default)]
pub struct JailStatus {
    /// "Currently banned: N"
    pub currently_banned: u32,

    /// "Banned IP list: ip1 ip2 ..."
    pub banned_ips: Vec<String>,

    /// Every other key/value line, verbatim.
    pub fields: HashMap<String, String>,
}

/// The verbs the engine needs from a banning backend.
#[async_trait]
pub trait BanBackend: Send + Sync {
    /// Health check.
    async fn ping(&self) -> BanwatchResult<()>;

    /// Names of the jails the backend currently runs.
    async fn jails(&self) -> BanwatchResult<Vec<String>>;

    /// Detailed status for one jail.
    async fn jail_status(&self, jail: &str) -> BanwatchResult<JailStatus>;

    /// Ban an IP in a jail.
    async fn ban(&self, jail: &str, ip: &str) -> BanwatchResult<()>;

    /// Lift a ban.
    async fn unban(&self, jail: &str, ip: &str) -> BanwatchResult<()>;

    /// Backend version string.
    async fn version(&self) -> BanwatchResult<String>;
}

// ---------------------------------------------------------------------------
// fail2ban-client
// ---------------------------------------------------------------------------

/// Real backend: shells out to `fail2ban-client`.
pub struct Fail2banClient {
    use_sudo: bool,
}

impl Fail2banClient {
    /// Decide once whether invocations need sudo, by probing a direct ping.
    pub async fn probe(config: &BackendConfig) -> Self {
        if config.force_sudo {
            log::info!("fail2ban-client will use sudo (forced by config)");
            return Self { use_sudo: true };
        }

        if config.socket_path.exists() {
            let direct = Self { use_sudo: false };
            if direct.ping().await.is_ok() {
                log::info!("fail2ban-client reachable with direct privileges");
                return direct;
            }
        }

        log::info!("fail2ban-client will use sudo for privileged operations");
        log::warn!("Make sure this user has sudo access to fail2ban-client");
        Self { use_sudo: true }
    }

    pub fn use_sudo(&self) -> bool {
        self.use_sudo
    }

    /// Run one fail2ban-client invocation and return stdout.
    async fn exec(&self, args: &[&str]) -> BanwatchResult<String> {
        let mut cmd = if self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg("fail2ban-client");
            c
        } else {
            Command::new("fail2ban-client")
        };
        cmd.args(args).kill_on_drop(true);

        log::debug!("Executing fail2ban-client {:?} (sudo: {})", args, self.use_sudo);

        let output = tokio::time::timeout(COMMAND_TIMEOUT, cmd.output())
            .await
            .map_err(|_| {
                BanwatchError::Backend(format!(
                    "fail2ban-client {:?} timed out after {:?}",
                    args, COMMAND_TIMEOUT,
                ))
            })?
            .map_err(|e| {
                BanwatchError::BackendUnavailable(format!(
                    "cannot execute fail2ban-client: {}",
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BanwatchError::Backend(format!(
                "fail2ban-client {:?} failed: {}",
                args,
                stderr.trim(),
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl BanBackend for Fail2banClient {
    async fn ping(&self) -> BanwatchResult<()> {
        self.exec(&["ping"]).await.map(|_| ())
    }

    async fn jails(&self) -> BanwatchResult<Vec<String>> {
        let output = self.exec(&["status"]).await?;
        Ok(parse_jail_list(&output))
    }

    async fn jail_status(&self, jail: &str) -> BanwatchResult<JailStatus> {
        let output = self.exec(&["status", jail]).await?;
        Ok(parse_jail_status(&output))
    }

    async fn ban(&self, jail: &str, ip: &str) -> BanwatchResult<()> {
        self.exec(&["set", jail, "banip", ip]).await?;
        log::info!("Banned {} in jail {}", ip, jail);
        Ok(())
    }

    async fn unban(&self, jail: &str, ip: &str) -> BanwatchResult<()> {
        self.exec(&["set", jail, "unbanip", ip]).await?;
        log::info!("Unbanned {} from jail {}", ip, jail);
        Ok(())
    }

    async fn version(&self) -> BanwatchResult<String> {
        Ok(self.exec(&["version"]).await?.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Extract jail names from the "Jail list:" line of `status` output.
fn parse_jail_list(output: &str) -> Vec<String> {
    for line in output.lines() {
        let line = clean_status_line(line);
        if let Some(rest) = line.strip_prefix("Jail list:") {
            return rest
                .split(',')
                .map(|jail| jail.trim().to_string())
                .filter(|jail| !jail.is_empty())
                .collect();
        }
    }
    Vec::new()
}

/// Parse a `status <jail>` key/value block.
fn parse_jail_status(output: &str) -> JailStatus {
    let mut status = JailStatus::default();
    for line in output.lines() {
        let line = clean_status_line(line);
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "Currently banned" => {
                status.currently_banned = value.parse().unwrap_or(0);
            }
            "Banned IP list" => {
                status.banned_ips = value
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
            }
            _ => {
                status.fields.insert(key.to_string(), value.to_string());
            }
        }
    }
    status
}

/// Strip the box-drawing gutter fail2ban-client puts in front of each line.
fn clean_status_line(line: &str) -> &str {
    line.trim_start_matches([' ', '\t', '|', '`', '-']).trim_end()
}

// ---------------------------------------------------------------------------
// Mock backend for tests
// ---------------------------------------------------------------------------

/// In-memory test double for [`BanBackend`].
///
/// Reports a configurable jail list, records every ban call, and can be told
/// to reject bans for specific jails to exercise the fail-over path.
pub struct MockBackend {
    jails: Vec<String>,
    reachable: bool,
    failing_jails: Vec<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockBackend {
    pub fn new(jails: &[&str]) -> Self {
        Self {
            jails: jails.iter().map(|s| s.to_string()).collect(),
            reachable: true,
            failing_jails: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        let mut backend = Self::new(&[]);
        backend.reachable = false;
        backend
    }

    /// Every `ban` against this jail will fail.
    pub fn with_failing_jail(mut self, jail: &str) -> Self {
        self.failing_jails.push(jail.to_string());
        self
    }

    /// All `(jail, ip)` pairs for which `ban` succeeded, in call order.
    pub fn ban_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl BanBackend for MockBackend {
    async fn ping(&self) -> BanwatchResult<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(BanwatchError::BackendUnavailable("mock is down".into()))
        }
    }

    async fn jails(&self) -> BanwatchResult<Vec<String>> {
        if !self.reachable {
            return Err(BanwatchError::BackendUnavailable("mock is down".into()));
        }
        Ok(self.jails.clone())
    }

    async fn jail_status(&self, jail: &str) -> BanwatchResult<JailStatus> {
        let banned_ips: Vec<String> = self
            .calls
            .lock()
            .expect("mock lock")
            .iter()
            .filter(|(j, _)| j == jail)
            .map(|(_, ip)| ip.clone())
            .collect();
        Ok(JailStatus {
            currently_banned: banned_ips.len() as u32,
            banned_ips,
            fields: HashMap::new(),
        })
    }

    async fn ban(&self, jail: &str, ip: &str) -> BanwatchResult<()> {
        if !self.reachable {
            return Err(BanwatchError::BackendUnavailable("mock is down".into()));
        }
        if self.failing_jails.iter().any(|j| j == jail) {
            return Err(BanwatchError::Backend(format!("jail {} rejected ban", jail)));
        }
        self.calls
            .lock()
            .expect("mock lock")
            .push((jail.to_string(), ip.to_string()));
        Ok(())
    }

    async fn unban(&self, jail: &str, ip: &str) -> BanwatchResult<()> {
        self.calls
            .lock()
            .expect("mock lock")
            .retain(|(j, i)| !(j == jail && i == ip));
        Ok(())
    }

    async fn version(&self) -> BanwatchResult<String> {
        Ok("mock-1.0".to_string())
    }
}
