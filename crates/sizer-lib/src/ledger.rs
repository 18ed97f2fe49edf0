//! Append-only change ledger and idempotency guard
//!
//! The ledger is the engine's only shared mutable state. It is keyed by
//! resource id, so concurrent writers contend per key rather than on a
//! global lock. The guard half refuses to record two changes for the same
//! resource closer together than the cooldown window; that invariant lives
//! here, not in the storage format.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::TierCatalog;
use crate::error::LedgerError;
use crate::models::ChangeLedgerEntry;

/// Default cooldown between two changes to the same resource.
pub const DEFAULT_COOLDOWN_HOURS: i64 = 48;

/// Ledger behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Minimum hours between two recorded changes for one resource.
    pub cooldown_hours: i64,
    /// JSON-lines file to persist entries to. `None` keeps the ledger
    /// in memory only.
    pub persistence_path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cooldown_hours: DEFAULT_COOLDOWN_HOURS,
            persistence_path: None,
        }
    }
}

/// Append-only record of applied tier changes.
#[derive(Debug)]
pub struct ChangeLedger {
    entries: DashMap<String, Vec<ChangeLedgerEntry>>,
    config: LedgerConfig,
    /// Serializes whole-file rewrites; entry appends stay per-key.
    flush_lock: Mutex<()>,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            flush_lock: Mutex::new(()),
        }
    }

    /// Open a persistent ledger, loading any existing entries. A file
    /// that cannot be parsed is an error: silently starting fresh would
    /// disarm the idempotency guard.
    pub fn with_persistence(config: LedgerConfig) -> Result<Self, LedgerError> {
        let ledger = Self::with_config(config);
        if let Some(path) = ledger.config.persistence_path.clone() {
            if path.exists() {
                ledger.load_from(&path)?;
            }
        }
        Ok(ledger)
    }

    /// Whether the guard permits a change to `resource_id` at `now`.
    pub fn may_change(&self, resource_id: &str, now: DateTime<Utc>) -> bool {
        self.cooldown_remaining(resource_id, now).is_none()
    }

    /// Time left before `resource_id` may be changed again, if any.
    pub fn cooldown_remaining(
        &self,
        resource_id: &str,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let entries = self.entries.get(resource_id)?;
        let last = entries.last()?;
        let elapsed = now - last.timestamp;
        let window = self.cooldown();
        if elapsed < window {
            Some(window - elapsed)
        } else {
            None
        }
    }

    /// Append an entry, enforcing the spacing invariant for its resource.
    pub fn record(&self, entry: ChangeLedgerEntry) -> Result<(), LedgerError> {
        let window = self.cooldown();
        {
            let mut entries = self.entries.entry(entry.resource_id.clone()).or_default();
            if let Some(last) = entries.last() {
                let elapsed = entry.timestamp - last.timestamp;
                if elapsed < window {
                    return Err(LedgerError::CooldownViolation {
                        resource_id: entry.resource_id,
                        elapsed_minutes: elapsed.num_minutes(),
                        window_minutes: window.num_minutes(),
                    });
                }
            }
            debug!(
                event = "ledger_recorded",
                resource_id = %entry.resource_id,
                from_tier = %entry.from_tier,
                to_tier = %entry.to_tier,
                "Change recorded"
            );
            entries.push(entry);
        }

        if let Some(path) = self.config.persistence_path.clone() {
            self.save_to(&path)?;
        }
        Ok(())
    }

    /// Entries for one resource, oldest first.
    pub fn entries_for(&self, resource_id: &str) -> Vec<ChangeLedgerEntry> {
        self.entries
            .get(resource_id)
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Every entry in the ledger, ordered by timestamp.
    pub fn all_entries(&self) -> Vec<ChangeLedgerEntry> {
        let mut all: Vec<ChangeLedgerEntry> = self
            .entries
            .iter()
            .flat_map(|kv| kv.value().clone())
            .collect();
        all.sort_by_key(|e| e.timestamp);
        all
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|kv| kv.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Net monthly price delta realized by recorded changes since
    /// `since` (or ever). Downgrades contribute positively, upgrades
    /// negatively. Entries naming tiers no longer on the ladder are
    /// skipped.
    pub fn realized_savings(
        &self,
        catalog: &TierCatalog,
        since: Option<DateTime<Utc>>,
    ) -> f64 {
        self.all_entries()
            .iter()
            .filter(|e| since.map_or(true, |s| e.timestamp >= s))
            .filter_map(|e| {
                let from = catalog.by_name(&e.from_tier).ok()?;
                let to = catalog.by_name(&e.to_tier).ok()?;
                Some(from.price_monthly - to.price_monthly)
            })
            .sum()
    }

    fn cooldown(&self) -> Duration {
        Duration::hours(self.config.cooldown_hours)
    }

    fn load_from(&self, path: &Path) -> Result<(), LedgerError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut count = 0usize;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ChangeLedgerEntry = serde_json::from_str(&line)?;
            self.entries
                .entry(entry.resource_id.clone())
                .or_default()
                .push(entry);
            count += 1;
        }
        for mut kv in self.entries.iter_mut() {
            kv.value_mut().sort_by_key(|e| e.timestamp);
        }
        info!(
            event = "ledger_loaded",
            path = %path.display(),
            entries = count,
            "Loaded change ledger"
        );
        Ok(())
    }

    fn save_to(&self, path: &Path) -> Result<(), LedgerError> {
        let _guard = self
            .flush_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut lines = Vec::new();
        for entry in self.all_entries() {
            lines.push(serde_json::to_string(&entry)?);
        }

        let temp_path = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(lines.join("\n").as_bytes())?;
        if !lines.is_empty() {
            file.write_all(b"\n")?;
        }
        file.sync_all()?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Counts per resource, for run reporting.
    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            entries: self.len(),
            resources: self.entries.len(),
            per_resource: self
                .entries
                .iter()
                .map(|kv| (kv.key().clone(), kv.value().len()))
                .collect(),
        }
    }
}

impl Default for ChangeLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape of the ledger at a point in time.
#[derive(Debug, Clone)]
pub struct LedgerStats {
    pub entries: usize,
    pub resources: usize,
    pub per_resource: BTreeMap<String, usize>,
}
