//! Integrity Baseline Engine
//!
//! Periodically hashes an explicit watch set and keeps one baseline row
//! per path in SQLite. The baseline holds the most recently *observed*
//! hash, not a verified-good one: on drift the engine emits exactly one
//! `AnomalyEvent` and overwrites the stored hash with the new value.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use crate::constants::HASH_CHUNK_BYTES;
use crate::error::Result;
use crate::logic::events::AnomalyEvent;
use crate::store::EventStore;

// ============================================================================
// HASHING
// ============================================================================

/// Hex SHA-256 of a file, streamed in fixed-size chunks so large files are
/// never loaded whole.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; HASH_CHUNK_BYTES];
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ============================================================================
// BASELINE STORE
// ============================================================================

/// One row per watched path: the last observed content hash.
pub struct BaselineDb {
    conn: Mutex<Connection>,
}

impl BaselineDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS file_hashes (
                path TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                last_seen TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn lookup(&self, path: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let hash = conn
            .query_row(
                "SELECT hash FROM file_hashes WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    pub fn upsert(&self, path: &str, hash: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO file_hashes (path, hash, last_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET hash = excluded.hash, last_seen = excluded.last_seen",
            params![path, hash, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn entry_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM file_hashes", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// ============================================================================
// MONITOR
// ============================================================================

pub struct IntegrityMonitor {
    watch_paths: Vec<PathBuf>,
    size_ceiling: u64,
    baseline: BaselineDb,
    store: Arc<dyn EventStore<AnomalyEvent>>,
    /// Single-flight guard: a scan already running must not start again.
    scan_guard: Mutex<()>,
}

impl IntegrityMonitor {
    pub fn new(
        watch_paths: Vec<PathBuf>,
        size_ceiling: u64,
        baseline: BaselineDb,
        store: Arc<dyn EventStore<AnomalyEvent>>,
    ) -> Self {
        Self {
            watch_paths,
            size_ceiling,
            baseline,
            store,
            scan_guard: Mutex::new(()),
        }
    }

    pub fn baseline(&self) -> &BaselineDb {
        &self.baseline
    }

    /// Run one full scan over the watch set. Returns the number of anomaly
    /// events emitted, or `None` when a scan is already in flight.
    pub fn run_scan(&self) -> Option<usize> {
        let _guard = match self.scan_guard.try_lock() {
            Some(g) => g,
            None => {
                log::debug!("integrity scan already in progress, skipping");
                return None;
            }
        };

        let mut emitted = 0;
        for path in &self.watch_paths {
            self.scan_path(path, &mut emitted);
        }
        if emitted > 0 {
            log::warn!("integrity scan emitted {} anomaly event(s)", emitted);
        } else {
            log::debug!("integrity scan clean");
        }
        Some(emitted)
    }

    fn scan_path(&self, path: &Path, emitted: &mut usize) {
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            // Vanished or unreadable targets are skipped, not fatal.
            Err(e) => {
                log::debug!("skipping {:?}: {}", path, e);
                return;
            }
        };

        if meta.is_dir() {
            let entries = match std::fs::read_dir(path) {
                Ok(entries) => entries,
                Err(e) => {
                    log::debug!("cannot walk {:?}: {}", path, e);
                    return;
                }
            };
            for entry in entries.flatten() {
                self.scan_path(&entry.path(), emitted);
            }
            return;
        }

        // Oversized files are excluded to bound scan cost.
        if meta.len() > self.size_ceiling {
            log::debug!("skipping oversized file {:?} ({} bytes)", path, meta.len());
            return;
        }

        self.check_file(path, emitted);
    }

    fn check_file(&self, path: &Path, emitted: &mut usize) {
        let current = match hash_file(path) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("hashing {:?} failed: {}", path, e);
                return;
            }
        };
        let key = path.to_string_lossy();

        let previous = match self.baseline.lookup(&key) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("baseline lookup for {:?} failed: {}", path, e);
                return;
            }
        };

        match previous {
            // First observation: record a baseline, no event.
            None => {
                if let Err(e) = self.baseline.upsert(&key, &current) {
                    log::warn!("baseline insert for {:?} failed: {}", path, e);
                }
            }
            Some(prev) if prev != current => {
                log::warn!("file tampering detected: {:?}", path);
                let event = AnomalyEvent::drift(&key, prev, current.clone());
                if let Err(e) = self.store.append(&event) {
                    log::error!("failed to record anomaly for {:?}: {}", path, e);
                }
                if let Err(e) = self.baseline.upsert(&key, &current) {
                    log::warn!("baseline update for {:?} failed: {}", path, e);
                }
                *emitted += 1;
            }
            Some(_) => {}
        }
    }
}

/// Periodic scan loop. The startup scan is run synchronously by the caller
/// before this loop is spawned.
pub async fn run_loop(
    monitor: Arc<IntegrityMonitor>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = Duration::from_secs(interval_secs);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                log::info!("integrity monitor shutting down");
                break;
            }
            _ = ticker.tick() => {
                let monitor = monitor.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || monitor.run_scan()).await {
                    log::error!("integrity scan task panicked: {}", e);
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
