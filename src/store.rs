//! Bounded Event Stream Store
//!
//! One JSONL file per subsystem, holding the most recent N records in
//! order. An append is a read-modify-write performed under an exclusive
//! lock scoped to the update, so concurrent decoy connections never lose
//! records. Readers outside this process (the dashboard) poll the same
//! file without coordination; a torn read there parses as corruption and
//! is treated as an empty window.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{LabError, Result};

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Storage capability injected into every component, so tests can run
/// against in-memory doubles instead of real files.
pub trait EventStore<T>: Send + Sync {
    /// Append one record, evicting the oldest past the window cap.
    fn append(&self, event: &T) -> Result<()>;

    /// Snapshot of the full current bounded window, oldest first.
    /// A missing or corrupt backing collection reads as empty.
    fn read_window(&self) -> Vec<T>;
}

// ============================================================================
// JSONL FILE STORE
// ============================================================================

/// File-backed store: one JSON record per line, capped to `cap` lines.
pub struct JsonlStore<T> {
    path: PathBuf,
    cap: usize,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonlStore<T> {
    pub fn open(path: &Path, cap: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LabError::Fatal(format!("cannot create {:?}: {}", parent, e)))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            cap,
            lock: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    /// Read the backing file as raw lines that parse as `T`. Malformed
    /// lines are dropped; an unreadable file is treated as empty.
    /// Callers must hold the store lock.
    fn load_lines(&self) -> Vec<String> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::warn!("{}", LabError::from_io(&self.path, e));
                return Vec::new();
            }
        };

        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    log::warn!(
                        "{}",
                        LabError::Corruption {
                            path: self.path.clone(),
                            detail: e.to_string(),
                        }
                    );
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(_) => lines.push(line),
                Err(e) => log::warn!(
                    "{}",
                    LabError::Corruption {
                        path: self.path.clone(),
                        detail: format!("dropping malformed record: {}", e),
                    }
                ),
            }
        }
        lines
    }

    /// Rewrite the full window. Callers must hold the store lock.
    fn persist(&self, lines: &[String]) -> Result<()> {
        let file = File::create(&self.path).map_err(|e| LabError::from_io(&self.path, e))?;
        let mut writer = BufWriter::new(file);
        for line in lines {
            writer
                .write_all(line.as_bytes())
                .and_then(|_| writer.write_all(b"\n"))
                .map_err(|e| LabError::from_io(&self.path, e))?;
        }
        writer.flush().map_err(|e| LabError::from_io(&self.path, e))
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync> EventStore<T> for JsonlStore<T> {
    fn append(&self, event: &T) -> Result<()> {
        let _guard = self.lock.lock();
        let mut lines = self.load_lines();
        lines.push(serde_json::to_string(event)?);
        if lines.len() > self.cap {
            let excess = lines.len() - self.cap;
            lines.drain(..excess);
        }
        self.persist(&lines)
    }

    fn read_window(&self) -> Vec<T> {
        let _guard = self.lock.lock();
        self.load_lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

// ============================================================================
// IN-MEMORY DOUBLE (tests)
// ============================================================================

#[cfg(test)]
pub struct MemoryStore<T> {
    cap: usize,
    events: Mutex<Vec<T>>,
}

#[cfg(test)]
impl<T> MemoryStore<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            events: Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl<T: Clone + Send + Sync> EventStore<T> for MemoryStore<T> {
    fn append(&self, event: &T) -> Result<()> {
        let mut events = self.events.lock();
        events.push(event.clone());
        if events.len() > self.cap {
            let excess = events.len() - self.cap;
            events.drain(..excess);
        }
        Ok(())
    }

    fn read_window(&self) -> Vec<T> {
        self.events.lock().clone()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        seq: u64,
    }

    fn open_store(dir: &TempDir, cap: usize) -> JsonlStore<Record> {
        JsonlStore::open(&dir.path().join("events.jsonl"), cap).unwrap()
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 10);

        for seq in 0..3 {
            store.append(&Record { seq }).unwrap();
        }

        let window = store.read_window();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].seq, 0);
        assert_eq!(window[2].seq, 2);
    }

    #[test]
    fn test_fifo_eviction_at_cap() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, 3);

        for seq in 1..=5 {
            store.append(&Record { seq }).unwrap();
        }

        let window = store.read_window();
        assert_eq!(window.len(), 3);
        // Strictly FIFO: oldest dropped first.
        assert_eq!(
            window.iter().map(|r| r.seq).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
    }

    #[test]
    fn test_window_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");

        let store = JsonlStore::<Record>::open(&path, 10).unwrap();
        store.append(&Record { seq: 7 }).unwrap();
        drop(store);

        let reopened = JsonlStore::<Record>::open(&path, 10).unwrap();
        assert_eq!(reopened.read_window(), vec![Record { seq: 7 }]);
    }

    #[test]
    fn test_corrupt_lines_read_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "not json at all\n{\"seq\":1}\n{truncated").unwrap();

        let store = JsonlStore::<Record>::open(&path, 10).unwrap();
        let window = store.read_window();
        assert_eq!(window, vec![Record { seq: 1 }]);

        // The store stays usable and compacts out the garbage.
        store.append(&Record { seq: 2 }).unwrap();
        assert_eq!(store.read_window().len(), 2);
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&dir, 500));

        let mut handles = Vec::new();
        for t in 0..8u64 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..25 {
                    store.append(&Record { seq: t * 100 + i }).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // 200 appends under cap 500: every one must survive.
        assert_eq!(store.read_window().len(), 200);
    }

    #[test]
    fn test_memory_store_matches_file_semantics() {
        let store = MemoryStore::new(2);
        for seq in 1..=3 {
            store.append(&Record { seq }).unwrap();
        }
        assert_eq!(
            store.read_window().iter().map(|r| r.seq).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }
}
