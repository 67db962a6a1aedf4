//! Core Service Constants
//!
//! Tunable defaults for the detection -> correlation -> response -> audit
//! pipeline. Everything here can be overridden through `AppConfig`.

/// Maximum records retained per event stream (FIFO eviction past this).
pub const DEFAULT_STREAM_CAP: usize = 200;

/// Per-connection read timeout on a decoy socket (seconds).
pub const DECOY_READ_TIMEOUT_SECS: u64 = 2;

/// Maximum payload prefix sampled from an attacker connection (bytes).
pub const PAYLOAD_SAMPLE_BYTES: usize = 1024;

/// Payloads longer than this earn a severity bump.
pub const LONG_PAYLOAD_BYTES: usize = 100;

/// Integrity scan interval (seconds).
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 30;

/// Files above this size are skipped during directory walks (1 MiB).
pub const DEFAULT_SIZE_CEILING_BYTES: u64 = 1024 * 1024;

/// Chunk size for streaming file hashing.
pub const HASH_CHUNK_BYTES: usize = 8192;

/// Containment evaluation interval (seconds).
pub const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 5;

/// A (source IP, service) group must exceed this count to trigger stop-port.
pub const DEFAULT_PROBE_THRESHOLD: usize = 6;

/// Suffix of the companion backup consulted by rollback-file.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Forensics export interval (seconds).
pub const DEFAULT_EXPORT_INTERVAL_SECS: u64 = 300;
