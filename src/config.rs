//! Service Configuration
//!
//! Static configuration fixed at process start: the decoy service table,
//! the integrity watch list, stream caps, intervals and thresholds.
//! Can be loaded from a JSON file; there is no runtime reconfiguration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{LabError, Result};

// ============================================================================
// DECOY SERVICE TABLE
// ============================================================================

/// One emulated service: `{name, port, banner}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoyService {
    pub name: String,
    pub port: u16,
    pub banner: String,
}

impl DecoyService {
    pub fn new(name: &str, port: u16, banner: &str) -> Self {
        Self {
            name: name.to_string(),
            port,
            banner: banner.to_string(),
        }
    }
}

// ============================================================================
// APP CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Decoy services to emulate. Unprivileged ports by default.
    pub services: Vec<DecoyService>,
    /// Files and directories watched by the integrity engine.
    pub watch_paths: Vec<PathBuf>,
    /// Decoy file paths; a probe payload mentioning one gets tagged.
    #[serde(default)]
    pub decoy_files: Vec<String>,
    /// Root directory for event streams, the baseline DB and exports.
    pub data_dir: PathBuf,
    #[serde(default = "default_stream_cap")]
    pub stream_cap: usize,
    #[serde(default = "default_probe_threshold")]
    pub probe_threshold: usize,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_export_interval")]
    pub export_interval_secs: u64,
    #[serde(default = "default_size_ceiling")]
    pub size_ceiling_bytes: u64,
}

fn default_stream_cap() -> usize {
    DEFAULT_STREAM_CAP
}

fn default_probe_threshold() -> usize {
    DEFAULT_PROBE_THRESHOLD
}

fn default_scan_interval() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}

fn default_cycle_interval() -> u64 {
    DEFAULT_CYCLE_INTERVAL_SECS
}

fn default_export_interval() -> u64 {
    DEFAULT_EXPORT_INTERVAL_SECS
}

fn default_size_ceiling() -> u64 {
    DEFAULT_SIZE_CEILING_BYTES
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            services: vec![
                DecoyService::new("SSH", 2222, "SSH-2.0-OpenSSH_8.9p1 Debian-3"),
                DecoyService::new("HTTP", 8080, "HTTP/1.1 200 OK\r\nServer: Apache/2.4.52"),
                DecoyService::new("FTP", 2121, "220 (vsFTPd 3.0.3)"),
                DecoyService::new("MySQL", 33060, "5.7.37-0ubuntu0.18.04.1"),
            ],
            watch_paths: vec![],
            decoy_files: vec![
                "/tmp/fake_pass.txt".to_string(),
                "/tmp/fake_config.cfg".to_string(),
            ],
            data_dir: default_data_dir(),
            stream_cap: DEFAULT_STREAM_CAP,
            probe_threshold: DEFAULT_PROBE_THRESHOLD,
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            cycle_interval_secs: DEFAULT_CYCLE_INTERVAL_SECS,
            export_interval_secs: DEFAULT_EXPORT_INTERVAL_SECS,
            size_ceiling_bytes: DEFAULT_SIZE_CEILING_BYTES,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("snare-core")
}

impl AppConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| LabError::from_io(path, e))?;
        let config: AppConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn decoy_log_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("decoy_events.jsonl")
    }

    pub fn integrity_log_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("integrity_events.jsonl")
    }

    pub fn containment_log_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("containment_actions.jsonl")
    }

    pub fn baseline_db_path(&self) -> PathBuf {
        self.data_dir.join("baseline.db")
    }

    pub fn export_dir(&self) -> PathBuf {
        self.data_dir.join("forensics")
    }

    /// Service name -> port lookup table for the orchestrator.
    pub fn service_ports(&self) -> HashMap<String, u16> {
        self.services
            .iter()
            .map(|s| (s.name.clone(), s.port))
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
