//! Forensics Exporter
//!
//! Periodically merges all three event streams into one chronologically
//! ordered timeline, packages it into a zip archive and fingerprints the
//! archive bytes with SHA-256. The digest in the companion manifest is the
//! system's sole tamper evidence; there is no signing key.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::watch;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::error::{LabError, Result};
use crate::logic::events::{AnomalyEvent, ContainmentAction, ForensicsBundle, ProbeEvent};
use crate::logic::integrity::hash_file;
use crate::store::EventStore;

// ============================================================================
// TIMELINE MERGE
// ============================================================================

/// Unified sort key: the `timestamp` field, falling back to the original
/// wire format's numeric `time` epoch field, else the epoch itself.
fn sort_key(record: &Value) -> DateTime<Utc> {
    if let Some(ts) = record.get("timestamp").and_then(Value::as_str) {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(ts) {
            return parsed.with_timezone(&Utc);
        }
    }
    if let Some(epoch) = record.get("time").and_then(Value::as_f64) {
        if let Some(parsed) = DateTime::from_timestamp(
            epoch.trunc() as i64,
            (epoch.fract() * 1_000_000_000.0) as u32,
        ) {
            return parsed;
        }
    }
    DateTime::UNIX_EPOCH
}

fn tag_stream<T: serde::Serialize>(events: &[T], stream: &str, out: &mut Vec<Value>) {
    for event in events {
        match serde_json::to_value(event) {
            Ok(Value::Object(mut map)) => {
                map.insert("stream".to_string(), Value::String(stream.to_string()));
                out.push(Value::Object(map));
            }
            Ok(other) => out.push(json!({ "stream": stream, "record": other })),
            Err(e) => log::warn!("cannot serialize {} record: {}", stream, e),
        }
    }
}

// ============================================================================
// EXPORTER
// ============================================================================

pub struct ForensicsExporter {
    decoy: Arc<dyn EventStore<ProbeEvent>>,
    integrity: Arc<dyn EventStore<AnomalyEvent>>,
    containment: Arc<dyn EventStore<ContainmentAction>>,
    export_dir: PathBuf,
}

impl ForensicsExporter {
    pub fn new(
        decoy: Arc<dyn EventStore<ProbeEvent>>,
        integrity: Arc<dyn EventStore<AnomalyEvent>>,
        containment: Arc<dyn EventStore<ContainmentAction>>,
        export_dir: PathBuf,
    ) -> Self {
        Self {
            decoy,
            integrity,
            containment,
            export_dir,
        }
    }

    /// One export cycle: merge, sort, archive, fingerprint, manifest.
    pub fn export(&self) -> Result<ForensicsBundle> {
        let exported_at = Utc::now();

        let decoy = self.decoy.read_window();
        let integrity = self.integrity.read_window();
        let containment = self.containment.read_window();

        // Push per-stream in a fixed order; the stable sort keeps that
        // order for records with equal timestamps.
        let mut timeline = Vec::new();
        tag_stream(&decoy, "decoy", &mut timeline);
        tag_stream(&integrity, "integrity", &mut timeline);
        tag_stream(&containment, "containment", &mut timeline);
        timeline.sort_by_key(sort_key);

        let document = json!({
            "exported_at": exported_at.to_rfc3339(),
            "counts": {
                "decoy": decoy.len(),
                "integrity": integrity.len(),
                "containment": containment.len(),
            },
            "events": timeline,
        });

        std::fs::create_dir_all(&self.export_dir)
            .map_err(|e| LabError::from_io(&self.export_dir, e))?;

        let stamp = exported_at.format("%Y%m%d_%H%M%S");
        let archive_name = format!("forensics_{}.zip", stamp);
        let archive_path = self.export_dir.join(&archive_name);

        let file = std::fs::File::create(&archive_path)
            .map_err(|e| LabError::from_io(&archive_path, e))?;
        let mut archive = ZipWriter::new(file);
        archive.start_file("timeline.json", FileOptions::default())?;
        archive
            .write_all(serde_json::to_string_pretty(&document)?.as_bytes())
            .map_err(|e| LabError::from_io(&archive_path, e))?;
        archive.finish()?;

        // Fingerprint the archive's exact on-disk bytes.
        let sha256 = hash_file(&archive_path).map_err(|e| LabError::from_io(&archive_path, e))?;

        let manifest_path = self.export_dir.join(format!("forensics_{}.manifest.json", stamp));
        let manifest = json!({
            "archive": archive_name,
            "sha256": sha256,
            "exported_at": exported_at.to_rfc3339(),
        });
        std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
            .map_err(|e| LabError::from_io(&manifest_path, e))?;

        let total = decoy.len() + integrity.len() + containment.len();
        log::info!("forensics exported: {} | sha256 {}", archive_name, sha256);

        Ok(ForensicsBundle {
            id: Uuid::new_v4().to_string(),
            exported_at,
            archive: archive_name,
            sha256,
            decoy_events: decoy.len(),
            integrity_events: integrity.len(),
            containment_events: containment.len(),
            total_events: total,
        })
    }
}

/// Periodic export loop. A failed export is logged and retried only on the
/// next scheduled cycle, never mid-cycle.
pub async fn run_loop(
    exporter: Arc<ForensicsExporter>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = Duration::from_secs(interval_secs);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                log::info!("forensics exporter shutting down");
                break;
            }
            _ = ticker.tick() => {
                let exporter = exporter.clone();
                match tokio::task::spawn_blocking(move || exporter.export()).await {
                    Ok(Ok(bundle)) => {
                        log::info!("bundle {} covers {} event(s)", bundle.id, bundle.total_events);
                    }
                    Ok(Err(e)) => log::error!("forensics export failed: {}", e),
                    Err(e) => log::error!("forensics export panicked: {}", e),
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
