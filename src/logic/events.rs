//! Pipeline Event Types
//!
//! Immutable, timestamped records exchanged between subsystems through the
//! event streams. Downstream components treat every record as read-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// DECOY STREAM
// ============================================================================

/// One record per accepted decoy connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub port: u16,
    pub source_ip: String,
    pub source_port: u16,
    /// Bounded prefix of whatever the client sent, lossy UTF-8.
    pub payload: String,
    /// Triage heuristic, not ground truth. See `decoy::score_payload`.
    pub severity: u8,
    /// Set when the payload references a configured decoy file path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoy_accessed: Option<String>,
}

impl ProbeEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: &str,
        port: u16,
        source_ip: String,
        source_port: u16,
        payload: String,
        severity: u8,
        decoy_accessed: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            service: service.to_string(),
            port,
            source_ip,
            source_port,
            payload,
            severity,
            decoy_accessed,
        }
    }
}

// ============================================================================
// INTEGRITY STREAM
// ============================================================================

/// Emitted only when a fresh hash differs from the stored baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub previous_hash: String,
    pub new_hash: String,
    /// Always true on emitted records; kept for wire compatibility with
    /// consumers of the original telemetry rows.
    pub anomaly: bool,
}

impl AnomalyEvent {
    pub fn drift(path: &str, previous_hash: String, new_hash: String) -> Self {
        Self {
            timestamp: Utc::now(),
            path: path.to_string(),
            previous_hash,
            new_hash,
            anomaly: true,
        }
    }
}

// ============================================================================
// CONTAINMENT STREAM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "stop-port")]
    StopPort,
    #[serde(rename = "rollback-file")]
    RollbackFile,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::StopPort => "stop-port",
            ActionKind::RollbackFile => "rollback-file",
        }
    }
}

/// Append-only audit record of one remediation attempt, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainmentAction {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ActionKind,
    /// Port (stop-port) or path (rollback-file).
    pub target: String,
    pub outcome: bool,
    pub detail: String,
}

impl ContainmentAction {
    pub fn new(kind: ActionKind, target: String, outcome: bool, detail: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            target,
            outcome,
            detail,
        }
    }
}

// ============================================================================
// FORENSICS
// ============================================================================

/// Summary of one export cycle: the archive reference and its fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForensicsBundle {
    pub id: String,
    pub exported_at: DateTime<Utc>,
    pub archive: String,
    /// Hex SHA-256 over the archive's exact bytes. The sole tamper
    /// evidence; there is no signing key.
    pub sha256: String,
    pub decoy_events: usize,
    pub integrity_events: usize,
    pub containment_events: usize,
    pub total_events: usize,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind_wire_names() {
        let action = ContainmentAction::new(
            ActionKind::StopPort,
            "2222".to_string(),
            true,
            "service on port 2222 stopped".to_string(),
        );
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"stop-port\""));

        let back: ContainmentAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, ActionKind::StopPort);
        assert_eq!(ActionKind::RollbackFile.as_str(), "rollback-file");
    }

    #[test]
    fn test_probe_event_omits_empty_decoy_tag() {
        let event = ProbeEvent::new("SSH", 2222, "10.0.0.9".into(), 50000, "".into(), 1, None);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("decoy_accessed"));
    }

    #[test]
    fn test_anomaly_event_always_flagged() {
        let event = AnomalyEvent::drift("/etc/hosts", "aa".into(), "bb".into());
        assert!(event.anomaly);
        assert_eq!(event.path, "/etc/hosts");
    }
}
