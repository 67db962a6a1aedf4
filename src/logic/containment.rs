//! Containment Orchestrator
//!
//! Each cycle re-reads the full bounded decoy and integrity windows as an
//! independent, memoryless snapshot, applies the threshold rules and
//! executes destructive remediation. There is deliberately no cross-cycle
//! deduplication: a persisting condition re-triggers the same action every
//! cycle until it ages out of the window. Every attempt is recorded with
//! its outcome; a single failure never aborts the rest of the cycle.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::constants::BACKUP_SUFFIX;
use crate::error::LabError;
use crate::logic::events::{ActionKind, AnomalyEvent, ContainmentAction, ProbeEvent};
use crate::store::EventStore;

// ============================================================================
// REMEDIATION SEAM
// ============================================================================

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub success: bool,
    pub detail: String,
}

impl ActionOutcome {
    pub fn ok(detail: String) -> Self {
        Self {
            success: true,
            detail,
        }
    }

    pub fn failed(detail: String) -> Self {
        Self {
            success: false,
            detail,
        }
    }
}

/// Destructive remediation capability, injected so tests can run the
/// orchestrator against a recording double.
pub trait Remediation: Send + Sync {
    /// Best-effort kill of whatever process currently holds the port.
    fn stop_port(&self, port: u16) -> ActionOutcome;

    /// Plain copy of the fixed-suffix backup over the target. Not atomic;
    /// a crash mid-copy can leave a partial restore (accepted risk).
    fn rollback_file(&self, path: &Path) -> ActionOutcome;
}

/// Real host remediation: `fuser -k PORT/tcp` and backup-file copies.
pub struct HostRemediation;

impl Remediation for HostRemediation {
    fn stop_port(&self, port: u16) -> ActionOutcome {
        match Command::new("fuser")
            .arg("-k")
            .arg(format!("{}/tcp", port))
            .output()
        {
            Ok(out) if out.status.success() => {
                ActionOutcome::ok(format!("service on port {} stopped", port))
            }
            Ok(out) => ActionOutcome::failed(format!(
                "fuser exited with {} for port {}",
                out.status, port
            )),
            Err(e) => ActionOutcome::failed(format!("cannot run fuser for port {}: {}", port, e)),
        }
    }

    fn rollback_file(&self, path: &Path) -> ActionOutcome {
        let backup = std::path::PathBuf::from(format!("{}{}", path.display(), BACKUP_SUFFIX));
        if !backup.exists() {
            return ActionOutcome::failed(format!("no backup for {}, cannot rollback", path.display()));
        }
        match std::fs::copy(&backup, path) {
            Ok(_) => ActionOutcome::ok(format!("rolled back {}", path.display())),
            Err(e) => ActionOutcome::failed(format!("rollback of {} failed: {}", path.display(), e)),
        }
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct Orchestrator {
    decoy: Arc<dyn EventStore<ProbeEvent>>,
    integrity: Arc<dyn EventStore<AnomalyEvent>>,
    actions: Arc<dyn EventStore<ContainmentAction>>,
    remediation: Arc<dyn Remediation>,
    /// Service name -> decoy port, from the static service table.
    service_ports: HashMap<String, u16>,
    probe_threshold: usize,
}

impl Orchestrator {
    pub fn new(
        decoy: Arc<dyn EventStore<ProbeEvent>>,
        integrity: Arc<dyn EventStore<AnomalyEvent>>,
        actions: Arc<dyn EventStore<ContainmentAction>>,
        remediation: Arc<dyn Remediation>,
        service_ports: HashMap<String, u16>,
        probe_threshold: usize,
    ) -> Self {
        Self {
            decoy,
            integrity,
            actions,
            remediation,
            service_ports,
            probe_threshold,
        }
    }

    /// One evaluation cycle. Returns the number of actions issued.
    pub fn run_cycle(&self) -> usize {
        let mut issued = 0;
        issued += self.evaluate_probes();
        issued += self.evaluate_anomalies();
        issued
    }

    /// Decoy rule: any (source IP, service) group exceeding the threshold
    /// resolves its service to a port and issues one stop-port action.
    fn evaluate_probes(&self) -> usize {
        let window = self.decoy.read_window();
        let mut groups: HashMap<(String, String), usize> = HashMap::new();
        for event in &window {
            *groups
                .entry((event.source_ip.clone(), event.service.clone()))
                .or_default() += 1;
        }

        let mut issued = 0;
        for ((ip, service), count) in groups {
            if count <= self.probe_threshold {
                continue;
            }
            log::warn!(
                "{} triggered threshold on {} ({} probes), taking action",
                ip,
                service,
                count
            );
            let action = match self.service_ports.get(&service) {
                Some(port) => {
                    let outcome = self.remediation.stop_port(*port);
                    ContainmentAction::new(
                        ActionKind::StopPort,
                        port.to_string(),
                        outcome.success,
                        format!("{} (offender {})", outcome.detail, ip),
                    )
                }
                // A probe for a service missing from the table cannot be
                // resolved to a port; recorded as a failed attempt.
                None => ContainmentAction::new(
                    ActionKind::StopPort,
                    service.clone(),
                    false,
                    format!("unknown service {} for offender {}", service, ip),
                ),
            };
            self.record(action);
            issued += 1;
        }
        issued
    }

    /// Integrity rule: every anomaly record in the window issues a
    /// rollback-file action.
    fn evaluate_anomalies(&self) -> usize {
        let mut issued = 0;
        for event in self.integrity.read_window() {
            if !event.anomaly {
                continue;
            }
            log::warn!("file anomaly in window: {}", event.path);
            let outcome = self.remediation.rollback_file(Path::new(&event.path));
            self.record(ContainmentAction::new(
                ActionKind::RollbackFile,
                event.path.clone(),
                outcome.success,
                outcome.detail,
            ));
            issued += 1;
        }
        issued
    }

    fn record(&self, action: ContainmentAction) {
        if action.outcome {
            log::info!(
                "[containment] {} {}: {}",
                action.kind.as_str(),
                action.target,
                action.detail
            );
        } else {
            log::warn!("[containment] {}", LabError::ActionFailed(action.detail.clone()));
        }
        if let Err(e) = self.actions.append(&action) {
            log::error!("failed to record containment action: {}", e);
        }
    }
}

/// Periodic evaluation loop.
pub async fn run_loop(
    orchestrator: Arc<Orchestrator>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = Duration::from_secs(interval_secs);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                log::info!("containment orchestrator shutting down");
                break;
            }
            _ = ticker.tick() => {
                let orchestrator = orchestrator.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || orchestrator.run_cycle()).await {
                    log::error!("containment cycle panicked: {}", e);
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use parking_lot::Mutex;

    /// Recording double: reports success without touching the host.
    struct FakeRemediation {
        stopped_ports: Mutex<Vec<u16>>,
        rolled_back: Mutex<Vec<String>>,
    }

    impl FakeRemediation {
        fn new() -> Self {
            Self {
                stopped_ports: Mutex::new(Vec::new()),
                rolled_back: Mutex::new(Vec::new()),
            }
        }
    }

    impl Remediation for FakeRemediation {
        fn stop_port(&self, port: u16) -> ActionOutcome {
            self.stopped_ports.lock().push(port);
            ActionOutcome::ok(format!("service on port {} stopped", port))
        }

        fn rollback_file(&self, path: &Path) -> ActionOutcome {
            self.rolled_back.lock().push(path.display().to_string());
            ActionOutcome::ok(format!("rolled back {}", path.display()))
        }
    }

    struct Fixture {
        decoy: Arc<MemoryStore<ProbeEvent>>,
        integrity: Arc<MemoryStore<AnomalyEvent>>,
        actions: Arc<MemoryStore<ContainmentAction>>,
        remediation: Arc<FakeRemediation>,
        orchestrator: Orchestrator,
    }

    fn fixture() -> Fixture {
        let decoy = Arc::new(MemoryStore::new(200));
        let integrity = Arc::new(MemoryStore::new(200));
        let actions = Arc::new(MemoryStore::new(200));
        let remediation = Arc::new(FakeRemediation::new());
        let orchestrator = Orchestrator::new(
            decoy.clone(),
            integrity.clone(),
            actions.clone(),
            remediation.clone(),
            HashMap::from([("SSH".to_string(), 2222u16)]),
            6,
        );
        Fixture {
            decoy,
            integrity,
            actions,
            remediation,
            orchestrator,
        }
    }

    fn probe(ip: &str, service: &str) -> ProbeEvent {
        ProbeEvent::new(service, 2222, ip.to_string(), 50000, String::new(), 1, None)
    }

    #[test]
    fn test_burst_of_seven_issues_exactly_one_stop_port() {
        let f = fixture();
        for _ in 0..7 {
            f.decoy.append(&probe("10.0.0.9", "SSH")).unwrap();
        }

        assert_eq!(f.orchestrator.run_cycle(), 1);
        assert_eq!(*f.remediation.stopped_ports.lock(), vec![2222]);

        let recorded = f.actions.read_window();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].kind, ActionKind::StopPort);
        assert_eq!(recorded[0].target, "2222");
        assert!(recorded[0].outcome);
    }

    #[test]
    fn test_threshold_is_strictly_exceeded() {
        let f = fixture();
        for _ in 0..6 {
            f.decoy.append(&probe("10.0.0.9", "SSH")).unwrap();
        }
        assert_eq!(f.orchestrator.run_cycle(), 0);
        assert!(f.actions.read_window().is_empty());
    }

    #[test]
    fn test_groups_are_per_ip_and_service() {
        let f = fixture();
        // 7 probes split across two IPs: neither group crosses the line.
        for i in 0..7 {
            let ip = if i % 2 == 0 { "10.0.0.1" } else { "10.0.0.2" };
            f.decoy.append(&probe(ip, "SSH")).unwrap();
        }
        assert_eq!(f.orchestrator.run_cycle(), 0);
    }

    #[test]
    fn test_persisting_condition_reissues_every_cycle() {
        let f = fixture();
        for _ in 0..7 {
            f.decoy.append(&probe("10.0.0.9", "SSH")).unwrap();
        }

        // Memoryless snapshots: the same in-window burst fires again on
        // the next cycle. Accepted behavior, not a defect.
        assert_eq!(f.orchestrator.run_cycle(), 1);
        assert_eq!(f.orchestrator.run_cycle(), 1);
        assert_eq!(f.actions.read_window().len(), 2);
    }

    #[test]
    fn test_unresolvable_service_recorded_as_failure() {
        let f = fixture();
        for _ in 0..7 {
            f.decoy.append(&probe("10.0.0.9", "Telnet")).unwrap();
        }

        assert_eq!(f.orchestrator.run_cycle(), 1);
        assert!(f.remediation.stopped_ports.lock().is_empty());
        let recorded = f.actions.read_window();
        assert!(!recorded[0].outcome);
    }

    #[test]
    fn test_every_anomaly_triggers_rollback() {
        let f = fixture();
        f.integrity
            .append(&AnomalyEvent::drift("/etc/hosts", "aa".into(), "bb".into()))
            .unwrap();
        f.integrity
            .append(&AnomalyEvent::drift("/etc/passwd", "cc".into(), "dd".into()))
            .unwrap();

        assert_eq!(f.orchestrator.run_cycle(), 2);
        assert_eq!(
            *f.remediation.rolled_back.lock(),
            vec!["/etc/hosts".to_string(), "/etc/passwd".to_string()]
        );
    }

    #[test]
    fn test_rollback_with_backup_restores_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("config.cfg");
        let backup = dir.path().join("config.cfg.bak");
        std::fs::write(&target, "tampered contents").unwrap();
        std::fs::write(&backup, "original contents").unwrap();

        let outcome = HostRemediation.rollback_file(&target);
        assert!(outcome.success);
        assert_eq!(
            std::fs::read(&target).unwrap(),
            std::fs::read(&backup).unwrap()
        );
    }

    #[test]
    fn test_rollback_without_backup_is_recorded_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("orphan.cfg");
        std::fs::write(&target, "tampered").unwrap();

        let f = fixture();
        let orchestrator = Orchestrator::new(
            f.decoy.clone(),
            f.integrity.clone(),
            f.actions.clone(),
            Arc::new(HostRemediation),
            HashMap::new(),
            6,
        );
        f.integrity
            .append(&AnomalyEvent::drift(
                &target.display().to_string(),
                "aa".into(),
                "bb".into(),
            ))
            .unwrap();

        // The failure is absorbed and recorded; the cycle completes.
        assert_eq!(orchestrator.run_cycle(), 1);
        let recorded = f.actions.read_window();
        assert_eq!(recorded[0].kind, ActionKind::RollbackFile);
        assert!(!recorded[0].outcome);
        assert!(recorded[0].detail.contains("no backup"));
    }

    #[test]
    fn test_failed_action_never_aborts_cycle() {
        let f = fixture();
        let orchestrator = Orchestrator::new(
            f.decoy.clone(),
            f.integrity.clone(),
            f.actions.clone(),
            Arc::new(HostRemediation),
            HashMap::new(),
            6,
        );
        f.integrity
            .append(&AnomalyEvent::drift("/nonexistent/a", "aa".into(), "bb".into()))
            .unwrap();
        f.integrity
            .append(&AnomalyEvent::drift("/nonexistent/b", "cc".into(), "dd".into()))
            .unwrap();

        assert_eq!(orchestrator.run_cycle(), 2);
        assert_eq!(f.actions.read_window().len(), 2);
    }
}
