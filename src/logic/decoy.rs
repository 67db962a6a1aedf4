//! Decoy Service Listener
//!
//! Emulates a table of unprivileged network services. Each service runs as
//! its own supervised task so a bind failure or a slow client on one never
//! blocks another. A handled connection appends exactly one `ProbeEvent`:
//! banner out (best effort), one bounded read, unconditional close.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::DecoyService;
use crate::constants::{DECOY_READ_TIMEOUT_SECS, LONG_PAYLOAD_BYTES, PAYLOAD_SAMPLE_BYTES};
use crate::error::{LabError, Result};
use crate::logic::events::ProbeEvent;
use crate::store::EventStore;

// ============================================================================
// SEVERITY SCORING
// ============================================================================

/// Deterministic triage heuristic, not ground truth:
/// base 1; +2 for credential-fishing keywords; +1 for long payloads.
pub fn score_payload(payload: &str) -> u8 {
    let mut severity = 1;
    let lowered = payload.to_ascii_lowercase();
    if lowered.contains("password") || lowered.contains("login") {
        severity += 2;
    }
    if payload.len() > LONG_PAYLOAD_BYTES {
        severity += 1;
    }
    severity
}

/// First configured decoy file path the payload mentions, if any.
fn match_decoy_file(payload: &str, decoy_files: &[String]) -> Option<String> {
    decoy_files
        .iter()
        .find(|f| payload.contains(f.as_str()))
        .cloned()
}

// ============================================================================
// LISTENER
// ============================================================================

pub struct DecoyListener {
    services: Vec<DecoyService>,
    decoy_files: Vec<String>,
    store: Arc<dyn EventStore<ProbeEvent>>,
}

/// Supervision handles for the spawned accept loops, plus the addresses
/// that actually bound (tests bind port 0 and read these back).
pub struct DecoyHandles {
    pub tasks: Vec<JoinHandle<()>>,
    pub bound: Vec<(String, SocketAddr)>,
}

impl DecoyListener {
    pub fn new(
        services: Vec<DecoyService>,
        decoy_files: Vec<String>,
        store: Arc<dyn EventStore<ProbeEvent>>,
    ) -> Self {
        Self {
            services,
            decoy_files,
            store,
        }
    }

    /// Bind every configured service and spawn one accept loop per bound
    /// socket. A single bind failure logs and continues; zero bound
    /// listeners is fatal.
    pub async fn spawn_all(&self, shutdown: watch::Receiver<bool>) -> Result<DecoyHandles> {
        let mut tasks = Vec::new();
        let mut bound = Vec::new();

        for service in &self.services {
            let listener = match TcpListener::bind(("0.0.0.0", service.port)).await {
                Ok(l) => l,
                Err(e) => {
                    log::error!("[{}] cannot bind port {}: {}", service.name, service.port, e);
                    continue;
                }
            };
            let addr = listener
                .local_addr()
                .map_err(|e| LabError::Fatal(format!("local_addr: {}", e)))?;
            log::info!("[{}] listening on {}", service.name, addr);
            bound.push((service.name.clone(), addr));

            let service = service.clone();
            let decoy_files = self.decoy_files.clone();
            let store = self.store.clone();
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(accept_loop(
                listener,
                service,
                decoy_files,
                store,
                shutdown,
            )));
        }

        if bound.is_empty() {
            return Err(LabError::Fatal(
                "no decoy listener could bind; nothing to monitor".to_string(),
            ));
        }
        Ok(DecoyHandles { tasks, bound })
    }
}

async fn accept_loop(
    listener: TcpListener,
    service: DecoyService,
    decoy_files: Vec<String>,
    store: Arc<dyn EventStore<ProbeEvent>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                log::info!("[{}] listener shutting down", service.name);
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        log::info!("[{}] connection from {}", service.name, peer);
                        let service = service.clone();
                        let decoy_files = decoy_files.clone();
                        let store = store.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, service, decoy_files, store).await;
                        });
                    }
                    Err(e) => {
                        log::warn!("[{}] accept error: {}", service.name, e);
                    }
                }
            }
        }
    }
}

/// Banner out, one bounded read, event append. The socket closes when this
/// scope exits, regardless of what the read did.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    service: DecoyService,
    decoy_files: Vec<String>,
    store: Arc<dyn EventStore<ProbeEvent>>,
) {
    // Early disconnects are expected; a failed banner send is not an error.
    let _ = stream
        .write_all(format!("{}\r\n", service.banner).as_bytes())
        .await;

    let mut buf = vec![0u8; PAYLOAD_SAMPLE_BYTES];
    let read = tokio::time::timeout(
        Duration::from_secs(DECOY_READ_TIMEOUT_SECS),
        stream.read(&mut buf),
    )
    .await;

    let payload = match read {
        Ok(Ok(n)) if n > 0 => String::from_utf8_lossy(&buf[..n]).into_owned(),
        _ => String::new(),
    };
    drop(stream);

    let severity = score_payload(&payload);
    let decoy_accessed = match_decoy_file(&payload, &decoy_files);
    if let Some(decoy) = &decoy_accessed {
        log::warn!("[{}] decoy file referenced by {}: {}", service.name, peer, decoy);
    }

    let event = ProbeEvent::new(
        &service.name,
        service.port,
        peer.ip().to_string(),
        peer.port(),
        payload,
        severity,
        decoy_accessed,
    );
    if let Err(e) = store.append(&event) {
        log::error!("[{}] failed to record probe event: {}", service.name, e);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_score_baseline() {
        assert_eq!(score_payload(""), 1);
        assert_eq!(score_payload("GET / HTTP/1.1"), 1);
    }

    #[test]
    fn test_score_credential_keywords_any_case() {
        assert_eq!(score_payload("PASSWORD"), 3);
        assert_eq!(score_payload("try Login now"), 3);
    }

    #[test]
    fn test_score_long_payload_bumps_by_one() {
        let short = "x".repeat(100);
        let long = "x".repeat(101);
        assert_eq!(score_payload(&long), score_payload(&short) + 1);

        let long_with_keyword = format!("password {}", "x".repeat(100));
        assert_eq!(score_payload(&long_with_keyword), 4);
    }

    #[test]
    fn test_decoy_file_match() {
        let files = vec!["/tmp/fake_pass.txt".to_string()];
        assert_eq!(
            match_decoy_file("cat /tmp/fake_pass.txt", &files),
            Some("/tmp/fake_pass.txt".to_string())
        );
        assert_eq!(match_decoy_file("ls /etc", &files), None);
    }

    async fn spawn_test_listener(
        banner: &str,
    ) -> (SocketAddr, Arc<MemoryStore<ProbeEvent>>, watch::Sender<bool>) {
        let store = Arc::new(MemoryStore::new(50));
        let listener = DecoyListener::new(
            vec![DecoyService::new("SSH", 0, banner)],
            vec!["/tmp/fake_pass.txt".to_string()],
            store.clone(),
        );
        let (tx, rx) = watch::channel(false);
        let handles = listener.spawn_all(rx).await.unwrap();
        (handles.bound[0].1, store, tx)
    }

    async fn wait_for_event(store: &MemoryStore<ProbeEvent>) -> ProbeEvent {
        for _ in 0..200 {
            if let Some(event) = store.read_window().into_iter().next() {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no probe event recorded");
    }

    #[tokio::test]
    async fn test_connection_receives_exact_banner() {
        let banner = "SSH-2.0-OpenSSH_8.9p1 Debian-3";
        let (addr, _store, _tx) = spawn_test_listener(banner).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut received = vec![0u8; banner.len() + 2];
        client.read_exact(&mut received).await.unwrap();
        assert_eq!(received, format!("{}\r\n", banner).into_bytes());
    }

    #[tokio::test]
    async fn test_one_event_per_connection_with_severity() {
        let (addr, store, _tx) = spawn_test_listener("220 (vsFTPd 3.0.3)").await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"USER root PASSWORD toor").await.unwrap();
        client.shutdown().await.unwrap();

        let event = wait_for_event(&store).await;
        assert_eq!(event.service, "SSH");
        assert_eq!(event.severity, 3);
        assert_eq!(event.payload, "USER root PASSWORD toor");
        assert!(event.decoy_accessed.is_none());
        assert_eq!(store.read_window().len(), 1);
    }

    #[tokio::test]
    async fn test_decoy_file_reference_is_tagged() {
        let (addr, store, _tx) = spawn_test_listener("banner").await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"RETR /tmp/fake_pass.txt").await.unwrap();
        client.shutdown().await.unwrap();

        let event = wait_for_event(&store).await;
        assert_eq!(event.decoy_accessed.as_deref(), Some("/tmp/fake_pass.txt"));
    }

    #[tokio::test]
    async fn test_silent_client_still_produces_event() {
        let (addr, store, _tx) = spawn_test_listener("banner").await;

        let client = TcpStream::connect(addr).await.unwrap();
        drop(client);

        let event = wait_for_event(&store).await;
        assert_eq!(event.payload, "");
        assert_eq!(event.severity, 1);
    }
}
