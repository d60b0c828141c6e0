//! Observability handle threaded through the ceremony engine.
//!
//! Metrics are in-process atomic counters. Audit entries go to an
//! [`AuditSink`] chosen by the embedder; nothing here is global.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use zkpass_core::current_timestamp;

/// Ceremony counters.
#[derive(Debug, Default)]
pub struct CeremonyMetrics {
    pub ceremonies_begun_total: AtomicU64,
    pub ceremonies_committed_total: AtomicU64,
    pub ceremonies_failed_total: AtomicU64,
    pub sessions_expired_total: AtomicU64,
    pub replays_rejected_total: AtomicU64,
    pub clone_warnings_total: AtomicU64,
    pub proofs_verified_total: AtomicU64,
    pub proofs_rejected_total: AtomicU64,
}

/// Point-in-time copy of [`CeremonyMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ceremonies_begun_total: u64,
    pub ceremonies_committed_total: u64,
    pub ceremonies_failed_total: u64,
    pub sessions_expired_total: u64,
    pub replays_rejected_total: u64,
    pub clone_warnings_total: u64,
    pub proofs_verified_total: u64,
    pub proofs_rejected_total: u64,
}

impl CeremonyMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            ceremonies_begun_total: load(&self.ceremonies_begun_total),
            ceremonies_committed_total: load(&self.ceremonies_committed_total),
            ceremonies_failed_total: load(&self.ceremonies_failed_total),
            sessions_expired_total: load(&self.sessions_expired_total),
            replays_rejected_total: load(&self.replays_rejected_total),
            clone_warnings_total: load(&self.clone_warnings_total),
            proofs_verified_total: load(&self.proofs_verified_total),
            proofs_rejected_total: load(&self.proofs_rejected_total),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    CredentialRegistered,
    AuthenticationSucceeded,
    CloneSuspected,
    ProofVerified,
    ProofRejected,
    CredentialRevoked,
    CeremonyFailed,
}

/// One audit record. Identifiers are fingerprints, never raw handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event: AuditEventType,
    pub timestamp: u64,
    pub user: Option<String>,
    pub credential: Option<String>,
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            event,
            timestamp: current_timestamp(),
            user: None,
            credential: None,
            detail: None,
        }
    }

    pub fn user(mut self, fingerprint: impl Into<String>) -> Self {
        self.user = Some(fingerprint.into());
        self
    }

    pub fn credential(mut self, fingerprint: impl Into<String>) -> Self {
        self.credential = Some(fingerprint.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Destination for audit entries. Must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Writes audit entries as `tracing` events under the `audit` target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        let user = entry.user.as_deref().unwrap_or("-");
        let credential = entry.credential.as_deref().unwrap_or("-");
        let detail = entry.detail.as_deref().unwrap_or("");
        match entry.event {
            AuditEventType::CloneSuspected
            | AuditEventType::ProofRejected
            | AuditEventType::CeremonyFailed => warn!(
                target: "audit",
                event = ?entry.event,
                user,
                credential,
                detail,
                "Audit"
            ),
            _ => info!(
                target: "audit",
                event = ?entry.event,
                user,
                credential,
                detail,
                "Audit"
            ),
        }
    }
}

/// Keeps audit entries in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, event: AuditEventType) -> usize {
        self.entries
            .lock()
            .map(|e| e.iter().filter(|entry| entry.event == event).count())
            .unwrap_or(0)
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

/// Metrics plus audit sink, cloned into every engine.
#[derive(Clone)]
pub struct Observability {
    pub metrics: Arc<CeremonyMetrics>,
    pub audit: Arc<dyn AuditSink>,
}

impl Observability {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            metrics: Arc::new(CeremonyMetrics::default()),
            audit,
        }
    }

    pub fn audit(&self, entry: AuditEntry) {
        self.audit.record(entry);
    }
}

impl Default for Observability {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let obs = Observability::default();
        CeremonyMetrics::incr(&obs.metrics.ceremonies_begun_total);
        CeremonyMetrics::incr(&obs.metrics.ceremonies_begun_total);
        CeremonyMetrics::incr(&obs.metrics.clone_warnings_total);

        let snapshot = obs.metrics.snapshot();
        assert_eq!(snapshot.ceremonies_begun_total, 2);
        assert_eq!(snapshot.clone_warnings_total, 1);
        assert_eq!(snapshot.proofs_verified_total, 0);
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = Arc::new(MemoryAuditSink::new());
        let obs = Observability::new(sink.clone());

        obs.audit(
            AuditEntry::new(AuditEventType::ProofVerified)
                .user("aa11")
                .detail("hash=00ff"),
        );
        obs.audit(AuditEntry::new(AuditEventType::CloneSuspected).credential("bb22"));

        assert_eq!(sink.entries().len(), 2);
        assert_eq!(sink.count(AuditEventType::CloneSuspected), 1);
        assert_eq!(sink.entries()[0].user.as_deref(), Some("aa11"));
    }
}
