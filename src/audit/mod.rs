//! Audit sink for access decisions.
//!
//! The decision point only enqueues; a writer task drains the queue into an
//! [`AuditStore`]. Write failures are logged and dropped, never retried and
//! never reported back to the decision.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::AppResult;
use crate::models::audit::AuditEntry;

/// Append side of the audit log.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persists one entry and returns its sequence number.
    async fn append(&self, entry: AuditEntry) -> AppResult<i64>;
}

/// Request context carried into audit records (IP, User-Agent, free text).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract context from Axum request headers
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent, details: None }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Non-blocking handle used by the decision point to submit audit records.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::UnboundedSender<AuditEntry>,
}

impl AuditSink {
    /// Starts the writer task on the current runtime. The task ends once every
    /// clone of the returned sink has been dropped and the queue is drained.
    pub fn spawn(store: Arc<dyn AuditStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_audit_writer(rx, store));
        (Self { tx }, handle)
    }

    /// Enqueues a record. Never blocks and never fails the caller.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(err) = self.tx.send(entry) {
            let entry = err.0;
            tracing::error!(
                username = %entry.username,
                permission = %entry.permission(),
                granted = entry.granted,
                "audit writer is gone, dropping record"
            );
        }
    }
}

pub async fn run_audit_writer(mut rx: mpsc::UnboundedReceiver<AuditEntry>, store: Arc<dyn AuditStore>) {
    tracing::info!("Audit writer started");
    while let Some(entry) = rx.recv().await {
        let username = entry.username.clone();
        let permission = entry.permission();
        let granted = entry.granted;

        match store.append(entry).await {
            Ok(id) => {
                tracing::debug!(audit_id = id, username = %username, permission = %permission, granted, "audit record written");
            }
            Err(e) => {
                tracing::error!(username = %username, permission = %permission, granted, "Failed to save permission audit: {}", e);
            }
        }
    }
    tracing::info!("Audit writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingStore {
        entries: Mutex<Vec<AuditEntry>>,
    }

    #[async_trait]
    impl AuditStore for RecordingStore {
        async fn append(&self, entry: AuditEntry) -> AppResult<i64> {
            let mut entries = self.entries.lock();
            entries.push(entry);
            Ok(entries.len() as i64)
        }
    }

    #[derive(Default)]
    struct FailingStore {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl AuditStore for FailingStore {
        async fn append(&self, _entry: AuditEntry) -> AppResult<i64> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(AppError::internal("audit store offline"))
        }
    }

    #[tokio::test]
    async fn writer_drains_queue_after_sink_dropped() {
        let store = Arc::new(RecordingStore::default());
        let (sink, handle) = AuditSink::spawn(store.clone());

        sink.record(AuditEntry::new("alice", "NOTES", "READ", true));
        sink.record(AuditEntry::new("alice", "NOTES", "DELETE", false));
        drop(sink);
        handle.await.unwrap();

        let entries = store.entries.lock();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].granted);
        assert!(!entries[1].granted);
        assert_eq!(entries[1].permission(), "NOTES:DELETE");
    }

    #[tokio::test]
    async fn failing_store_is_attempted_once_per_record_and_writer_survives() {
        let store = Arc::new(FailingStore::default());
        let (sink, handle) = AuditSink::spawn(store.clone());

        for _ in 0..3 {
            sink.record(AuditEntry::new("bob", "NOTES", "READ", true));
        }
        drop(sink);
        handle.await.unwrap();

        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn context_prefers_forwarded_for() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        headers.insert("x-real-ip", "192.168.1.1".parse().unwrap());
        headers.insert(axum::http::header::USER_AGENT, "curl/8".parse().unwrap());

        let ctx = RequestContext::from_headers(&headers);
        assert_eq!(ctx.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8"));
        assert!(ctx.details.is_none());
    }
}
