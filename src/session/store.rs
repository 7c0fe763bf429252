//! In-memory session table.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::time;

use crate::observability::metrics;

/// Stored session data with its expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub data: Map<String, Value>,
    pub expires_at: SystemTime,
}

impl SessionRecord {
    /// A record that expires `ttl` from now.
    pub fn new(data: Map<String, Value>, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: SystemTime::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= SystemTime::now()
    }
}

/// Thread-safe session table keyed by session id.
///
/// Clones share the same table. Concurrent writers to one id are not
/// coordinated; the last write wins.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<DashMap<String, SessionRecord>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw lookup, expired or not.
    pub fn get(&self, id: &str) -> Option<SessionRecord> {
        self.inner.get(id).map(|entry| entry.value().clone())
    }

    /// Lookup that evicts and hides an expired record.
    pub fn load(&self, id: &str) -> Option<SessionRecord> {
        let record = self.get(id)?;
        if record.is_expired() {
            tracing::debug!(session_id = %id, "Session expired; evicting");
            self.remove(id);
            return None;
        }
        Some(record)
    }

    pub fn insert(&self, id: String, record: SessionRecord) {
        self.inner.insert(id, record);
        metrics::record_sessions_active(self.inner.len());
    }

    /// Push back the expiry of a live record. Returns false when the record
    /// is gone or already expired; nothing is recreated.
    pub fn renew(&self, id: &str, ttl: Duration) -> bool {
        match self.inner.get_mut(id) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = SystemTime::now() + ttl;
                true
            }
            _ => false,
        }
    }

    /// Replace the data of a live record and renew it. Returns false when
    /// the record is gone or already expired; nothing is recreated.
    pub fn update(&self, id: &str, data: &Map<String, Value>, ttl: Duration) -> bool {
        match self.inner.get_mut(id) {
            Some(mut entry) if !entry.is_expired() => {
                entry.data = data.clone();
                entry.expires_at = SystemTime::now() + ttl;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<SessionRecord> {
        let removed = self.inner.remove(id).map(|(_, record)| record);
        if removed.is_some() {
            metrics::record_sessions_active(self.inner.len());
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every expired record, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, record| !record.is_expired());
        let purged = before.saturating_sub(self.inner.len());
        if purged > 0 {
            tracing::debug!(purged, "Purged expired sessions");
            metrics::record_sessions_active(self.inner.len());
        }
        purged
    }

    /// Sweep expired records every `every` until `shutdown` fires.
    pub async fn run_purger(self, every: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = every.as_secs(), "Session purger starting");
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.purge_expired();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Session purger received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
