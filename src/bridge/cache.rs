//! Time-bounded cache of the latest metrics per host.
//!
//! One entry per host id, overwritten on every refresh. There is no sweeper:
//! an entry is valid while `now - stored_at < ttl`, checked on read.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::types::DiagnosticResult;

#[derive(Debug)]
pub struct MetricsCache {
    ttl: Duration,
    entries: DashMap<String, (DiagnosticResult, Instant)>,
}

impl MetricsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, host_id: &str) -> Option<DiagnosticResult> {
        self.get_at(host_id, Instant::now())
    }

    pub fn put(&self, host_id: &str, result: DiagnosticResult) {
        self.put_at(host_id, result, Instant::now());
    }

    /// Look up `host_id` as of `now`.
    pub fn get_at(&self, host_id: &str, now: Instant) -> Option<DiagnosticResult> {
        let entry = self.entries.get(host_id)?;
        let (result, stored_at) = entry.value();

        if now.saturating_duration_since(*stored_at) >= self.ttl {
            debug!("Metrics cache stale for {}", host_id);
            return None;
        }

        debug!("Metrics cache hit for {}", host_id);
        Some(result.clone())
    }

    pub fn put_at(&self, host_id: &str, result: DiagnosticResult, stored_at: Instant) {
        self.entries.insert(host_id.to_string(), (result, stored_at));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
