//! TTL-bounded attestation cache with single-flight verification.
//!
//! The cache amortizes verification cost across the request stream: a
//! verdict is reused until its TTL lapses, and concurrent misses for the
//! same registration coalesce onto one underlying verification. Failure
//! verdicts are cached like successes so every caller inside a TTL window
//! sees the same answer.
//!
//! One `std::sync::Mutex` serializes the entry map and the pending map;
//! every critical section is a plain map operation with no await point, and
//! verification itself always runs outside the lock. In-flight work is
//! tracked as a `watch` channel per app id: the leader signals completion,
//! followers wait on a clone of the receiver. The leader runs the
//! verification in its own task so a disconnecting client can never cancel
//! work that other waiters (and the cache) benefit from.

use crate::types::{ChainVerificationResult, DcapResult, MeasurementResult, ProvenanceResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;

/// A cached verification verdict for one registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAttestation {
    pub app_id: String,
    /// True iff all three sub-results verified.
    pub verified: bool,
    pub dcap: DcapResult,
    pub provenance: ProvenanceResult,
    pub measurements: MeasurementResult,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedAttestation {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Observational cache counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub ttl_seconds: u64,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("verification task failed: {0}")]
    VerificationTask(String),

    #[error("verification completed without a cache entry for {0}")]
    Incomplete(String),
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CachedAttestation>,
    pending: HashMap<String, watch::Receiver<bool>>,
}

struct CacheInner {
    ttl_seconds: u64,
    state: Mutex<CacheState>,
}

/// TTL cache over [`ChainVerificationResult`] verdicts, keyed by app id.
#[derive(Clone)]
pub struct AttestationCache {
    inner: Arc<CacheInner>,
}

enum Role {
    Leader(watch::Sender<bool>),
    Follower(watch::Receiver<bool>),
}

impl AttestationCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                ttl_seconds,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A live entry, if any. The first read past expiry removes the stale
    /// entry and returns nothing.
    pub fn get(&self, app_id: &str) -> Option<CachedAttestation> {
        let mut state = self.lock();
        match state.entries.get(app_id) {
            Some(entry) if !entry.is_expired() => {
                tracing::debug!(app_id, "attestation cache hit");
                Some(entry.clone())
            }
            Some(_) => {
                tracing::debug!(app_id, "attestation cache entry expired");
                let _ = state.entries.remove(app_id);
                None
            }
            None => None,
        }
    }

    /// Store a verdict (positive or negative) with a fresh TTL window.
    pub fn put(&self, app_id: &str, result: ChainVerificationResult) -> CachedAttestation {
        let now = Utc::now();
        let cached = CachedAttestation {
            app_id: app_id.to_string(),
            verified: result.verified(),
            dcap: result.dcap,
            provenance: result.provenance,
            measurements: result.measurements,
            cached_at: now,
            expires_at: now + Duration::seconds(self.inner.ttl_seconds as i64),
        };

        let mut state = self.lock();
        let _ = state.entries.insert(app_id.to_string(), cached.clone());
        tracing::info!(
            app_id,
            verified = cached.verified,
            expires_at = %cached.expires_at,
            "cached attestation verdict"
        );
        cached
    }

    /// Drop any entry for the app id.
    pub fn invalidate(&self, app_id: &str) {
        let mut state = self.lock();
        if state.entries.remove(app_id).is_some() {
            tracing::info!(app_id, "invalidated cached attestation");
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let valid = state.entries.values().filter(|e| !e.is_expired()).count();
        CacheStats {
            total_entries: state.entries.len(),
            valid_entries: valid,
            expired_entries: state.entries.len() - valid,
            ttl_seconds: self.inner.ttl_seconds,
        }
    }

    /// Return a live verdict, coalescing concurrent misses onto one
    /// verification.
    ///
    /// The first caller for a cold app id becomes the leader: it runs
    /// `verify` to completion in a spawned task, stores the verdict
    /// (failures included), signals, and clears the in-flight marker.
    /// Everyone else waits for the signal and reads the cache once more.
    pub async fn get_or_verify<F, Fut>(
        &self,
        app_id: &str,
        verify: F,
    ) -> Result<CachedAttestation, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ChainVerificationResult> + Send + 'static,
    {
        let role = {
            let mut state = self.lock();

            // Entry check and flight admission under the same lock, so at
            // most one verification is ever pending per app id.
            match state.entries.get(app_id) {
                Some(entry) if !entry.is_expired() => return Ok(entry.clone()),
                Some(_) => {
                    let _ = state.entries.remove(app_id);
                }
                None => {}
            }

            match state.pending.get(app_id) {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(false);
                    let _ = state.pending.insert(app_id.to_string(), rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Leader(tx) => {
                tracing::info!(app_id, "starting attestation verification");
                let verification = verify();
                let cache = self.clone();
                let app_id_owned = app_id.to_string();

                let handle = tokio::spawn(async move {
                    let result = verification.await;
                    let cached = cache.put(&app_id_owned, result);
                    let mut state = cache.lock();
                    let _ = state.pending.remove(&app_id_owned);
                    let _ = tx.send(true);
                    cached
                });

                handle
                    .await
                    .map_err(|e| CacheError::VerificationTask(e.to_string()))
            }
            Role::Follower(mut rx) => {
                if rx.wait_for(|done| *done).await.is_err() {
                    // The leader died without signalling. Clear its stale
                    // flight marker so the next caller can start over.
                    let mut state = self.lock();
                    if let Some(stale) = state.pending.get(app_id) {
                        if stale.same_channel(&rx) {
                            let _ = state.pending.remove(app_id);
                        }
                    }
                }

                self.get(app_id)
                    .ok_or_else(|| CacheError::Incomplete(app_id.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DcapStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn passing_result() -> ChainVerificationResult {
        ChainVerificationResult {
            dcap: DcapResult {
                verified: true,
                status: DcapStatus::Ok,
                tcb_status: Some("up_to_date".to_string()),
                collateral_expiry: None,
                error: None,
            },
            provenance: ProvenanceResult {
                verified: true,
                signer_identity: None,
                workflow_ref: None,
                build_trigger: None,
                repository: None,
                error: None,
            },
            measurements: MeasurementResult {
                verified: true,
                mrtd_match: true,
                rtmr0_match: true,
                rtmr1_match: true,
                rtmr2_match: true,
                rtmr3_match: true,
                actual: None,
                expected: None,
                error: None,
            },
        }
    }

    #[test]
    fn test_put_then_get_within_ttl() {
        let cache = AttestationCache::new(300);
        let stored = cache.put("app", passing_result());
        assert!(stored.expires_at > stored.cached_at);

        let hit = cache.get("app").unwrap();
        assert!(hit.verified);
        assert_eq!(hit.cached_at, stored.cached_at);
    }

    #[test]
    fn test_expired_entry_removed_on_first_read() {
        let cache = AttestationCache::new(0);
        let _ = cache.put("app", passing_result());
        assert_eq!(cache.stats().total_entries, 1);

        assert!(cache.get("app").is_none());
        // The stale entry was deleted by the read, not just hidden.
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn test_invalidate() {
        let cache = AttestationCache::new(300);
        let _ = cache.put("app", passing_result());
        cache.invalidate("app");
        assert!(cache.get("app").is_none());
    }

    #[test]
    fn test_stats_counts_valid_and_expired() {
        let cache = AttestationCache::new(300);
        let _ = cache.put("a", passing_result());
        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.valid_entries, 1);
        assert_eq!(stats.expired_entries, 0);
        assert_eq!(stats.ttl_seconds, 300);
    }

    #[tokio::test]
    async fn test_single_flight_coalesces_concurrent_misses() {
        let cache = AttestationCache::new(300);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_verify("app", move || async move {
                        let _ = calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(StdDuration::from_millis(50)).await;
                        passing_result()
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = &results[0];
        assert!(results.iter().all(|r| r.cached_at == first.cached_at));
    }

    #[tokio::test]
    async fn test_failure_verdicts_are_cached() {
        let cache = AttestationCache::new(300);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let cached = cache
                .get_or_verify("app", move || async move {
                    let _ = calls.fetch_add(1, Ordering::SeqCst);
                    let mut result = passing_result();
                    result.dcap.verified = false;
                    result.dcap.status = DcapStatus::Revoked;
                    result
                })
                .await
                .unwrap();
            assert!(!cached.verified);
            assert_eq!(cached.dcap.status, DcapStatus::Revoked);
        }

        // Second and third calls were served from the cache.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_leader_panic_surfaces_as_error_and_unblocks() {
        let cache = AttestationCache::new(300);

        let leader = cache
            .get_or_verify("app", || async {
                panic!("verifier blew up");
            })
            .await;
        assert!(matches!(leader, Err(CacheError::VerificationTask(_))));

        // The next caller observes the dead flight as an explicit error and
        // clears the stale marker while doing so.
        let follower = cache
            .get_or_verify("app", || async { passing_result() })
            .await;
        assert!(matches!(follower, Err(CacheError::Incomplete(_))));

        // After that the flight is gone and verification starts afresh.
        let retry = cache
            .get_or_verify("app", || async { passing_result() })
            .await
            .unwrap();
        assert!(retry.verified);
    }
}
