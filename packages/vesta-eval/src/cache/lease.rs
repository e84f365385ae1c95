//! Lease renewal: a background task that periodically tells the cache
//! server which CIs this evaluator run still cares about, so the server
//! doesn't weed entries a long-running build is still holding onto.
//!
//! Grounded on `examples/original_source/progs/vestaeval/ApplyCache.H`'s
//! `StartRenewLeaseThread` (a 10-second renewal loop) and on
//! `hurry::daemon::IdleState::monitor`'s shape for a `tokio::spawn` polling
//! loop with a shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tracing::{debug, warn};
use vesta_protocol::cache::{CacheClient, Ci};

const RENEW_INTERVAL: Duration = Duration::from_secs(10);

/// The set of CIs currently held by this evaluator run. Entries are added
/// as cache hits/adds occur and removed once nothing in the running
/// evaluation depends on them anymore.
#[derive(Clone, Default)]
pub struct LeaseSet {
    held: Arc<DashSet<Ci>>,
    /// Set once the background renewal loop fails to renew a held lease.
    /// A CI held before the failure may since have been reclaimed by the
    /// server, so a driver that sees this set can no longer trust that a
    /// `Lookup` hit's CI is still backed by live data.
    failed: Arc<AtomicBool>,
}

impl LeaseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self, ci: Ci) {
        self.held.insert(ci);
    }

    pub fn release(&self, ci: Ci) {
        self.held.remove(&ci);
    }

    pub fn snapshot(&self) -> Vec<Ci> {
        self.held.iter().map(|r| *r).collect()
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Spawn the background renewal loop. Returns a handle whose drop does not
/// stop the task; callers should `.abort()` it explicitly on shutdown.
pub fn spawn_renewal_loop<C>(cache: Arc<C>, leases: LeaseSet) -> tokio::task::JoinHandle<()>
where
    C: CacheClient + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RENEW_INTERVAL);
        loop {
            interval.tick().await;
            let cis = leases.snapshot();
            if cis.is_empty() {
                continue;
            }
            match tokio::task::spawn_blocking({
                let cache = cache.clone();
                move || cache.renew_leases(&cis)
            })
            .await
            {
                Ok(Ok(true)) => debug!(count = leases.snapshot().len(), "renewed cache leases"),
                Ok(Ok(false)) => {
                    warn!("cache server rejected lease renewal");
                    leases.mark_failed();
                }
                Ok(Err(err)) => {
                    warn!(%err, "lease renewal RPC failed");
                    leases.mark_failed();
                }
                Err(join_err) => {
                    warn!(%join_err, "lease renewal task panicked");
                    leases.mark_failed();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_and_release_round_trip() {
        let leases = LeaseSet::new();
        leases.hold(1);
        leases.hold(2);
        assert_eq!(leases.snapshot().len(), 2);
        leases.release(1);
        assert_eq!(leases.snapshot(), vec![2]);
    }
}
