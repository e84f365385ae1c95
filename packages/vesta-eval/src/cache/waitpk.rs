//! `WaitPKTable`: suppresses duplicate concurrent computation of the same
//! cache entry.
//!
//! Grounded on `examples/original_source/progs/vestaeval/ApplyCache.H`'s
//! wait-table described in spec §4.3: when two evaluator threads race to
//! compute the same PK, the loser blocks on the winner's result instead of
//! repeating the (possibly expensive) tool invocation.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::cache::protocol::CacheResult;
use crate::fp::Tag;

type SlotResult = Result<CacheResult, String>;

#[derive(Default)]
struct Slot {
    result: Mutex<Option<SlotResult>>,
    ready: Condvar,
}

/// Tracks in-flight computations keyed by PK, so a second thread asking for
/// the same PK waits on the first rather than recomputing.
#[derive(Clone, Default)]
pub struct WaitPkTable {
    inflight: Arc<DashMap<Tag, Arc<Slot>>>,
}

pub enum Claim {
    /// This call is the first for `pk`; the caller must compute the result
    /// and call [`WaitPkTable::publish`] when done.
    Owner,
    /// Another thread is already computing `pk`; the result, once it
    /// arrives, is returned here.
    Follower(SlotResult),
}

impl WaitPkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the right to compute `pk`, or block until another thread that
    /// already claimed it publishes a result.
    pub fn claim(&self, pk: Tag) -> Claim {
        let (slot, is_owner) = match self.inflight.entry(pk) {
            dashmap::mapref::entry::Entry::Occupied(e) => (e.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let slot = Arc::new(Slot::default());
                e.insert(slot.clone());
                (slot, true)
            }
        };

        if is_owner {
            return Claim::Owner;
        }

        let mut guard = slot.result.lock();
        while guard.is_none() {
            slot.ready.wait(&mut guard);
        }
        Claim::Follower(guard.clone().expect("checked above"))
    }

    /// Publish the computed result (or failure) for `pk` and wake any
    /// followers.
    pub fn publish(&self, pk: Tag, result: SlotResult) {
        if let Some((_, slot)) = self.inflight.remove(&pk) {
            *slot.result.lock() = Some(result);
            slot.ready.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::protocol::CacheResult;
    use crate::value::Value;

    #[test]
    fn first_claimant_is_owner_second_is_follower() {
        let table = WaitPkTable::new();
        let pk = Tag::of(b"pk");
        assert!(matches!(table.claim(pk), Claim::Owner));

        let table2 = table.clone();
        let handle = std::thread::spawn(move || matches!(table2.claim(pk), Claim::Follower(_)));

        // Give the follower a moment to start waiting before publishing.
        std::thread::sleep(std::time::Duration::from_millis(20));
        table.publish(
            pk,
            Ok(CacheResult {
                value: Value::Integer(1),
                ci: Some(1),
                deps: crate::dpaths::DPaths::empty(),
            }),
        );
        assert!(handle.join().unwrap());
    }
}
