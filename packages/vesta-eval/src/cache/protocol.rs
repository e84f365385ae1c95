//! The `ApplyCache` protocol driver: `FreeVariables` → `Lookup` →
//! (hit | miss-and-`AddEntry`), per spec §4.3.
//!
//! Grounded on `examples/original_source/progs/vestaeval/ApplyCache.H`'s
//! `ApplicationFromCache`/`ModelFromCache` loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use color_eyre::eyre::{bail, Result};
use vesta_protocol::cache::{
    AddEntryRequest, AddEntryOutcome, CacheClient, Ci, LookupOutcome, Pk,
};

use crate::cache::lease::LeaseSet;
use crate::cache::orphan::OrphanTracker;
use crate::cache::stats::CacheStats;
use crate::cache::waitpk::{Claim, WaitPkTable};
use crate::deppath::DepPath;
use crate::dpaths::DPaths;
use crate::fp::Tag;
use crate::pickle;
use crate::value::Value;

/// `AddEntry` calls between `Checkpoint` flushes (spec §4.3 item 6: "every
/// 64th `AddEntry` calls `Checkpoint`").
const CHECKPOINT_INTERVAL: u64 = 64;

/// A path whose current content tag the driver needs before it can ask the
/// cache for a `Lookup` — the evaluator supplies this by re-fingerprinting
/// whatever currently lives at that path in the calling context. Also the
/// resolver a cache hit's pickle re-resolves its dependency values against
/// (`pickle::DepResolver`), so a hit's deps are just as live as a miss's.
pub trait PathResolver: pickle::DepResolver {
    fn resolve_tag(&self, path: &DepPath) -> Option<Tag>;
}

#[derive(Clone, Debug)]
pub struct CacheResult {
    pub value: Value,
    pub ci: Option<Ci>,
    /// The free variables this call's result is sensitive to, so the caller
    /// can fold them into its own deps exactly as it would for a freshly
    /// computed value — a cache hit must be just as sensitive to its inputs
    /// changing as a miss would have been.
    pub deps: DPaths,
}

/// How many times the driver will retry the `FreeVariables`/`Lookup` loop
/// after an `FvMismatch` before giving up. Spec §9's Open Question leaves
/// "unbounded FVMismatch retry" unresolved; DESIGN.md records the decision
/// to bound it rather than spin forever under sustained contention.
const MAX_FV_MISMATCH_RETRIES: u32 = 8;

pub struct ApplyCache<C: CacheClient> {
    cache: C,
    waitpk: WaitPkTable,
    orphan: OrphanTracker,
    leases: LeaseSet,
    add_entry_count: AtomicU64,
    stats: CacheStats,
}

impl<C: CacheClient> ApplyCache<C> {
    pub fn new(cache: C) -> Self {
        ApplyCache {
            cache,
            waitpk: WaitPkTable::new(),
            orphan: OrphanTracker::new(),
            leases: LeaseSet::default(),
            add_entry_count: AtomicU64::new(0),
            stats: CacheStats::new(),
        }
    }

    /// The lease set held by this driver's successful lookups and stores, for
    /// wiring into `lease::spawn_renewal_loop`.
    pub fn leases(&self) -> &LeaseSet {
        &self.leases
    }

    /// Call/hit/miss/elapsed-RPC-time counters, per apply-kind
    /// (`source_label`), for the CLI's `-cstats`/`-mstats` flags.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Look up `pk` in the cache, falling back to `compute` on a miss.
    /// `compute` returns the freshly evaluated value plus the `DPaths` that
    /// determined it; those become the entry's secondary key.
    pub fn apply<F>(
        &self,
        pk: Pk,
        resolver: &dyn PathResolver,
        source_label: &str,
        compute: F,
    ) -> Result<CacheResult>
    where
        F: FnOnce() -> Result<(Value, DPaths)>,
    {
        self.stats.record_call(source_label);
        match self.waitpk.claim(pk) {
            Claim::Follower(Ok(result)) => return Ok(result),
            Claim::Follower(Err(message)) => bail!("peer computation of this call failed: {message}"),
            Claim::Owner => {}
        }

        let outcome = self.apply_owned(pk, resolver, source_label, compute);
        self.waitpk.publish(
            pk,
            outcome
                .as_ref()
                .map(Clone::clone)
                .map_err(|e| e.to_string()),
        );
        outcome
    }

    fn apply_owned<F>(
        &self,
        pk: Pk,
        resolver: &dyn PathResolver,
        source_label: &str,
        compute: F,
    ) -> Result<CacheResult>
    where
        F: FnOnce() -> Result<(Value, DPaths)>,
    {
        let start = Instant::now();
        for _ in 0..MAX_FV_MISMATCH_RETRIES {
            let fv = self.cache.free_variables(pk)?;
            if fv.no_entry {
                let result = self.compute_and_store(pk, source_label, compute)?;
                self.stats.record_miss(source_label, start.elapsed());
                return Ok(result);
            }

            let paths: Vec<DepPath> = fv.paths.iter().map(DepPath::from_wire).collect();
            let tags: Vec<Tag> = paths
                .iter()
                .map(|path| resolver.resolve_tag(path).unwrap_or(Tag::ZERO))
                .collect();

            match self.cache.lookup(pk, fv.epoch, &tags)? {
                LookupOutcome::Hit { ci, pickled } => {
                    if self.leases.has_failed() {
                        bail!(
                            "lease renewal has failed; cannot trust that cache entry {ci} is still live"
                        );
                    }
                    let (value, _deps) = pickle::unpickle(&pickled, resolver)?;
                    self.cache.renew_leases(&[ci])?;
                    self.leases.hold(ci);
                    let mut deps = DPaths::empty();
                    for (path, tag) in paths.iter().zip(tags.iter()) {
                        deps.put(path.clone(), Value::Fp(*tag));
                    }
                    self.stats.record_hit(source_label, start.elapsed());
                    return Ok(CacheResult { value, ci: Some(ci), deps });
                }
                LookupOutcome::Miss => {
                    let result = self.compute_and_store(pk, source_label, compute)?;
                    self.stats.record_miss(source_label, start.elapsed());
                    return Ok(result);
                }
                LookupOutcome::FvMismatch => continue,
            }
        }
        bail!("FreeVariables/Lookup did not converge after {MAX_FV_MISMATCH_RETRIES} retries")
    }

    fn compute_and_store<F>(&self, pk: Pk, source_label: &str, compute: F) -> Result<CacheResult>
    where
        F: FnOnce() -> Result<(Value, DPaths)>,
    {
        // Mark the orphan list before running the body so any entry the body
        // itself supersedes (e.g. a stale sub-call result) is claimed as this
        // entry's child instead of reported to the next checkpoint on its own.
        let mark = self.orphan.mark();
        let (value, deps) = compute()?;
        let child_cis = self.orphan.claim_since(mark);

        let secondary_key = deps
            .iter()
            .map(|(path, observed)| (path.to_wire(), observed.fingerprint()))
            .collect();
        let pickled = pickle::pickle(&value, &deps);

        let AddEntryOutcome::EntryAdded(ci) = self.cache.add_entry(AddEntryRequest {
            pk,
            secondary_key,
            pickled,
            model_sid: None,
            child_cis,
            source_label: source_label.to_string(),
        })?;

        self.leases.hold(ci);

        let count = self.add_entry_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % CHECKPOINT_INTERVAL == 0 {
            self.cache
                .checkpoint(pk, None, &self.orphan.drain(), false)?;
        }

        Ok(CacheResult { value, ci: Some(ci), deps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deppath::{Arc as PathArc, PathKind};
    use vesta_protocol::cache::MemoryCache;

    struct AlwaysTag(Tag);
    impl PathResolver for AlwaysTag {
        fn resolve_tag(&self, _path: &DepPath) -> Option<Tag> {
            Some(self.0)
        }
    }
    impl pickle::DepResolver for AlwaysTag {
        fn resolve(&self, _path: &DepPath) -> Option<Value> {
            None
        }
    }

    #[test]
    fn miss_computes_and_caches_hit() {
        let apply_cache = ApplyCache::new(MemoryCache::new());
        let pk = Tag::of(b"pk");
        let resolver = AlwaysTag(Value::text("content").fingerprint());

        let mut calls = 0;
        let result = apply_cache
            .apply(pk, &resolver, "test", || {
                calls += 1;
                let mut deps = DPaths::empty();
                deps.put(
                    DepPath::singleton(PathArc::name("src"), PathKind::Norm),
                    Value::text("content"),
                );
                Ok((Value::Integer(7), deps))
            })
            .unwrap();
        assert_eq!(result.value, Value::Integer(7));
        assert_eq!(calls, 1);

        let result2 = apply_cache
            .apply(pk, &resolver, "test", || {
                calls += 1;
                Ok((Value::Integer(999), DPaths::empty()))
            })
            .unwrap();
        assert_eq!(result2.value, Value::Integer(7));
        assert_eq!(calls, 1, "second call should have hit the cache");
    }

    #[test]
    fn changed_free_variable_causes_recompute() {
        let apply_cache = ApplyCache::new(MemoryCache::new());
        let pk = Tag::of(b"pk");

        apply_cache
            .apply(pk, &AlwaysTag(Tag::of(b"v1")), "test", || {
                let mut deps = DPaths::empty();
                deps.put(
                    DepPath::singleton(PathArc::name("src"), PathKind::Norm),
                    Value::text("v1"),
                );
                Ok((Value::Integer(1), deps))
            })
            .unwrap();

        let result = apply_cache
            .apply(pk, &AlwaysTag(Tag::of(b"v2")), "test", || {
                let mut deps = DPaths::empty();
                deps.put(
                    DepPath::singleton(PathArc::name("src"), PathKind::Norm),
                    Value::text("v2"),
                );
                Ok((Value::Integer(2), deps))
            })
            .unwrap();
        assert_eq!(result.value, Value::Integer(2));
    }

    #[test]
    fn supersede_reports_orphan_as_new_entrys_child() {
        let apply_cache = ApplyCache::new(MemoryCache::new());
        let pk = Tag::of(b"pk");

        let first = apply_cache
            .apply(pk, &AlwaysTag(Tag::of(b"v1")), "test", || {
                Ok((Value::Integer(1), DPaths::empty()))
            })
            .unwrap();
        let old_ci = first.ci.unwrap();

        let second = apply_cache
            .apply(pk, &AlwaysTag(Tag::of(b"v2")), "test", || {
                apply_cache.orphan.mark_orphan(old_ci);
                let mut deps = DPaths::empty();
                deps.put(
                    DepPath::singleton(PathArc::name("src"), PathKind::Norm),
                    Value::text("v2"),
                );
                Ok((Value::Integer(2), deps))
            })
            .unwrap();

        assert_eq!(second.value, Value::Integer(2));
        assert_eq!(apply_cache.orphan.pending_count(), 0);
    }

    #[test]
    fn checkpoint_fires_every_64th_add_entry() {
        let cache = MemoryCache::new();
        let apply_cache = ApplyCache::new(cache.clone());

        for i in 0..CHECKPOINT_INTERVAL {
            let pk = Tag::of(format!("pk-{i}").as_bytes());
            apply_cache
                .apply(pk, &AlwaysTag(Tag::ZERO), "test", || {
                    Ok((Value::Integer(i as i32), DPaths::empty()))
                })
                .unwrap();
        }

        assert_eq!(cache.add_entry_count(), CHECKPOINT_INTERVAL);
        assert_eq!(cache.checkpoints().len(), 1);
    }
}
