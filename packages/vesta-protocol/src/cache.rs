//! Client-side interface to the remote application cache.
//!
//! Per the evaluator's scope, the cache server itself is an external
//! collaborator (spec §1): this module defines only the request/response
//! shapes and the [`CacheClient`] trait boundary, plus [`MemoryCache`], an
//! in-process double used by tests. There is no persistent storage layout
//! here, matching the "no persistent cache storage layout" non-goal.
//!
//! Grounded on `clients::courier::v1::cache` (`CargoSaveRequest`,
//! `CargoRestoreRequest`/`Response`) for the request/response DTO shape, and
//! on `hurry::cache::CacheBackend` for the trait-boundary idiom (one trait,
//! multiple backends, backends are `Clone + Send + Sync`).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use color_eyre::Result;
use serde::{Deserialize, Serialize};

use crate::{path::WirePath, tag::Tag};

/// Primary key: a fingerprint summarizing the stable inputs of a cached call.
pub type Pk = Tag;

/// Cache versioning counter; invalidates stale free-variable lists between a
/// concurrent `AddEntry` and a `Lookup`.
pub type Epoch = u64;

/// Integer id of a cache entry.
pub type Ci = u64;

/// Response to `FreeVariables(pk)`: the set of paths the cache wants
/// fingerprinted before it will accept a `Lookup`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FreeVariablesResponse {
    pub epoch: Epoch,
    pub paths: Vec<WirePath>,
    /// True if the cache has never seen an entry for this PK.
    pub no_entry: bool,
}

/// Result of a `Lookup(pk, epoch, tags)` call.
#[derive(Clone, Debug)]
pub enum LookupOutcome {
    /// A matching entry was found.
    Hit { ci: Ci, pickled: Vec<u8> },
    /// No entry matches these tags, but the PK and epoch were valid.
    Miss,
    /// Another thread added an entry between `FreeVariables` and `Lookup`;
    /// the caller should retry the whole protocol loop.
    FvMismatch,
}

/// Request to add a freshly computed entry to the cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddEntryRequest {
    pub pk: Pk,
    /// One entry per secondary-key path: `(path, tag)`.
    pub secondary_key: Vec<(WirePath, Tag)>,
    pub pickled: Vec<u8>,
    pub model_sid: Option<u32>,
    pub child_cis: Vec<Ci>,
    pub source_label: String,
}

/// Result of an `AddEntry` call.
#[derive(Clone, Debug)]
pub enum AddEntryOutcome {
    EntryAdded(Ci),
}

/// The cache protocol described in spec §4.3 and §6: `FreeVariables`,
/// `Lookup`, `AddEntry`, `Checkpoint`, `RenewLeases`. Every method is
/// blocking: per spec §5, "any cache RPC" is a suspension point for the
/// calling evaluator thread, so there is no async boundary to model here.
pub trait CacheClient: Send + Sync {
    fn free_variables(&self, pk: Pk) -> Result<FreeVariablesResponse>;
    fn lookup(&self, pk: Pk, epoch: Epoch, tags: &[Tag]) -> Result<LookupOutcome>;
    fn add_entry(&self, req: AddEntryRequest) -> Result<AddEntryOutcome>;
    fn checkpoint(
        &self,
        model_tag: Tag,
        model_sid: Option<u32>,
        orphan_cis: &[Ci],
        is_final: bool,
    ) -> Result<()>;
    /// Renew the leases on the given cache indices. Returns `false` if the
    /// server rejected the renewal (e.g. entries were already weeded).
    fn renew_leases(&self, cis: &[Ci]) -> Result<bool>;
}

#[derive(Default)]
struct StoredEntry {
    epoch: Epoch,
    secondary_key: Vec<(WirePath, Tag)>,
    pickled: Vec<u8>,
}

/// In-memory [`CacheClient`] double. Not a reimplementation of the real
/// cache server (out of scope): it exists so the `ApplyCache` protocol driver
/// can be exercised end to end in tests without a network dependency.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<Pk, StoredEntry>>>,
    leases: Arc<Mutex<HashMap<Ci, bool>>>,
    next_ci: Arc<Mutex<Ci>>,
    add_entry_calls: Arc<Mutex<u64>>,
    checkpoints: Arc<Mutex<Vec<Vec<Ci>>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `AddEntry` calls this instance has served, for tests that
    /// assert on checkpoint cadence.
    pub fn add_entry_count(&self) -> u64 {
        *self.add_entry_calls.lock().unwrap()
    }

    pub fn lease_count(&self) -> usize {
        self.leases.lock().unwrap().len()
    }

    pub fn is_leased(&self, ci: Ci) -> bool {
        self.leases.lock().unwrap().contains_key(&ci)
    }

    /// The orphan-CI batches reported via `checkpoint`, in call order, for
    /// tests that assert on checkpoint cadence and child-claiming.
    pub fn checkpoints(&self) -> Vec<Vec<Ci>> {
        self.checkpoints.lock().unwrap().clone()
    }
}

impl CacheClient for MemoryCache {
    fn free_variables(&self, pk: Pk) -> Result<FreeVariablesResponse> {
        let entries = self.entries.lock().unwrap();
        match entries.get(&pk) {
            Some(entry) => Ok(FreeVariablesResponse {
                epoch: entry.epoch,
                paths: entry.secondary_key.iter().map(|(p, _)| p.clone()).collect(),
                no_entry: false,
            }),
            None => Ok(FreeVariablesResponse {
                epoch: 0,
                paths: Vec::new(),
                no_entry: true,
            }),
        }
    }

    fn lookup(&self, pk: Pk, epoch: Epoch, tags: &[Tag]) -> Result<LookupOutcome> {
        let entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get(&pk) else {
            return Ok(LookupOutcome::Miss);
        };
        if entry.epoch != epoch {
            return Ok(LookupOutcome::FvMismatch);
        }
        let expected: Vec<Tag> = entry.secondary_key.iter().map(|(_, t)| *t).collect();
        if expected == tags {
            let ci = {
                let mut next = self.next_ci.lock().unwrap();
                *next += 1;
                *next
            };
            self.leases.lock().unwrap().insert(ci, true);
            Ok(LookupOutcome::Hit {
                ci,
                pickled: entry.pickled.clone(),
            })
        } else {
            Ok(LookupOutcome::Miss)
        }
    }

    fn add_entry(&self, req: AddEntryRequest) -> Result<AddEntryOutcome> {
        let ci = {
            let mut next = self.next_ci.lock().unwrap();
            *next += 1;
            *next
        };
        let mut entries = self.entries.lock().unwrap();
        let epoch = entries.get(&req.pk).map(|e| e.epoch + 1).unwrap_or(1);
        entries.insert(
            req.pk,
            StoredEntry {
                epoch,
                secondary_key: req.secondary_key,
                pickled: req.pickled,
            },
        );
        drop(entries);
        self.leases.lock().unwrap().insert(ci, true);
        *self.add_entry_calls.lock().unwrap() += 1;
        Ok(AddEntryOutcome::EntryAdded(ci))
    }

    fn checkpoint(
        &self,
        _model_tag: Tag,
        _model_sid: Option<u32>,
        orphan_cis: &[Ci],
        _is_final: bool,
    ) -> Result<()> {
        self.checkpoints.lock().unwrap().push(orphan_cis.to_vec());
        Ok(())
    }

    fn renew_leases(&self, cis: &[Ci]) -> Result<bool> {
        let mut leases = self.leases.lock().unwrap();
        for ci in cis {
            leases.insert(*ci, true);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{WireArc, WirePathKind};

    fn path(name: &str) -> WirePath {
        WirePath::new(WirePathKind::Norm, vec![WireArc::Name(name.into())])
    }

    #[test]
    fn miss_then_hit_after_add_entry() {
        let cache = MemoryCache::new();
        let pk = Tag::of(b"pk-1");

        let fv = cache.free_variables(pk).unwrap();
        assert!(fv.no_entry);

        let outcome = cache.lookup(pk, fv.epoch, &[]).unwrap();
        assert!(matches!(outcome, LookupOutcome::Miss));

        let tag = Tag::of(b"src-content");
        let added = cache
            .add_entry(AddEntryRequest {
                pk,
                secondary_key: vec![(path("src/main.c"), tag)],
                pickled: b"result".to_vec(),
                model_sid: None,
                child_cis: vec![],
                source_label: "test".into(),
            })
            .unwrap();
        assert!(matches!(added, AddEntryOutcome::EntryAdded(_)));

        let fv2 = cache.free_variables(pk).unwrap();
        assert!(!fv2.no_entry);
        assert_eq!(fv2.paths, vec![path("src/main.c")]);

        let hit = cache.lookup(pk, fv2.epoch, &[tag]).unwrap();
        assert!(matches!(hit, LookupOutcome::Hit { .. }));
    }

    #[test]
    fn stale_epoch_is_fv_mismatch() {
        let cache = MemoryCache::new();
        let pk = Tag::of(b"pk-2");
        cache
            .add_entry(AddEntryRequest {
                pk,
                secondary_key: vec![],
                pickled: vec![],
                model_sid: None,
                child_cis: vec![],
                source_label: "test".into(),
            })
            .unwrap();
        let outcome = cache.lookup(pk, 0, &[]).unwrap();
        assert!(matches!(outcome, LookupOutcome::FvMismatch));
    }

    #[test]
    fn changed_tag_misses() {
        let cache = MemoryCache::new();
        let pk = Tag::of(b"pk-3");
        cache
            .add_entry(AddEntryRequest {
                pk,
                secondary_key: vec![(path("a"), Tag::of(b"1"))],
                pickled: vec![],
                model_sid: None,
                child_cis: vec![],
                source_label: "test".into(),
            })
            .unwrap();
        let fv = cache.free_variables(pk).unwrap();
        let outcome = cache.lookup(pk, fv.epoch, &[Tag::of(b"2")]).unwrap();
        assert!(matches!(outcome, LookupOutcome::Miss));
    }

    #[test]
    fn renew_leases_tracks_ci() {
        let cache = MemoryCache::new();
        assert!(cache.renew_leases(&[1, 2, 3]).unwrap());
        assert!(cache.is_leased(1));
        assert_eq!(cache.lease_count(), 3);
    }
}
