//! `DPaths`: a set of `DepPath`, each carrying the subvalue observed at that
//! path (retained for verification and re-pickling, per spec §3).
//!
//! Grounded on `examples/original_source/progs/vestaeval/Dep.H`'s
//! `DepPathTbl::DPS` (a `SharedTable<DepPath, Val>`); reworked as a
//! `HashMap<DepPath, Value>` since `DepPath`'s `Hash`/`Eq` already implement
//! the `(fingerprint, kind)` identity spec §8 invariant 3 requires.

use std::collections::HashMap;

use crate::deppath::{Arc, DepPath};
use crate::value::Value;

/// A set of dependency paths, each remembering the value observed there.
#[derive(Clone, Debug, Default)]
pub struct DPaths {
    entries: HashMap<DepPath, Value>,
}

impl DPaths {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record one observation. Overwrites any existing entry with the same
    /// `(fingerprint, kind)` — the original's `Add` has the same last-write
    /// behavior since a `SharedTable` insert replaces on key collision.
    pub fn put(&mut self, path: DepPath, value: Value) {
        self.entries.insert(path, value);
    }

    pub fn contains(&self, path: &DepPath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &DepPath) -> Option<&Value> {
        self.entries.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DepPath, &Value)> {
        self.entries.iter()
    }

    pub fn into_iter(self) -> impl Iterator<Item = (DepPath, Value)> {
        self.entries.into_iter()
    }

    /// Union in another set's entries, keeping `self`'s entry on conflict
    /// (mirrors the original's `Union`, which is actually an alias for
    /// `Copy`-based merge where the receiver's existing entries win).
    pub fn union(mut self, other: &DPaths) -> DPaths {
        for (path, value) in other.entries.iter() {
            self.entries
                .entry(path.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    pub fn union_in_place(&mut self, other: &DPaths) {
        for (path, value) in other.entries.iter() {
            self.entries
                .entry(path.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Entries in `self` that are not in `other`.
    pub fn difference(&self, other: &DPaths) -> DPaths {
        DPaths {
            entries: self
                .entries
                .iter()
                .filter(|(path, _)| !other.entries.contains_key(*path))
                .map(|(p, v)| (p.clone(), v.clone()))
                .collect(),
        }
    }

    /// Entries present in both `self` and `other` (values taken from `self`).
    pub fn intersection(&self, other: &DPaths) -> DPaths {
        DPaths {
            entries: self
                .entries
                .iter()
                .filter(|(path, _)| other.entries.contains_key(*path))
                .map(|(p, v)| (p.clone(), v.clone()))
                .collect(),
        }
    }

    /// Intersect a slice of sets pairwise, per the original's static
    /// `Intersection(DPS *psList[], unsigned int len)`.
    pub fn intersection_all(sets: &[DPaths]) -> DPaths {
        match sets.split_first() {
            None => DPaths::empty(),
            Some((first, rest)) => rest
                .iter()
                .fold(first.clone(), |acc, next| acc.intersection(next)),
        }
    }

    /// Keep only the entries whose first arc equals `arc`.
    pub fn restrict(&self, arc: &Arc) -> DPaths {
        DPaths {
            entries: self
                .entries
                .iter()
                .filter(|(path, _)| path.first_arc() == Some(arc))
                .map(|(p, v)| (p.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn contains_prefix(&self, arc: &Arc) -> bool {
        self.entries
            .keys()
            .any(|path| path.first_arc() == Some(arc))
    }
}

impl FromIterator<(DepPath, Value)> for DPaths {
    fn from_iter<I: IntoIterator<Item = (DepPath, Value)>>(iter: I) -> Self {
        DPaths {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deppath::PathKind;
    use crate::value::Value;

    fn path(name: &str) -> DepPath {
        DepPath::singleton(Arc::name(name), PathKind::Norm)
    }

    #[test]
    fn no_duplicate_fingerprint_kind_pairs() {
        let mut dps = DPaths::empty();
        dps.put(path("a"), Value::Integer(1));
        dps.put(path("a"), Value::Integer(2));
        assert_eq!(dps.len(), 1);
        assert_eq!(dps.get(&path("a")), Some(&Value::Integer(2)));
    }

    #[test]
    fn restrict_keeps_matching_prefix() {
        let mut dps = DPaths::empty();
        dps.put(path("a"), Value::Integer(1));
        dps.put(path("b"), Value::Integer(2));
        let restricted = dps.restrict(&Arc::name("a"));
        assert_eq!(restricted.len(), 1);
        assert!(restricted.contains(&path("a")));
    }

    #[test]
    fn difference_and_intersection() {
        let mut a = DPaths::empty();
        a.put(path("x"), Value::Integer(1));
        a.put(path("y"), Value::Integer(2));
        let mut b = DPaths::empty();
        b.put(path("y"), Value::Integer(2));

        let diff = a.difference(&b);
        assert_eq!(diff.len(), 1);
        assert!(diff.contains(&path("x")));

        let inter = a.intersection(&b);
        assert_eq!(inter.len(), 1);
        assert!(inter.contains(&path("y")));
    }
}
