//! Binding values: an ordered sequence of `(name, value)` pairs, Vesta's
//! stand-in for both directories and records.
//!
//! Grounded on `examples/original_source/progs/vestaeval/Val.H`'s `VBinding`.

use crate::deppath::{Arc, DepPath, PathKind};
use crate::dpaths::DPaths;
use crate::fp::{variant_tag, Tag, VariantSalt};

use super::Value;

#[derive(Clone, Debug, Default)]
pub struct Binding {
    entries: Vec<(String, Value)>,
    deps: DPaths,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<(String, Value)>) -> Self {
        Binding {
            entries,
            deps: DPaths::empty(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn deps(&self) -> &DPaths {
        &self.deps
    }

    /// Names are unique within a binding (see [`Binding::insert`]), so a
    /// forward or reverse scan finds the same entry; this scans from the
    /// end since callers that just inserted a name usually look it up next.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Whether `name` is bound at all, without observing the value — the
    /// caller should record a `Bang`-kind dependency for this query rather
    /// than a `Norm`-kind one.
    pub fn is_bound(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Insert (name, child) at the end. When `accumulate`, `child`'s nested
    /// deps are rooted under `name` and folded into this binding's deps.
    /// Names are unique within a binding: returns `false` without inserting
    /// if `name` is already bound, leaving the caller to report the
    /// duplicate as an evaluation error.
    pub fn insert(&mut self, name: impl Into<String>, child: Value, accumulate: bool) -> bool {
        let name = name.into();
        if self.is_bound(&name) {
            return false;
        }
        if accumulate {
            if let Some(child_deps) = child.inner_deps() {
                for (path, value) in child_deps.iter() {
                    let rooted =
                        path.extend_low(&DepPath::singleton(Arc::name(&name), PathKind::Norm));
                    self.deps.put(rooted, value.clone());
                }
            }
        }
        self.entries.push((name, child));
        true
    }

    pub fn fingerprint(&self) -> Tag {
        self.entries
            .iter()
            .fold(variant_tag(VariantSalt::Binding), |acc, (name, value)| {
                acc.extend(name.as_bytes())
                    .extend(value.fingerprint().as_bytes())
            })
    }

    pub fn len_fingerprint(&self) -> Tag {
        variant_tag(VariantSalt::Binding).extend((self.entries.len() as u32).to_be_bytes())
    }
}

impl PartialEq for Binding {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}
impl Eq for Binding {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_name_is_rejected() {
        let mut b = Binding::new();
        assert!(b.insert("x", Value::Integer(1), false));
        assert!(!b.insert("x", Value::Integer(2), false));
        assert_eq!(b.lookup("x"), Some(&Value::Integer(1)));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn fingerprint_distinguishes_name_order() {
        let mut a = Binding::new();
        a.insert("x", Value::Integer(1), false);
        a.insert("y", Value::Integer(2), false);

        let mut b = Binding::new();
        b.insert("y", Value::Integer(2), false);
        b.insert("x", Value::Integer(1), false);

        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
