//! List values: an ordered, fixed-length sequence of values.
//!
//! Grounded on `examples/original_source/progs/vestaeval/Val.H`'s `VList`
//! node, which threads a growing `DPaths` alongside the element vector as the
//! evaluator appends elements one at a time (e.g. list-comprehension style
//! construction) so dependencies recorded while evaluating element `i` are
//! attached under `##i` without re-walking earlier elements.

use crate::deppath::{Arc, PathKind};
use crate::dpaths::DPaths;
use crate::fp::{variant_tag, Tag, VariantSalt};

use super::Value;

#[derive(Clone, Debug, Default)]
pub struct ValueList {
    items: Vec<Value>,
    deps: DPaths,
}

impl ValueList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<Value>) -> Self {
        ValueList {
            items,
            deps: DPaths::empty(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    pub fn deps(&self) -> &DPaths {
        &self.deps
    }

    /// Append `child` at the next index. When `accumulate` is set, `child`'s
    /// own deps (if it carries a nested list/binding) are folded into this
    /// list's deps rooted at `##i`; callers that already recorded the
    /// element's deps themselves (e.g. via [`Value::add_to_deps`]) pass
    /// `false` to avoid double-counting.
    pub fn push(&mut self, child: Value, accumulate: bool) {
        let index = self.items.len() as u32;
        if accumulate {
            if let Some(child_deps) = child.inner_deps() {
                for (path, value) in child_deps.iter() {
                    let rooted = path.extend_low(&crate::deppath::DepPath::singleton(
                        Arc::Index(index),
                        PathKind::Norm,
                    ));
                    self.deps.put(rooted, value.clone());
                }
            }
        }
        self.items.push(child);
    }

    pub fn fingerprint(&self) -> Tag {
        self.items
            .iter()
            .fold(variant_tag(VariantSalt::List), |acc, item| {
                acc.extend(item.fingerprint().as_bytes())
            })
    }

    /// The fingerprint of just the length, used for `ListLen`-kind
    /// dependencies: a caller that only observed `len()` should not be
    /// invalidated when an element changes without the length changing.
    pub fn len_fingerprint(&self) -> Tag {
        variant_tag(VariantSalt::List).extend((self.items.len() as u32).to_be_bytes())
    }
}

impl PartialEq for ValueList {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}
impl Eq for ValueList {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_order_sensitive() {
        let mut a = ValueList::new();
        a.push(Value::Integer(1), false);
        a.push(Value::Integer(2), false);

        let mut b = ValueList::new();
        b.push(Value::Integer(2), false);
        b.push(Value::Integer(1), false);

        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn len_fingerprint_ignores_element_identity() {
        let mut a = ValueList::new();
        a.push(Value::Integer(1), false);
        let mut b = ValueList::new();
        b.push(Value::Integer(99), false);
        assert_eq!(a.len_fingerprint(), b.len_fingerprint());
    }
}
