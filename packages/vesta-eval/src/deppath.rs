//! `PathKind` and `DepPath`: a path from a named root through a value,
//! tagged by what feature of the subvalue is being observed.
//!
//! Grounded on `examples/original_source/progs/vestaeval/Dep.H`'s
//! `PathKind`/`DepPathC`, reworked into an owned, `Clone`-able Rust value
//! (the original keeps a hand-rolled `DepPathC*` content pointer and a
//! `DeepCopy` method; here ordinary `Vec`/`Arc` cloning plays that role).

use std::fmt;

use derive_more::Debug;
use vesta_protocol::path::{WireArc, WirePath, WirePathKind};

use crate::fp::Tag;

/// What feature of a subvalue a dependency observes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PathKind {
    /// The value itself.
    Norm,
    /// Presence/absence at a binding key.
    Bang,
    /// The type tag of a value.
    Type,
    /// The length of a list.
    ListLen,
    /// The length (arity) of a binding.
    BindingLen,
    /// Closure-body identity.
    Expr,
    /// A path with no real observation (used as a placeholder during
    /// construction, mirroring the original's `DummyPK`).
    Dummy,
}

impl PathKind {
    fn wire(self) -> WirePathKind {
        match self {
            PathKind::Norm => WirePathKind::Norm,
            PathKind::Bang => WirePathKind::Bang,
            PathKind::Type => WirePathKind::Type,
            PathKind::ListLen => WirePathKind::ListLen,
            PathKind::BindingLen => WirePathKind::BindingLen,
            PathKind::Expr => WirePathKind::Expr,
            PathKind::Dummy => WirePathKind::Dummy,
        }
    }

    fn from_wire(kind: WirePathKind) -> Self {
        match kind {
            WirePathKind::Norm => PathKind::Norm,
            WirePathKind::Bang => PathKind::Bang,
            WirePathKind::Type => PathKind::Type,
            WirePathKind::ListLen => PathKind::ListLen,
            WirePathKind::BindingLen => PathKind::BindingLen,
            WirePathKind::Expr => PathKind::Expr,
            WirePathKind::Dummy => PathKind::Dummy,
        }
    }
}

/// One step through a value: either a named field or the decimal form of a
/// list index (`##n`, per spec §3).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Arc {
    Name(String),
    Index(u32),
}

impl Arc {
    pub fn name(s: impl Into<String>) -> Self {
        Arc::Name(s.into())
    }

    fn wire(&self) -> WireArc {
        match self {
            Arc::Name(s) => WireArc::Name(s.clone()),
            Arc::Index(i) => WireArc::Index(*i),
        }
    }

    fn from_wire(arc: &WireArc) -> Self {
        match arc {
            WireArc::Name(s) => Arc::Name(s.clone()),
            WireArc::Index(i) => Arc::Index(*i),
        }
    }

    fn tag_bytes(&self) -> Vec<u8> {
        match self {
            Arc::Name(s) => {
                let mut bytes = vec![0u8];
                bytes.extend(s.as_bytes());
                bytes
            }
            Arc::Index(i) => {
                let mut bytes = vec![1u8];
                bytes.extend(i.to_be_bytes());
                bytes
            }
        }
    }
}

impl fmt::Display for Arc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arc::Name(s) => write!(f, "{s}"),
            Arc::Index(i) => write!(f, "##{i}"),
        }
    }
}

/// A path through a value, plus a cached fingerprint of its arc sequence so
/// equality (`(fingerprint, kind)`, per spec §3) is O(1) instead of
/// re-walking the arc list.
#[derive(Clone, Debug)]
pub struct DepPath {
    pub kind: PathKind,
    arcs: Vec<Arc>,
    #[debug(skip)]
    fingerprint: Tag,
}

impl DepPath {
    /// Construct a path with a single arc.
    pub fn singleton(arc: Arc, kind: PathKind) -> Self {
        let fingerprint = Tag::ZERO.extend(arc.tag_bytes());
        Self {
            kind,
            arcs: vec![arc],
            fingerprint,
        }
    }

    /// Construct the empty path (the root itself) with the given kind.
    pub fn root(kind: PathKind) -> Self {
        Self {
            kind,
            arcs: Vec::new(),
            fingerprint: Tag::ZERO,
        }
    }

    pub fn from_arcs(arcs: Vec<Arc>, kind: PathKind) -> Self {
        let fingerprint = arcs
            .iter()
            .fold(Tag::ZERO, |acc, a| acc.extend(a.tag_bytes()));
        Self {
            kind,
            arcs,
            fingerprint,
        }
    }

    pub fn arcs(&self) -> &[Arc] {
        &self.arcs
    }

    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    pub fn first_arc(&self) -> Option<&Arc> {
        self.arcs.first()
    }

    /// Extend this path (order-preserving) by one more arc at the end,
    /// producing a new path with the given kind.
    pub fn extend(&self, arc: Arc, kind: PathKind) -> DepPath {
        let mut arcs = self.arcs.clone();
        let fingerprint = self.fingerprint.extend(arc.tag_bytes());
        arcs.push(arc);
        DepPath {
            kind,
            arcs,
            fingerprint,
        }
    }

    /// Extend this path (destructively, conceptually) by splicing `other`'s
    /// arcs onto the front: the result lives at `other / self`. Used when
    /// rescoping a dependency that was recorded relative to a formal
    /// parameter back into the caller's scope (spec §4.4).
    pub fn extend_low(&self, prefix: &DepPath) -> DepPath {
        let mut arcs = prefix.arcs.clone();
        arcs.extend(self.arcs.iter().cloned());
        DepPath::from_arcs(arcs, self.kind)
    }

    /// Return a copy of this path with the first arc removed, if it matches
    /// `name`. Used by let-collapse (spec §4.4) to strip a local binding
    /// name from a dependency path before re-rooting it.
    pub fn strip_prefix_arc(&self, name: &str) -> Option<DepPath> {
        match self.arcs.first() {
            Some(Arc::Name(n)) if n == name => {
                Some(DepPath::from_arcs(self.arcs[1..].to_vec(), self.kind))
            }
            _ => None,
        }
    }

    pub fn fingerprint(&self) -> Tag {
        self.fingerprint
    }

    pub fn to_wire(&self) -> WirePath {
        WirePath::new(self.kind.wire(), self.arcs.iter().map(Arc::wire).collect())
    }

    pub fn from_wire(wire: &WirePath) -> Self {
        let arcs = wire.arcs.iter().map(Arc::from_wire).collect::<Vec<_>>();
        DepPath::from_arcs(arcs, PathKind::from_wire(wire.kind))
    }
}

impl PartialEq for DepPath {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint && self.kind == other.kind
    }
}
impl Eq for DepPath {}

impl std::hash::Hash for DepPath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
        std::mem::discriminant(&self.kind).hash(state);
    }
}

impl fmt::Display for DepPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arc) in self.arcs.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{arc}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_fingerprint_and_kind() {
        let a = DepPath::singleton(Arc::name("x"), PathKind::Norm);
        let b = DepPath::singleton(Arc::name("x"), PathKind::Norm);
        assert_eq!(a, b);

        let c = DepPath::singleton(Arc::name("x"), PathKind::Bang);
        assert_ne!(a, c);
    }

    #[test]
    fn extend_then_strip_round_trips() {
        let base = DepPath::root(PathKind::Norm);
        let extended = base.extend(Arc::name("src"), PathKind::Norm);
        let stripped = extended.strip_prefix_arc("src").unwrap();
        assert!(stripped.is_empty());
    }

    #[test]
    fn wire_round_trip() {
        let path = DepPath::root(PathKind::Norm)
            .extend(Arc::name("root"), PathKind::Norm)
            .extend(Arc::Index(3), PathKind::Norm);
        let wire = path.to_wire();
        let back = DepPath::from_wire(&wire);
        assert_eq!(path, back);
        assert_eq!(back.arcs().len(), 2);
    }

    #[test]
    fn index_arc_displays_decimal_form() {
        let path = DepPath::root(PathKind::Norm).extend(Arc::Index(7), PathKind::Norm);
        assert_eq!(path.to_string(), "##7");
    }
}
