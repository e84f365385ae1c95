//! Wire representation of a dependency path, shared between the evaluator's
//! internal `DepPath` type and the cache protocol.
//!
//! This mirrors the split in the teacher crate between `hurry`'s internal
//! `Fingerprint`/`UnitPlan` types and the plain DTOs in `clients` that travel
//! over the wire: the evaluator owns the rich, cached-fingerprint-bearing
//! `DepPath`, and converts to/from this flat, serde-friendly shape at the
//! protocol boundary.

use serde::{Deserialize, Serialize};

/// What feature of a subvalue a dependency observes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WirePathKind {
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
    /// Placeholder kind used for paths that carry no real observation.
    Dummy,
}

/// One step through a value: either a named field or a decimal list index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireArc {
    Name(String),
    Index(u32),
}

impl WireArc {
    /// Render the arc the way the evaluator's arc-table keys do: names are
    /// literal, indices use the `##n` decimal form.
    pub fn as_text(&self) -> String {
        match self {
            WireArc::Name(name) => name.clone(),
            WireArc::Index(index) => format!("##{index}"),
        }
    }
}

/// A path from a named root through a value, tagged by [`WirePathKind`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WirePath {
    pub kind: WirePathKind,
    pub arcs: Vec<WireArc>,
}

impl WirePath {
    pub fn new(kind: WirePathKind, arcs: Vec<WireArc>) -> Self {
        Self { kind, arcs }
    }

    /// The first arc, if any. Used by the cache to decide which paths are
    /// "restricted" to a given root name.
    pub fn first_arc(&self) -> Option<&WireArc> {
        self.arcs.first()
    }
}
