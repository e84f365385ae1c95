//! Dependency re-scoping: translating dependencies recorded against a local
//! name (a let-bound variable, a function parameter, a model parameter) back
//! into the caller's coordinate system once that scope exits.
//!
//! Grounded on `examples/original_source/progs/vestaeval/DepMergeOptimizer.H`,
//! which performs exactly this splice for `LetDpnd`, `FuncDpnd`, and
//! `ModelDpnd` scope exits so a cache entry's free-variable set never
//! mentions a name that is meaningless outside the call that introduced it.

use std::collections::{HashMap, HashSet};

use crate::context::Context;
use crate::deppath::{Arc, DepPath, PathKind};
use crate::dpaths::DPaths;
use crate::value::Value;

/// Where a local name's value came from, if it can be expressed as a path
/// through the caller's own scope (an argument that was itself a bare name
/// or a chain of selects). `None` means the value was synthesized (e.g. a
/// literal or the result of an arithmetic expression) and has no path
/// identity of its own to splice dependencies onto.
pub type Origin<'a> = Option<&'a DepPath>;

/// Rescope `local_deps` (dependencies recorded while `local_name` was bound
/// in scope) back into the caller's frame.
///
/// For each entry whose leading arc is `local_name`:
/// - if `origin` is `Some(path)`, the entry is re-rooted at `path` (the
///   caller-visible location the value came from) via `extend_low`;
/// - if `origin` is `None`, the entry is dropped (the value has no
///   caller-visible path) and `origin_deps` — the dependencies the
///   expression that produced the local value itself recorded — are merged
///   in wholesale instead, once, since the local scope used *that*
///   computation to decide everything it depended on about the local name.
///
/// Entries not rooted at `local_name` pass through unchanged.
pub fn rescope(
    local_deps: &DPaths,
    local_name: &str,
    origin: Origin<'_>,
    origin_deps: &DPaths,
) -> DPaths {
    let mut out = DPaths::empty();
    let mut touched_local = false;

    for (path, value) in local_deps.iter() {
        match path.strip_prefix_arc(local_name) {
            Some(stripped) => {
                touched_local = true;
                if let Some(origin_path) = origin {
                    let rescoped = stripped.extend_low(origin_path);
                    out.put(rescoped, value.clone());
                }
            }
            None => out.put(path.clone(), value.clone()),
        }
    }

    if touched_local && origin.is_none() {
        out.union_in_place(origin_deps);
    }

    out
}

/// Rescope a function/model call's parameter dependencies. Each parameter
/// gets its own origin (the argument expression's path, if it has one) and
/// its own contributing deps (what evaluating the argument itself depended
/// on). Finishes with the two `DepMergeOptimizer`-equivalent canonicalization
/// passes (spec §4.4): drop paths already subsumed by an enclosing dep, then
/// promote paths shared by every sub-value of a composite up to the
/// composite's own dep.
pub fn rescope_call(
    body_deps: &DPaths,
    params: &[String],
    origins: &[Origin<'_>],
    arg_deps: &[DPaths],
    ctx: &Context,
) -> DPaths {
    let mut out = body_deps.clone();
    for ((name, origin), deps) in params.iter().zip(origins.iter()).zip(arg_deps.iter()) {
        out = rescope(&out, name, *origin, deps);
    }
    let out = drop_subsumed(&out);
    promote_shared(&out, ctx)
}

/// The `DepPath` a syntactic path expression (a bare name, or a chain of
/// selects off one) denotes in the *caller's* frame, used as the `origin`
/// for [`rescope`].
pub fn name_origin(name: &str) -> DepPath {
    DepPath::singleton(Arc::name(name), PathKind::Norm)
}

/// Drop any dependency whose path is strictly subsumed by an enclosing dep
/// of the same kind already in the set: a `Norm` dep on `x` already
/// observes everything reachable through `x.*`, so a separately recorded
/// `x.y` dep of the same kind is redundant once `x` itself is a dependency.
pub fn drop_subsumed(deps: &DPaths) -> DPaths {
    let mut out = DPaths::empty();
    'entries: for (path, value) in deps.iter() {
        for (other, _) in deps.iter() {
            if other.kind == path.kind
                && other.len() < path.len()
                && path.arcs().starts_with(other.arcs())
            {
                continue 'entries;
            }
        }
        out.put(path.clone(), value.clone());
    }
    out
}

/// Resolve the value living at a caller-visible path by walking `ctx`,
/// mirroring `modelrun::ContextPathResolver`'s walk but returning the value
/// itself rather than its fingerprint — used only to check whether a set of
/// per-child deps covers every child of their composite parent.
fn resolve_value(ctx: &Context, path: &DepPath) -> Option<Value> {
    let mut arcs = path.arcs().iter();
    let root = match arcs.next()? {
        Arc::Name(name) => name,
        Arc::Index(_) => return None,
    };
    let mut value = ctx.lookup(root)?.clone();
    for arc in arcs {
        value = match (&value, arc) {
            (Value::Binding(b), Arc::Name(n)) => b.lookup(n)?.clone(),
            (Value::List(l), Arc::Index(i)) => l.get(*i as usize)?.clone(),
            _ => return None,
        };
    }
    Some(value)
}

/// Promote `Norm`-kind deps that together cover every child of a composite
/// value up to a single `Norm` dep on the composite itself. Only `Norm`
/// deps are promoted: a dep on the whole value is strictly stronger than
/// any other per-child dep kind, so merging those up would over-constrain
/// the cache entry rather than simplify it.
pub fn promote_shared(deps: &DPaths, ctx: &Context) -> DPaths {
    let mut by_parent: HashMap<Vec<Arc>, Vec<DepPath>> = HashMap::new();
    for (path, _) in deps.iter() {
        if path.kind != PathKind::Norm || path.is_empty() {
            continue;
        }
        let parent_arcs = path.arcs()[..path.len() - 1].to_vec();
        by_parent.entry(parent_arcs).or_default().push(path.clone());
    }

    let mut drop: HashSet<DepPath> = HashSet::new();
    let mut promote: Vec<(DepPath, Value)> = Vec::new();
    for (parent_arcs, children) in by_parent {
        if children.len() < 2 {
            continue;
        }
        let parent_path = DepPath::from_arcs(parent_arcs, PathKind::Norm);
        let Some(parent_value) = resolve_value(ctx, &parent_path) else {
            continue;
        };
        let expected_children = match &parent_value {
            Value::Binding(b) => b.len(),
            Value::List(l) => l.len(),
            _ => continue,
        };
        if children.len() != expected_children {
            continue;
        }
        for child in children {
            drop.insert(child);
        }
        promote.push((parent_path, parent_value));
    }

    if drop.is_empty() {
        return deps.clone();
    }

    let mut out = DPaths::empty();
    for (path, value) in deps.iter() {
        if !drop.contains(path) {
            out.put(path.clone(), value.clone());
        }
    }
    for (path, value) in promote {
        out.put(path, value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn dependency_on_param_reroots_to_argument_path() {
        let mut local = DPaths::empty();
        local.put(
            DepPath::singleton(Arc::name("p"), PathKind::Norm),
            Value::Integer(1),
        );
        let origin = name_origin("caller_arg");
        let rescoped = rescope(&local, "p", Some(&origin), &DPaths::empty());
        assert!(rescoped.contains(&DepPath::singleton(
            Arc::name("caller_arg"),
            PathKind::Norm
        )));
    }

    #[test]
    fn dependency_on_synthesized_arg_merges_origin_deps() {
        let mut local = DPaths::empty();
        local.put(
            DepPath::singleton(Arc::name("p"), PathKind::Norm),
            Value::Integer(1),
        );
        let mut origin_deps = DPaths::empty();
        origin_deps.put(
            DepPath::singleton(Arc::name("x"), PathKind::Norm),
            Value::Integer(2),
        );
        let rescoped = rescope(&local, "p", None, &origin_deps);
        assert!(rescoped.contains(&DepPath::singleton(Arc::name("x"), PathKind::Norm)));
        assert!(!rescoped.contains(&DepPath::singleton(Arc::name("p"), PathKind::Norm)));
    }

    #[test]
    fn unrelated_entries_pass_through() {
        let mut local = DPaths::empty();
        local.put(
            DepPath::singleton(Arc::name("other"), PathKind::Norm),
            Value::Integer(9),
        );
        let rescoped = rescope(&local, "p", None, &DPaths::empty());
        assert!(rescoped.contains(&DepPath::singleton(Arc::name("other"), PathKind::Norm)));
    }
}
