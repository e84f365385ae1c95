//! `Value`: the evaluator's universal runtime value.
//!
//! Grounded on `examples/original_source/progs/vestaeval/Val.H`'s `Val`
//! class hierarchy (`BooleanVal`, `IntegerVal`, `TextVal`, `ListVal`,
//! `BindingVal`, `ClosureVal`, `ModelVal`, `PrimVal`, `ErrorVal`). The
//! original gives every `Val` a `dps` (DPaths) member recording what the
//! *construction* of that value observed; here only the two composite kinds
//! that are actually built incrementally (`List`, `Binding`) carry that
//! bookkeeping, since scalars have nothing to observe while being built and
//! the evaluator records their dependencies directly into the caller's
//! [`DPaths`] via [`Value::add_to_deps`] at the point of use instead.

pub mod binding;
pub mod list;
pub mod text;

use std::fmt;
use std::sync::Arc as Rc;

use color_eyre::eyre::{eyre, Result};

pub use binding::Binding;
pub use list::ValueList;
pub use text::Text;

use crate::ast::{self, Expr};
use crate::context::Context;
use crate::deppath::{DepPath, PathKind};
use crate::dpaths::DPaths;
use crate::fp::{tag_of_bool, tag_of_i32, variant_tag, Tag, VariantSalt};

#[derive(Clone, Debug)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: Rc<Expr>,
    pub env: Context,
}

#[derive(Clone, Debug)]
pub struct Model {
    pub params: Vec<String>,
    pub body: Rc<Expr>,
    pub env: Context,
}

/// Severity used by `-stack`/`-cstats` reporting and by the CLI's final exit
/// code (spec §6: non-`Fatal` failures still run to completion and report).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorSeverity {
    Recoverable,
    Fatal,
}

#[derive(Clone, Debug)]
pub struct ErrorValue {
    pub message: String,
    pub severity: ErrorSeverity,
    /// Call stack at the point of failure, captured only when `-stack` is
    /// active (spec §6); empty otherwise to avoid the bookkeeping cost.
    pub call_stack: Vec<String>,
}

#[derive(Clone, Debug)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    Text(Text),
    List(ValueList),
    Binding(Binding),
    Closure(Rc<Closure>),
    Model(Rc<Model>),
    Primitive(String),
    Error(Rc<ErrorValue>),
    Fp(Tag),
    Unbound,
}

impl Value {
    pub fn text(s: impl Into<Text>) -> Self {
        Value::Text(s.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Value::Error(Rc::new(ErrorValue {
            message: message.into(),
            severity: ErrorSeverity::Recoverable,
            call_stack: Vec::new(),
        }))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Binding(_) => "binding",
            Value::Closure(_) => "closure",
            Value::Model(_) => "model",
            Value::Primitive(_) => "primitive",
            Value::Error(_) => "error",
            Value::Fp(_) => "fingerprint",
            Value::Unbound => "unbound",
        }
    }

    /// The content-addressed identity of this value, per spec §3's `Value`
    /// operations. Closures and models fingerprint their body's structural
    /// identity (§4.1: `H(closure_expr) + H(captured_context_minus_own_name)`)
    /// rather than an allocation address, so the same closure built twice
    /// from the same source in the same scope hits the cache.
    pub fn fingerprint(&self) -> Tag {
        match self {
            Value::Boolean(b) => tag_of_bool(*b),
            Value::Integer(n) => tag_of_i32(*n),
            Value::Text(t) => t.fingerprint(),
            Value::List(l) => l.fingerprint(),
            Value::Binding(b) => b.fingerprint(),
            Value::Closure(c) => variant_tag(VariantSalt::Closure)
                .extend(ast::fingerprint(&c.body).as_bytes())
                .extend(c.env.fingerprint(None).as_bytes()),
            Value::Model(m) => variant_tag(VariantSalt::Model)
                .extend(ast::fingerprint(&m.body).as_bytes())
                .extend(m.env.fingerprint(None).as_bytes()),
            Value::Primitive(name) => variant_tag(VariantSalt::Primitive).extend(name.as_bytes()),
            Value::Error(e) => variant_tag(VariantSalt::Error).extend(e.message.as_bytes()),
            Value::Fp(tag) => variant_tag(VariantSalt::Fp).extend(tag.as_bytes()),
            Value::Unbound => variant_tag(VariantSalt::Unbound),
        }
    }

    /// The accumulated deps of a composite value built incrementally
    /// (`List`/`Binding`); `None` for values with no construction-time
    /// bookkeeping of their own.
    pub fn inner_deps(&self) -> Option<&DPaths> {
        match self {
            Value::List(l) => Some(l.deps()),
            Value::Binding(b) => Some(b.deps()),
            _ => None,
        }
    }

    /// Record that this value was observed at `path` with the given kind,
    /// per spec §3's `add_to_deps`.
    pub fn add_to_deps(&self, path: DepPath, deps: &mut DPaths) {
        deps.put(path, self.clone());
    }

    /// Merge two values that should be identical (e.g. both branches of a
    /// conditional whose dependency-merge optimizer wants to confirm they
    /// really produce the same result): `Ok` when fingerprints agree,
    /// otherwise an error describing the mismatch. Spec §4.4's rescoping
    /// never actually re-executes both branches; this is exercised by the
    /// `-dependency-check` double-evaluation comparison (spec §6/SPEC_FULL §C).
    pub fn merge(&self, other: &Value) -> Result<Value> {
        if self.fingerprint() == other.fingerprint() {
            Ok(self.clone())
        } else {
            Err(eyre!(
                "merge mismatch: {} != {}",
                self.fingerprint(),
                other.fingerprint()
            ))
        }
    }

    /// Like [`Value::merge`], but the caller additionally records a
    /// `Type`-kind dependency at `path` for both operands' types, since the
    /// comparison looked only at shape, not content.
    pub fn merge_and_type(&self, other: &Value, path: &DepPath, deps: &mut DPaths) -> Result<Value> {
        let result = self.merge(other)?;
        let type_path = DepPath::from_arcs(path.arcs().to_vec(), PathKind::Type);
        deps.put(type_path, Value::text(self.type_name()));
        Ok(result)
    }

    /// Like [`Value::merge`], but records a `ListLen`/`BindingLen`-kind
    /// dependency instead, for merges that only need to agree on length
    /// (e.g. `Iterate` over two equally-shaped lists).
    pub fn merge_and_len(&self, other: &Value, path: &DepPath, deps: &mut DPaths) -> Result<Value> {
        let (kind, len_fp) = match (self, other) {
            (Value::List(a), Value::List(b)) => {
                if a.len() != b.len() {
                    return Err(eyre!("length mismatch: {} != {}", a.len(), b.len()));
                }
                (PathKind::ListLen, a.len_fingerprint())
            }
            (Value::Binding(a), Value::Binding(b)) => {
                if a.len() != b.len() {
                    return Err(eyre!("length mismatch: {} != {}", a.len(), b.len()));
                }
                (PathKind::BindingLen, a.len_fingerprint())
            }
            _ => return self.merge(other),
        };
        let len_path = DepPath::from_arcs(path.arcs().to_vec(), kind);
        deps.put(len_path, Value::Fp(len_fp));
        Ok(self.clone())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}
impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Text(t) => match t.as_str() {
                Some(s) => write!(f, "\"{s}\""),
                None => write!(f, "<binary text>"),
            },
            Value::List(l) => {
                write!(f, "[")?;
                for (i, item) in l.items().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Binding(b) => {
                write!(f, "[")?;
                for (i, (name, value)) in b.entries().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} = {value}")?;
                }
                write!(f, "]")
            }
            Value::Closure(_) => write!(f, "<closure>"),
            Value::Model(_) => write!(f, "<model>"),
            Value::Primitive(name) => write!(f, "<primitive {name}>"),
            Value::Error(e) => write!(f, "<error: {}>", e.message),
            Value::Fp(tag) => write!(f, "<fp {tag}>"),
            Value::Unbound => write!(f, "<unbound>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_scalars_have_equal_fingerprints() {
        assert_eq!(Value::Integer(1), Value::Integer(1));
        assert_ne!(Value::Integer(1), Value::Integer(2));
    }

    #[test]
    fn merge_ok_on_equal_values() {
        let merged = Value::Integer(5).merge(&Value::Integer(5)).unwrap();
        assert_eq!(merged, Value::Integer(5));
    }

    #[test]
    fn merge_fails_on_divergent_values() {
        assert!(Value::Integer(5).merge(&Value::Integer(6)).is_err());
    }

    #[test]
    fn merge_and_len_records_listlen_dep() {
        let mut a = ValueList::new();
        a.push(Value::Integer(1), false);
        let mut b = ValueList::new();
        b.push(Value::Integer(2), false);
        let mut deps = DPaths::empty();
        let path = DepPath::root(PathKind::Norm);
        Value::List(a)
            .merge_and_len(&Value::List(b), &path, &mut deps)
            .unwrap();
        assert_eq!(deps.len(), 1);
    }
}
