//! `Context`: the evaluator's scope chain.
//!
//! Grounded on `examples/original_source/progs/vestaeval/EvalBasics.H`'s
//! `Context`, an ordered, singly-linked list of `(name, value)` bindings.
//! Reworked here as a persistent `Arc`-linked list so extending a scope for
//! one branch of evaluation never disturbs another branch sharing the same
//! tail — the structural sharing the original gets from never mutating a
//! `Context` node once built.

use std::fmt;
use std::sync::Arc as Rc;

use crate::fp::Tag;
use crate::value::Value;

#[derive(Clone)]
enum Node {
    Empty,
    Binding {
        name: String,
        value: Value,
        rest: Context,
    },
}

/// An immutable scope: a chain of name/value bindings searched innermost
/// first, matching lexical shadowing.
#[derive(Clone)]
pub struct Context(Rc<Node>);

impl Context {
    pub fn empty() -> Self {
        Context(Rc::new(Node::Empty))
    }

    pub fn extend(&self, name: impl Into<String>, value: Value) -> Context {
        Context(Rc::new(Node::Binding {
            name: name.into(),
            value,
            rest: self.clone(),
        }))
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        let mut cur = self;
        loop {
            match cur.0.as_ref() {
                Node::Empty => return None,
                Node::Binding {
                    name: n,
                    value,
                    rest,
                } => {
                    if n == name {
                        return Some(value);
                    }
                    cur = rest;
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.0.as_ref(), Node::Empty)
    }

    /// Names bound in this scope, innermost first.
    pub fn names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut cur = self;
        while let Node::Binding { name, rest, .. } = cur.0.as_ref() {
            names.push(name.as_str());
            cur = rest;
        }
        names
    }

    /// Content fingerprint of every `(name, value)` binding in this scope,
    /// excluding `own_name` if given (a closure/model's fingerprint folds in
    /// its captured environment minus its own recursive binding, per spec
    /// §4.1).
    pub fn fingerprint(&self, own_name: Option<&str>) -> Tag {
        let mut cur = self;
        let mut tag = Tag::of(b"Context");
        while let Node::Binding { name, value, rest } = cur.0.as_ref() {
            if Some(name.as_str()) != own_name {
                tag = tag
                    .extend(name.as_bytes())
                    .extend(value.fingerprint().as_bytes());
            }
            cur = rest;
        }
        tag
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_binding_shadows_outer() {
        let ctx = Context::empty()
            .extend("x", Value::Integer(1))
            .extend("x", Value::Integer(2));
        assert_eq!(ctx.lookup("x"), Some(&Value::Integer(2)));
    }

    #[test]
    fn extending_does_not_mutate_parent() {
        let base = Context::empty().extend("x", Value::Integer(1));
        let child = base.extend("y", Value::Integer(2));
        assert_eq!(base.lookup("y"), None);
        assert_eq!(child.lookup("x"), Some(&Value::Integer(1)));
    }

    #[test]
    fn unbound_name_is_none() {
        assert_eq!(Context::empty().lookup("missing"), None);
    }
}
