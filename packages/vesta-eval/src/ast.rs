//! The expression AST the evaluator walks.
//!
//! Grounded on `examples/original_source/progs/vestaeval/ValExpr.H`'s `Expr`
//! hierarchy (`PlusExpr`, `SelectExpr`, `IterExpr`, `FuncExpr`, `ModelExpr`,
//! ...), collapsed into one Rust enum since Rust doesn't need a class per
//! node the way the original's C++ does for its dispatch.

use std::sync::Arc as Rc;

use serde::{Deserialize, Serialize};

use crate::deppath::PathKind;
use crate::fp::Tag;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// A `BindingLit` entry's key: either a literal field name or a computed
/// one (`%expr%: value`), whose expression is evaluated to a `Text` at
/// construction time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BindingKey {
    Literal(String),
    Computed(Rc<Expr>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Expr {
    BoolLit(bool),
    IntLit(i32),
    TextLit(String),
    /// Reference to a bound name; evaluating it records a `Norm`-kind
    /// dependency on the name's value.
    Name(String),
    BinOp(BinOp, Rc<Expr>, Rc<Expr>),
    Not(Rc<Expr>),
    If {
        cond: Rc<Expr>,
        then_branch: Rc<Expr>,
        else_branch: Rc<Expr>,
    },
    /// `{ e1; e2; ...; en }`: evaluate each in sequence, binding-introducing
    /// statements extend the scope for the rest of the block.
    Block(Vec<BlockStmt>),
    ListLit(Vec<Rc<Expr>>),
    BindingLit(Vec<(BindingKey, Rc<Expr>)>),
    /// `e.name`: select a field, recording `Bang` (existence) and `Norm`
    /// (value) dependencies on the selected path. `e.!name` sets the third
    /// field true: only the `Bang` existence dep is recorded, the value is
    /// never forced, and a missing field is `Boolean(false)` rather than an
    /// error.
    Select(Rc<Expr>, String, bool),
    /// `e1(e2, ...)`: function application.
    Apply(Rc<Expr>, Vec<Rc<Expr>>),
    /// `FUNC(params) body`: a function literal; evaluating it captures the
    /// current context as the closure environment.
    Func {
        params: Vec<String>,
        body: Rc<Expr>,
    },
    /// `[param1, param2 | body]` model literal, evaluated via `PrimRunTool`
    /// at application time rather than ordinary function application.
    Model {
        params: Vec<String>,
        body: Rc<Expr>,
    },
    /// `FOR x IN list DO body` style iteration, producing a list of results.
    Iterate {
        var: String,
        list: Rc<Expr>,
        body: Rc<Expr>,
    },
    /// Invoke a named primitive (`_run_tool`, `_fp`, ...) with evaluated
    /// argument expressions in positional+keyword form.
    PrimitiveCall {
        name: String,
        positional: Vec<Rc<Expr>>,
        keyword: Vec<(String, Rc<Expr>)>,
    },
    /// Force evaluation of `e`'s type without its value, used for
    /// `TYPEOF`-style constructs; records a `Type`-kind dependency.
    TypeOf(Rc<Expr>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BlockStmt {
    Bind(String, Rc<Expr>),
    Expr(Rc<Expr>),
}

/// The dependency kind a given syntactic construct records when it reads a
/// value, used by `eval.rs` to pick the right `PathKind` without a big
/// match duplicated at every call site.
pub fn observation_kind(select_existence_only: bool) -> PathKind {
    if select_existence_only {
        PathKind::Bang
    } else {
        PathKind::Norm
    }
}

/// Structural content fingerprint of an expression tree, independent of
/// where it was allocated. Closures and models fold this into their own
/// fingerprint (spec §4.1: "fingerprint = H(closure_expr) + ..."); unlike a
/// pointer address, it is stable across processes and evaluation runs, which
/// is what lets a `Model`'s cache PK actually hit on a second process.
pub fn fingerprint(expr: &Expr) -> Tag {
    match expr {
        Expr::BoolLit(b) => Tag::of(b"BoolLit").extend([*b as u8]),
        Expr::IntLit(n) => Tag::of(b"IntLit").extend(n.to_be_bytes()),
        Expr::TextLit(s) => Tag::of(b"TextLit").extend(s.as_bytes()),
        Expr::Name(name) => Tag::of(b"Name").extend(name.as_bytes()),
        Expr::BinOp(op, lhs, rhs) => Tag::of(b"BinOp")
            .extend([*op as u8])
            .extend(fingerprint(lhs).as_bytes())
            .extend(fingerprint(rhs).as_bytes()),
        Expr::Not(e) => Tag::of(b"Not").extend(fingerprint(e).as_bytes()),
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => Tag::of(b"If")
            .extend(fingerprint(cond).as_bytes())
            .extend(fingerprint(then_branch).as_bytes())
            .extend(fingerprint(else_branch).as_bytes()),
        Expr::Block(stmts) => {
            let mut tag = Tag::of(b"Block");
            for stmt in stmts {
                tag = match stmt {
                    BlockStmt::Bind(name, rhs) => tag
                        .extend(b"bind")
                        .extend(name.as_bytes())
                        .extend(fingerprint(rhs).as_bytes()),
                    BlockStmt::Expr(e) => tag.extend(b"expr").extend(fingerprint(e).as_bytes()),
                };
            }
            tag
        }
        Expr::ListLit(items) => items
            .iter()
            .fold(Tag::of(b"ListLit"), |tag, item| {
                tag.extend(fingerprint(item).as_bytes())
            }),
        Expr::BindingLit(entries) => entries.iter().fold(Tag::of(b"BindingLit"), |tag, (k, v)| {
            let tag = match k {
                BindingKey::Literal(name) => tag.extend(b"lit").extend(name.as_bytes()),
                BindingKey::Computed(key_expr) => {
                    tag.extend(b"computed").extend(fingerprint(key_expr).as_bytes())
                }
            };
            tag.extend(fingerprint(v).as_bytes())
        }),
        Expr::Select(inner, field, exists_only) => Tag::of(b"Select")
            .extend(fingerprint(inner).as_bytes())
            .extend(field.as_bytes())
            .extend([*exists_only as u8]),
        Expr::Apply(callee, args) => {
            let mut tag = Tag::of(b"Apply").extend(fingerprint(callee).as_bytes());
            for a in args {
                tag = tag.extend(fingerprint(a).as_bytes());
            }
            tag
        }
        Expr::Func { params, body } => {
            let mut tag = Tag::of(b"Func");
            for p in params {
                tag = tag.extend(p.as_bytes());
            }
            tag.extend(fingerprint(body).as_bytes())
        }
        Expr::Model { params, body } => {
            let mut tag = Tag::of(b"Model");
            for p in params {
                tag = tag.extend(p.as_bytes());
            }
            tag.extend(fingerprint(body).as_bytes())
        }
        Expr::Iterate { var, list, body } => Tag::of(b"Iterate")
            .extend(var.as_bytes())
            .extend(fingerprint(list).as_bytes())
            .extend(fingerprint(body).as_bytes()),
        Expr::PrimitiveCall {
            name,
            positional,
            keyword,
        } => {
            let mut tag = Tag::of(b"PrimitiveCall").extend(name.as_bytes());
            for p in positional {
                tag = tag.extend(fingerprint(p).as_bytes());
            }
            for (k, v) in keyword {
                tag = tag.extend(k.as_bytes()).extend(fingerprint(v).as_bytes());
            }
            tag
        }
        Expr::TypeOf(e) => Tag::of(b"TypeOf").extend(fingerprint(e).as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_trees_fingerprint_equal() {
        let a = Expr::BinOp(BinOp::Add, Rc::new(Expr::IntLit(1)), Rc::new(Expr::Name("x".into())));
        let b = Expr::BinOp(BinOp::Add, Rc::new(Expr::IntLit(1)), Rc::new(Expr::Name("x".into())));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn differing_trees_fingerprint_differently() {
        let a = Expr::IntLit(1);
        let b = Expr::IntLit(2);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn operand_order_matters() {
        let a = Expr::BinOp(BinOp::Sub, Rc::new(Expr::IntLit(1)), Rc::new(Expr::IntLit(2)));
        let b = Expr::BinOp(BinOp::Sub, Rc::new(Expr::IntLit(2)), Rc::new(Expr::IntLit(1)));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
