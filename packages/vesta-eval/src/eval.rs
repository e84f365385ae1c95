//! The evaluator: walks an [`Expr`] in a [`Context`], producing a [`Value`]
//! and recording the dependencies that determined it.
//!
//! Grounded on `examples/original_source/progs/vestaeval/Expr.C`'s per-node
//! `Eval` methods, collapsed into a single recursive dispatch per spec §4.2.

use std::sync::Arc as Rc;

use crate::ast::{observation_kind, BinOp, BindingKey, BlockStmt, Expr};
use crate::context::Context;
use crate::dep_rescope::{name_origin, rescope, rescope_call, Origin};
use crate::deppath::{Arc, DepPath, PathKind};
use crate::dpaths::DPaths;
use crate::error::EvalFailure;
use crate::modelrun::EvalEffects;
use crate::runtool::{OutputTreatment, RunToolArgs, SignalTreatment, StatusTreatment};
use crate::value::{Binding, Closure, Model, Value, ValueList};

/// Default `fp_content` threshold (bytes) when `_run_tool` doesn't name one:
/// files at or above 1 MiB are fingerprinted rather than inlined into the
/// collected root.
const DEFAULT_FP_CONTENT_THRESHOLD: usize = 1 << 20;

pub struct Evaluator {
    /// Call stack of human-readable frame descriptions, populated only when
    /// `record_stack` is set (spec §6's `-stack` flag) since keeping it
    /// current on every call has a real cost.
    record_stack: bool,
    /// Handles `Model` application and `_run_tool`; absent in the common
    /// unit-test case where neither a cache nor a host pool is available.
    effects: Option<Rc<dyn EvalEffects>>,
}

impl Evaluator {
    pub fn new(record_stack: bool) -> Self {
        Evaluator {
            record_stack,
            effects: None,
        }
    }

    pub fn with_effects(record_stack: bool, effects: Rc<dyn EvalEffects>) -> Self {
        Evaluator {
            record_stack,
            effects: Some(effects),
        }
    }

    /// Evaluate `expr` in `ctx`, recording dependencies this evaluation
    /// discovers into `deps`.
    pub fn eval(
        &self,
        expr: &Expr,
        ctx: &Context,
        deps: &mut DPaths,
    ) -> Result<Value, EvalFailure> {
        self.eval_origin(expr, ctx, deps).map(|(value, _)| value)
    }

    /// Like [`Evaluator::eval`], but when `expr` is a bare name or a chain
    /// of selects off one, also returns the [`DepPath`] that denotes it in
    /// `ctx` — used by call sites ([`Evaluator::apply_closure`], block
    /// let-bindings) that need to rescope dependencies recorded against a
    /// local parameter back onto the expression that produced it.
    fn eval_origin(
        &self,
        expr: &Expr,
        ctx: &Context,
        deps: &mut DPaths,
    ) -> Result<(Value, Option<DepPath>), EvalFailure> {
        match expr {
            Expr::BoolLit(b) => Ok((Value::Boolean(*b), None)),
            Expr::IntLit(n) => Ok((Value::Integer(*n), None)),
            Expr::TextLit(s) => Ok((Value::text(s.clone()), None)),

            Expr::Name(name) => match ctx.lookup(name) {
                Some(value) => {
                    let path = name_origin(name);
                    value.add_to_deps(path.clone(), deps);
                    Ok((value.clone(), Some(path)))
                }
                None => Err(self.fail(format!("unbound name `{name}`"))),
            },

            Expr::Select(inner, field, exists_only) => {
                let (inner_value, inner_path) = self.eval_origin(inner, ctx, deps)?;
                match &inner_value {
                    Value::Binding(binding) => {
                        let found = binding.is_bound(field);
                        let bang_path = inner_path
                            .as_ref()
                            .map(|p| p.extend(Arc::name(field), observation_kind(true)))
                            .unwrap_or_else(|| DepPath::singleton(Arc::name(field), observation_kind(true)));
                        if *exists_only {
                            deps.put(bang_path, Value::Boolean(found));
                            return Ok((Value::Boolean(found), None));
                        }
                        match binding.lookup(field) {
                            Some(value) => {
                                let path = inner_path
                                    .as_ref()
                                    .map(|p| p.extend(Arc::name(field), observation_kind(false)))
                                    .unwrap_or_else(|| {
                                        DepPath::singleton(Arc::name(field), observation_kind(false))
                                    });
                                value.add_to_deps(path.clone(), deps);
                                Ok((value.clone(), Some(path)))
                            }
                            None => {
                                deps.put(bang_path, Value::Boolean(false));
                                Err(self.fail(format!("no such field `{field}`")))
                            }
                        }
                    }
                    other => {
                        self.record_type_dep(other, inner_path.as_ref(), deps);
                        Err(self.fail(format!(
                            "SELECT `{field}` on non-binding value ({})",
                            other.type_name()
                        )))
                    }
                }
            }

            Expr::BinOp(op, lhs, rhs) => {
                let (lv, lhs_origin) = self.eval_origin(lhs, ctx, deps)?;
                let (rv, rhs_origin) = self.eval_origin(rhs, ctx, deps)?;
                let result =
                    self.eval_binop(*op, &lv, &rv, lhs_origin.as_ref(), rhs_origin.as_ref(), deps)?;
                Ok((result, None))
            }

            Expr::Not(e) => {
                let (v, origin) = self.eval_origin(e, ctx, deps)?;
                match v {
                    Value::Boolean(b) => Ok((Value::Boolean(!b), None)),
                    other => {
                        self.record_type_dep(&other, origin.as_ref(), deps);
                        Err(self.fail(format!("NOT on non-boolean ({})", other.type_name())))
                    }
                }
            }

            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let (cv, cond_origin) = self.eval_origin(cond, ctx, deps)?;
                match cv {
                    Value::Boolean(true) => self.eval_origin(then_branch, ctx, deps),
                    Value::Boolean(false) => self.eval_origin(else_branch, ctx, deps),
                    other => {
                        self.record_type_dep(&other, cond_origin.as_ref(), deps);
                        Err(self.fail(format!("IF on non-boolean ({})", other.type_name())))
                    }
                }
            }

            Expr::Block(stmts) => self.eval_block(stmts, ctx, deps),

            Expr::ListLit(items) => {
                let mut list = ValueList::new();
                for item in items {
                    let v = self.eval(item, ctx, deps)?;
                    list.push(v, false);
                }
                Ok((Value::List(list), None))
            }

            Expr::BindingLit(entries) => {
                let mut binding = Binding::new();
                for (key, value_expr) in entries {
                    let name = match key {
                        BindingKey::Literal(name) => name.clone(),
                        BindingKey::Computed(key_expr) => match self.eval(key_expr, ctx, deps)? {
                            Value::Text(t) => t
                                .as_str()
                                .ok_or_else(|| self.fail("BindingLit computed key must be valid UTF-8 text"))?
                                .to_string(),
                            other => {
                                return Err(self.fail(format!(
                                    "BindingLit computed key must be text ({})",
                                    other.type_name()
                                )))
                            }
                        },
                    };
                    let v = self.eval(value_expr, ctx, deps)?;
                    if !binding.insert(name.clone(), v, false) {
                        return Err(self.fail(format!("duplicate key `{name}` in binding literal")));
                    }
                }
                Ok((Value::Binding(binding), None))
            }

            Expr::Apply(callee, args) => {
                let fv = self.eval(callee, ctx, deps)?;
                let mut arg_values = Vec::with_capacity(args.len());
                let mut arg_origins = Vec::with_capacity(args.len());
                let mut arg_deps = Vec::with_capacity(args.len());
                for a in args {
                    let mut this_arg_deps = DPaths::empty();
                    let (v, origin) = self.eval_origin(a, ctx, &mut this_arg_deps)?;
                    deps.union_in_place(&this_arg_deps);
                    arg_values.push(v);
                    arg_origins.push(origin);
                    arg_deps.push(this_arg_deps);
                }
                let result = self.apply(&fv, arg_values, &arg_origins, &arg_deps, ctx, deps)?;
                Ok((result, None))
            }

            Expr::Func { params, body } => Ok((
                Value::Closure(Rc::new(Closure {
                    params: params.clone(),
                    body: body.clone(),
                    env: ctx.clone(),
                })),
                None,
            )),

            Expr::Model { params, body } => Ok((
                Value::Model(Rc::new(Model {
                    params: params.clone(),
                    body: body.clone(),
                    env: ctx.clone(),
                })),
                None,
            )),

            Expr::Iterate { var, list, body } => {
                let (collection, list_origin) = self.eval_origin(list, ctx, deps)?;
                match &collection {
                    Value::List(items) => {
                        if let Some(origin) = &list_origin {
                            let len_path = DepPath::from_arcs(origin.arcs().to_vec(), PathKind::ListLen);
                            deps.put(len_path, Value::Fp(items.len_fingerprint()));
                        }
                        let mut out = ValueList::new();
                        for item in items.items() {
                            let inner_ctx = ctx.extend(var.clone(), item.clone());
                            let mut body_deps = DPaths::empty();
                            let r = self.eval(body, &inner_ctx, &mut body_deps)?;
                            let rescoped = rescope(&body_deps, var, None, &DPaths::empty());
                            deps.union_in_place(&rescoped);
                            out.push(r, false);
                        }
                        Ok((Value::List(out), None))
                    }
                    // Iterating a Binding walks its values in entry order,
                    // matching the List case's per-element binding of `var`.
                    Value::Binding(binding) => {
                        if let Some(origin) = &list_origin {
                            let len_path =
                                DepPath::from_arcs(origin.arcs().to_vec(), PathKind::BindingLen);
                            deps.put(len_path, Value::Fp(binding.len_fingerprint()));
                        }
                        let mut out = ValueList::new();
                        for (_name, value) in binding.entries() {
                            let inner_ctx = ctx.extend(var.clone(), value.clone());
                            let mut body_deps = DPaths::empty();
                            let r = self.eval(body, &inner_ctx, &mut body_deps)?;
                            let rescoped = rescope(&body_deps, var, None, &DPaths::empty());
                            deps.union_in_place(&rescoped);
                            out.push(r, false);
                        }
                        Ok((Value::List(out), None))
                    }
                    other => Err(self.fail(format!(
                        "ITERATE over non-list-or-binding ({})",
                        other.type_name()
                    ))),
                }
            }

            Expr::PrimitiveCall {
                name,
                positional,
                keyword,
            } => {
                let mut pos = Vec::with_capacity(positional.len());
                for e in positional {
                    pos.push(self.eval(e, ctx, deps)?);
                }
                let mut kw = Vec::with_capacity(keyword.len());
                for (n, e) in keyword {
                    kw.push((n.clone(), self.eval(e, ctx, deps)?));
                }
                let (value, prim_deps) = self.call_primitive(name, pos, kw, ctx)?;
                deps.union_in_place(&prim_deps);
                Ok((value, None))
            }

            Expr::TypeOf(e) => {
                let v = self.eval(e, ctx, deps)?;
                Ok((Value::text(v.type_name()), None))
            }
        }
    }

    fn eval_block(
        &self,
        stmts: &[BlockStmt],
        ctx: &Context,
        deps: &mut DPaths,
    ) -> Result<(Value, Option<DepPath>), EvalFailure> {
        let mut scope = ctx.clone();
        let mut result = (Value::Unbound, None);
        // Dependencies recorded against a let-bound name only make sense
        // inside this block; once the block exits they're rescoped away in
        // favor of whatever the binding's own right-hand side depended on
        // (spec §4.4's let-collapse).
        let mut local_origin_deps: Vec<(String, DPaths)> = Vec::new();

        for stmt in stmts {
            match stmt {
                BlockStmt::Bind(name, rhs) => {
                    let mut rhs_deps = DPaths::empty();
                    let (value, _origin) = self.eval_origin(rhs, &scope, &mut rhs_deps)?;
                    deps.union_in_place(&rhs_deps);
                    scope = scope.extend(name.clone(), value);
                    local_origin_deps.push((name.clone(), rhs_deps));
                }
                BlockStmt::Expr(e) => {
                    let mut stmt_deps = DPaths::empty();
                    let out = self.eval_origin(e, &scope, &mut stmt_deps)?;
                    for (name, rhs_deps) in local_origin_deps.iter().rev() {
                        stmt_deps = rescope(&stmt_deps, name, None, rhs_deps);
                    }
                    deps.union_in_place(&stmt_deps);
                    result = out;
                }
            }
        }
        Ok(result)
    }

    fn apply(
        &self,
        callee: &Value,
        args: Vec<Value>,
        origins: &[Option<DepPath>],
        arg_deps: &[DPaths],
        ctx: &Context,
        deps: &mut DPaths,
    ) -> Result<Value, EvalFailure> {
        match callee {
            Value::Closure(closure) => {
                self.apply_closure(closure, args, origins, arg_deps, deps, ctx)
            }
            Value::Primitive(name) => {
                let kw = Vec::new();
                let (value, prim_deps) = self.call_primitive(name, args, kw, ctx)?;
                deps.union_in_place(&prim_deps);
                Ok(value)
            }
            Value::Model(model) => {
                let Some(effects) = &self.effects else {
                    return Err(self.fail(
                        "this evaluator has no cache/host wiring to apply a MODEL value",
                    ));
                };
                let (value, model_deps) = effects
                    .apply_model(model, args, ctx)
                    .map_err(|e| self.fail(e.to_string()))?;
                deps.union_in_place(&model_deps);
                Ok(value)
            }
            other => Err(self.fail(format!("APPLY on non-callable ({})", other.type_name()))),
        }
    }

    fn apply_closure(
        &self,
        closure: &Closure,
        args: Vec<Value>,
        origins: &[Option<DepPath>],
        arg_deps: &[DPaths],
        caller_deps: &mut DPaths,
        caller_ctx: &Context,
    ) -> Result<Value, EvalFailure> {
        if args.len() != closure.params.len() {
            return Err(self.fail(format!(
                "arity mismatch: expected {}, got {}",
                closure.params.len(),
                args.len()
            )));
        }
        let mut call_ctx = closure.env.clone();
        for (name, value) in closure.params.iter().zip(args.into_iter()) {
            call_ctx = call_ctx.extend(name.clone(), value);
        }
        let mut body_deps = DPaths::empty();
        let result = self.eval(&closure.body, &call_ctx, &mut body_deps)?;

        let origin_refs: Vec<Origin<'_>> = origins.iter().map(|o| o.as_ref()).collect();
        let rescoped = rescope_call(&body_deps, &closure.params, &origin_refs, arg_deps, caller_ctx);
        caller_deps.union_in_place(&rescoped);
        Ok(result)
    }

    fn eval_binop(
        &self,
        op: BinOp,
        lhs: &Value,
        rhs: &Value,
        lhs_origin: Option<&DepPath>,
        rhs_origin: Option<&DepPath>,
        deps: &mut DPaths,
    ) -> Result<Value, EvalFailure> {
        use BinOp::*;
        match (op, lhs, rhs) {
            (Add, Value::Integer(a), Value::Integer(b)) => a
                .checked_add(*b)
                .map(Value::Integer)
                .ok_or_else(|| self.fail("integer overflow")),
            (Sub, Value::Integer(a), Value::Integer(b)) => a
                .checked_sub(*b)
                .map(Value::Integer)
                .ok_or_else(|| self.fail("integer overflow")),
            (Mul, Value::Integer(a), Value::Integer(b)) => a
                .checked_mul(*b)
                .map(Value::Integer)
                .ok_or_else(|| self.fail("integer overflow")),
            (Div, Value::Integer(_), Value::Integer(0)) => Err(self.fail("division by zero")),
            (Div, Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a / b)),
            (Eq, a, b) => {
                let eq = self.record_eq_deps(a, b, lhs_origin, rhs_origin, deps);
                Ok(Value::Boolean(eq))
            }
            (Ne, a, b) => {
                let eq = self.record_eq_deps(a, b, lhs_origin, rhs_origin, deps);
                Ok(Value::Boolean(!eq))
            }
            (Lt, Value::Integer(a), Value::Integer(b)) => Ok(Value::Boolean(a < b)),
            (Le, Value::Integer(a), Value::Integer(b)) => Ok(Value::Boolean(a <= b)),
            (Gt, Value::Integer(a), Value::Integer(b)) => Ok(Value::Boolean(a > b)),
            (Ge, Value::Integer(a), Value::Integer(b)) => Ok(Value::Boolean(a >= b)),
            (And, Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a && *b)),
            (Or, Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a || *b)),
            (op, a, b) => Err(self.fail(format!(
                "{op:?} not defined for ({}, {})",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    /// Record a `Type`-kind dependency at `origin` (if the value that turned
    /// out to be the wrong type has a caller-visible path) so a future
    /// re-run can reproduce the same type error from cache without
    /// re-evaluating, per the field-missing branch of `Select`'s existing
    /// `Bang`-dep pattern.
    fn record_type_dep(&self, value: &Value, origin: Option<&DepPath>, deps: &mut DPaths) {
        if let Some(path) = origin {
            let type_path = DepPath::from_arcs(path.arcs().to_vec(), PathKind::Type);
            deps.put(type_path, Value::text(value.type_name()));
        }
    }

    /// `==`/`!=` over composite values must record what the comparison
    /// actually walked, not just rely on the scalar fingerprint equality
    /// check: a list/binding length dep at each origin, then recurse
    /// element/key-wise, stopping at the first mismatch (later elements
    /// can't change the already-determined answer).
    fn record_eq_deps(
        &self,
        lhs: &Value,
        rhs: &Value,
        lhs_origin: Option<&DepPath>,
        rhs_origin: Option<&DepPath>,
        deps: &mut DPaths,
    ) -> bool {
        match (lhs, rhs) {
            (Value::List(a), Value::List(b)) => {
                if let Some(p) = lhs_origin {
                    deps.put(
                        DepPath::from_arcs(p.arcs().to_vec(), PathKind::ListLen),
                        Value::Fp(a.len_fingerprint()),
                    );
                }
                if let Some(p) = rhs_origin {
                    deps.put(
                        DepPath::from_arcs(p.arcs().to_vec(), PathKind::ListLen),
                        Value::Fp(b.len_fingerprint()),
                    );
                }
                if a.len() != b.len() {
                    return false;
                }
                for (i, (av, bv)) in a.items().iter().zip(b.items().iter()).enumerate() {
                    let lp = lhs_origin.map(|p| p.extend(Arc::Index(i as u32), PathKind::Norm));
                    let rp = rhs_origin.map(|p| p.extend(Arc::Index(i as u32), PathKind::Norm));
                    if !self.record_eq_deps(av, bv, lp.as_ref(), rp.as_ref(), deps) {
                        return false;
                    }
                }
                true
            }
            (Value::Binding(a), Value::Binding(b)) => {
                if let Some(p) = lhs_origin {
                    deps.put(
                        DepPath::from_arcs(p.arcs().to_vec(), PathKind::BindingLen),
                        Value::Fp(a.len_fingerprint()),
                    );
                }
                if let Some(p) = rhs_origin {
                    deps.put(
                        DepPath::from_arcs(p.arcs().to_vec(), PathKind::BindingLen),
                        Value::Fp(b.len_fingerprint()),
                    );
                }
                if a.len() != b.len() {
                    return false;
                }
                for (name, av) in a.entries() {
                    let Some(bv) = b.lookup(name) else {
                        return false;
                    };
                    let lp = lhs_origin.map(|p| p.extend(Arc::name(name), PathKind::Norm));
                    let rp = rhs_origin.map(|p| p.extend(Arc::name(name), PathKind::Norm));
                    if !self.record_eq_deps(av, bv, lp.as_ref(), rp.as_ref(), deps) {
                        return false;
                    }
                }
                true
            }
            _ => {
                if let Some(p) = lhs_origin {
                    lhs.add_to_deps(p.clone(), deps);
                }
                if let Some(p) = rhs_origin {
                    rhs.add_to_deps(p.clone(), deps);
                }
                lhs == rhs
            }
        }
    }

    /// Primitives. Most return no deps of their own beyond what evaluating
    /// their arguments already recorded; `_run_tool` and `_defined` are the
    /// exceptions (spec §4.6/§4.7 both record fresh deps as part of the
    /// call itself), so every primitive returns its own `DPaths` rather than
    /// having the caller assume there are none.
    fn call_primitive(
        &self,
        name: &str,
        positional: Vec<Value>,
        keyword: Vec<(String, Value)>,
        ctx: &Context,
    ) -> Result<(Value, DPaths), EvalFailure> {
        match name {
            "_fp" => {
                let value = positional
                    .first()
                    .ok_or_else(|| self.fail("_fp requires one argument"))?;
                Ok((Value::Fp(value.fingerprint()), DPaths::empty()))
            }
            "_length" => match positional.first() {
                Some(Value::List(l)) => Ok((Value::Integer(l.len() as i32), DPaths::empty())),
                Some(Value::Binding(b)) => Ok((Value::Integer(b.len() as i32), DPaths::empty())),
                _ => Err(self.fail("_length requires a list or binding")),
            },
            "_defined" => {
                let (Some(Value::Binding(binding)), Some(Value::Text(field))) =
                    (positional.first(), positional.get(1))
                else {
                    return Err(self.fail("_defined requires (binding, name)"));
                };
                let field_name = field
                    .as_str()
                    .ok_or_else(|| self.fail("_defined's name argument must be text"))?;
                let found = binding.is_bound(field_name);
                let mut deps = DPaths::empty();
                deps.put(
                    DepPath::singleton(Arc::name(field_name), PathKind::Bang),
                    Value::Boolean(found),
                );
                Ok((Value::Boolean(found), deps))
            }
            "_run_tool" => self.call_run_tool(positional, keyword, ctx),
            other => Err(self.fail(format!("unknown primitive `{other}`"))),
        }
    }

    /// `_run_tool(platform, command, stdin="", stdout_treatment="report",
    /// stderr_treatment="report", status_treatment="report_nocache",
    /// signal_treatment="only_zero", fp_content=<threshold>, wd=".WD",
    /// existing_writable=FALSE, env=<binding>, root)` per spec §4.7's
    /// argument list.
    fn call_run_tool(
        &self,
        positional: Vec<Value>,
        keyword: Vec<(String, Value)>,
        ctx: &Context,
    ) -> Result<(Value, DPaths), EvalFailure> {
        let Some(effects) = &self.effects else {
            return Err(self.fail("this evaluator has no cache/host wiring to run _run_tool"));
        };
        let kw = |name: &str| keyword.iter().find(|(n, _)| n == name).map(|(_, v)| v);

        let platform = match positional.first() {
            Some(Value::Text(t)) => t.as_str().unwrap_or_default().to_string(),
            _ => return Err(self.fail("_run_tool requires a text `platform` argument")),
        };
        let command_line = match positional.get(1) {
            Some(Value::List(items)) => items
                .items()
                .iter()
                .map(|v| match v {
                    Value::Text(t) => Ok(t.as_str().unwrap_or_default().to_string()),
                    other => Err(self.fail(format!(
                        "_run_tool command entries must be text, got {}",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(self.fail("_run_tool requires a list `command` argument")),
        };
        let stdin_data = match kw("stdin") {
            Some(Value::Text(t)) => t.as_bytes().to_vec(),
            _ => Vec::new(),
        };
        let wd_name = match kw("wd") {
            Some(Value::Text(t)) => t.as_str().unwrap_or(".WD").to_string(),
            _ => ".WD".to_string(),
        };
        let existing_writable = matches!(kw("existing_writable"), Some(Value::Boolean(true)));
        let signal_treatment = match kw("signal_treatment") {
            Some(Value::Text(t)) => match t.as_str() {
                Some("any_ok") => SignalTreatment::AnyOk,
                Some("signal_is_fatal") => SignalTreatment::SignalIsFatal,
                _ => SignalTreatment::OnlyZero,
            },
            _ => SignalTreatment::OnlyZero,
        };
        let stdout_treatment = match kw("stdout_treatment") {
            Some(Value::Text(t)) if t.as_str() == Some("ignore") => OutputTreatment::Ignore,
            _ => OutputTreatment::Report,
        };
        let stderr_treatment = match kw("stderr_treatment") {
            Some(Value::Text(t)) if t.as_str() == Some("ignore") => OutputTreatment::Ignore,
            _ => OutputTreatment::Report,
        };
        let status_treatment = match kw("status_treatment") {
            Some(Value::Text(t)) if t.as_str() == Some("report") => StatusTreatment::Report,
            _ => StatusTreatment::ReportNoCache,
        };
        let fp_content_threshold = match kw("fp_content") {
            Some(Value::Integer(n)) if *n >= 0 => *n as usize,
            _ => DEFAULT_FP_CONTENT_THRESHOLD,
        };
        let env_vars = match kw("env") {
            Some(Value::Binding(b)) => b
                .entries()
                .iter()
                .map(|(name, value)| match value {
                    Value::Text(t) => Ok((name.to_string(), t.as_str().unwrap_or_default().to_string())),
                    other => Err(self.fail(format!(
                        "_run_tool env entries must be text, got {}",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };
        let root = match kw("root") {
            Some(Value::Binding(b)) => Value::Binding(b.clone()),
            _ => return Err(self.fail("_run_tool requires a `root` binding argument")),
        };

        let args = RunToolArgs {
            platform,
            command_line,
            stdin_data,
            wd_name,
            existing_writable,
            signal_treatment,
            stdout_treatment,
            stderr_treatment,
            status_treatment,
            fp_content_threshold,
            env_vars,
            root,
        };
        effects
            .run_tool(args, ctx)
            .map_err(|e| self.fail(e.to_string()))
    }

    fn fail(&self, message: impl Into<String>) -> EvalFailure {
        let failure = EvalFailure::recoverable(message);
        if self.record_stack {
            failure.with_stack(Vec::new())
        } else {
            failure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    fn int(n: i32) -> Rc<Expr> {
        Rc::new(Expr::IntLit(n))
    }

    #[test]
    fn arithmetic_and_literals() {
        let evaluator = Evaluator::new(false);
        let ctx = Context::empty();
        let mut deps = DPaths::empty();
        let expr = Expr::BinOp(BinOp::Add, int(2), int(3));
        let result = evaluator.eval(&expr, &ctx, &mut deps).unwrap();
        assert_eq!(result, Value::Integer(5));
        assert!(deps.is_empty());
    }

    #[test]
    fn name_lookup_records_norm_dep() {
        let evaluator = Evaluator::new(false);
        let ctx = Context::empty().extend("x", Value::Integer(7));
        let mut deps = DPaths::empty();
        let result = evaluator
            .eval(&Expr::Name("x".into()), &ctx, &mut deps)
            .unwrap();
        assert_eq!(result, Value::Integer(7));
        assert!(deps.contains(&DepPath::singleton(Arc::name("x"), PathKind::Norm)));
    }

    #[test]
    fn closure_call_rescopes_param_dep_to_argument_path() {
        let evaluator = Evaluator::new(false);
        let closure_expr = Expr::Func {
            params: vec!["p".into()],
            body: Rc::new(Expr::Name("p".into())),
        };
        let ctx = Context::empty().extend("arg", Value::Integer(42));
        let mut deps = DPaths::empty();
        let f = evaluator.eval(&closure_expr, &ctx, &mut deps).unwrap();
        let apply_ctx = ctx.extend("f", f);
        let call = Expr::Apply(
            Rc::new(Expr::Name("f".into())),
            vec![Rc::new(Expr::Name("arg".into()))],
        );
        let mut call_deps = DPaths::empty();
        let result = evaluator.eval(&call, &apply_ctx, &mut call_deps).unwrap();
        assert_eq!(result, Value::Integer(42));
        assert!(call_deps.contains(&DepPath::singleton(Arc::name("arg"), PathKind::Norm)));
    }

    #[test]
    fn select_on_binding_records_path_dep() {
        let evaluator = Evaluator::new(false);
        let mut binding = Binding::new();
        binding.insert("a", Value::Integer(1), false);
        let ctx = Context::empty().extend("b", Value::Binding(binding));
        let mut deps = DPaths::empty();
        let expr = Expr::Select(Rc::new(Expr::Name("b".into())), "a".into(), false);
        let result = evaluator.eval(&expr, &ctx, &mut deps).unwrap();
        assert_eq!(result, Value::Integer(1));
        assert!(deps.contains(&DepPath::from_arcs(
            vec![Arc::name("b"), Arc::name("a")],
            PathKind::Norm
        )));
    }
}
