//! Wires `Value::Model` application and the `_run_tool` primitive to the
//! `ApplyCache` protocol driver and `PrimRunTool`, the piece `eval.rs` keeps
//! behind the [`EvalEffects`] trait so a bare `Evaluator` (no cache, no
//! hosts — the common case in unit tests) never has to construct either.
//!
//! Grounded on `examples/original_source/progs/vestaeval/ApplyCache.H`'s
//! `ModelFromCache` entry point (spec §4.3/§4.7).

use color_eyre::eyre::{bail, Result};
use vesta_protocol::cache::CacheClient;

use crate::cache::key::{model_pk, run_tool_pk};
use crate::cache::protocol::{ApplyCache, PathResolver};
use crate::context::Context;
use crate::deppath::{Arc, DepPath};
use crate::dpaths::DPaths;
use crate::error::EvalFailure;
use crate::fp::Tag;
use crate::host::HostSelector;
use crate::runtool::{command_line_fp, PrimRunTool, RunToolArgs};
use crate::value::{Model, Value};

/// Resolves a free-variable [`DepPath`] against a live [`Context`] by
/// walking its root name and then descending through `Binding`/`List`
/// structure — the evaluator-side half of the cache protocol's `Lookup`
/// call (spec §4.3: "tags ← for each (arc_idx, kind) in fv: fingerprint(...)").
pub struct ContextPathResolver<'a> {
    pub ctx: &'a Context,
}

impl ContextPathResolver<'_> {
    fn resolve_value(&self, path: &DepPath) -> Option<Value> {
        let mut arcs = path.arcs().iter();
        let root = match arcs.next()? {
            Arc::Name(name) => name,
            Arc::Index(_) => return None,
        };
        let mut value = self.ctx.lookup(root)?.clone();
        for arc in arcs {
            value = match (&value, arc) {
                (Value::Binding(b), Arc::Name(n)) => b.lookup(n)?.clone(),
                (Value::List(l), Arc::Index(i)) => l.get(*i as usize)?.clone(),
                _ => return None,
            };
        }
        Some(value)
    }
}

impl PathResolver for ContextPathResolver<'_> {
    fn resolve_tag(&self, path: &DepPath) -> Option<Tag> {
        self.resolve_value(path).map(|v| v.fingerprint())
    }
}

impl crate::pickle::DepResolver for ContextPathResolver<'_> {
    fn resolve(&self, path: &DepPath) -> Option<Value> {
        self.resolve_value(path)
    }
}

/// The evaluator-side effects a plain AST walk cannot perform by itself:
/// applying a `Model` (§4.3's `ApplyModel`) and invoking `_run_tool`
/// directly (§4.7). Both route through the cache before doing real work.
pub trait EvalEffects: Send + Sync {
    fn apply_model(
        &self,
        model: &Model,
        args: Vec<Value>,
        caller_ctx: &Context,
    ) -> Result<(Value, DPaths), EvalFailure>;

    fn run_tool(&self, args: RunToolArgs, caller_ctx: &Context) -> Result<(Value, DPaths), EvalFailure>;
}

pub struct ModelRunner<C: CacheClient> {
    cache: ApplyCache<C>,
    hosts: HostSelector,
    default_platform: String,
}

impl<C: CacheClient> ModelRunner<C> {
    pub fn new(cache: C, hosts: HostSelector, default_platform: impl Into<String>) -> Self {
        ModelRunner {
            cache: ApplyCache::new(cache),
            hosts,
            default_platform: default_platform.into(),
        }
    }

    fn platform(&self, requested: Option<&str>) -> String {
        requested.unwrap_or(&self.default_platform).to_string()
    }

    /// Call/hit/miss/elapsed-RPC-time counters for the CLI's
    /// `-cstats`/`-mstats` flags.
    pub fn cache_stats(&self) -> &crate::cache::CacheStats {
        self.cache.stats()
    }
}

impl<C: CacheClient> EvalEffects for ModelRunner<C> {
    /// Binds `model.params` to `args` as `./root`'s top-level entries,
    /// derives a platform-salted PK (spec §4.3's "Model (normal)" row), and
    /// asks the cache before re-evaluating the model body. A cache miss
    /// evaluates the body directly; any `_run_tool` primitive the body
    /// contains recurses back through [`EvalEffects::run_tool`] via the
    /// evaluator that drives this call, not through this method itself.
    fn apply_model(
        &self,
        model: &Model,
        args: Vec<Value>,
        caller_ctx: &Context,
    ) -> Result<(Value, DPaths), EvalFailure> {
        if args.len() != model.params.len() {
            return Err(EvalFailure::recoverable(format!(
                "model arity mismatch: expected {}, got {}",
                model.params.len(),
                args.len()
            )));
        }
        let platform = self.platform(None);
        let model_fp = Value::Model(std::sync::Arc::new(model.clone())).fingerprint();
        let pk = model_pk(model_fp, &args, &platform);
        let resolver = ContextPathResolver { ctx: caller_ctx };

        let evaluator = crate::eval::Evaluator::new(false);
        let params = model.params.clone();
        let body = model.body.clone();
        let env = model.env.clone();
        let compute = move || -> Result<(Value, DPaths)> {
            let mut call_ctx = env;
            for (name, value) in params.iter().zip(args.iter()) {
                call_ctx = call_ctx.extend(name.clone(), value.clone());
            }
            let mut deps = DPaths::empty();
            let value = evaluator
                .eval(&body, &call_ctx, &mut deps)
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            Ok((value, deps))
        };

        let result = self
            .cache
            .apply(pk, &resolver, "model", compute)
            .map_err(|e| EvalFailure::recoverable(e.to_string()))?;
        Ok((result.value, result.deps))
    }

    /// Direct `_run_tool(...)` invocation (spec §4.7), cached by command
    /// line + working-root content fingerprint rather than by argument
    /// values, since the root is usually too large to fingerprint cheaply
    /// up front — `run_tool_pk` takes the root's already-computed tag.
    fn run_tool(&self, args: RunToolArgs, caller_ctx: &Context) -> Result<(Value, DPaths), EvalFailure> {
        let platform = self.platform(Some(&args.platform));
        let cl_fp = command_line_fp(&args.command_line);
        let root_fp = args.root.fingerprint();
        let treatments = format!(
            "{:?}{:?}{:?}{:?}",
            args.signal_treatment, args.stdout_treatment, args.stderr_treatment, args.status_treatment
        );
        let pk = run_tool_pk(
            cl_fp,
            root_fp,
            &platform,
            &args.stdin_data,
            &args.wd_name,
            args.existing_writable,
            &treatments,
            &args.env_vars,
        );
        let resolver = ContextPathResolver { ctx: caller_ctx };

        let prim = PrimRunTool::new(&self.hosts);
        let fatal = std::cell::Cell::new(false);
        let compute = || -> Result<(Value, DPaths)> {
            let (value, deps, classification) = prim.run(&args)?;
            match classification {
                crate::runtool::Classification::Fatal => {
                    fatal.set(true);
                    bail!("_run_tool invocation failed fatally");
                }
                // A failing status that `status_treatment` marked
                // uncacheable still reaches the evaluator as a recoverable
                // result; it just must not be stored via `AddEntry`, so it
                // bails out of `compute` exactly like a fatal failure does,
                // without setting `fatal`.
                crate::runtool::Classification::UncacheableError => {
                    bail!("_run_tool invocation's status is marked uncacheable");
                }
                crate::runtool::Classification::Ok | crate::runtool::Classification::RecoverableError => {}
            }
            Ok((value, deps))
        };

        match self.cache.apply(pk, &resolver, "run_tool", compute) {
            Ok(result) => Ok((result.value, result.deps)),
            Err(e) if fatal.get() => Err(EvalFailure::fatal(e.to_string())),
            Err(e) => Err(EvalFailure::recoverable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::host::HostInfo;
    use std::sync::Arc as Rc;
    use vesta_protocol::cache::MemoryCache;

    #[test]
    fn model_fingerprint_is_stable_across_instances() {
        let body = Rc::new(Expr::IntLit(9));
        let m1 = Model {
            params: vec!["x".into()],
            body: body.clone(),
            env: Context::empty(),
        };
        let m2 = Model {
            params: vec!["x".into()],
            body,
            env: Context::empty(),
        };
        assert_eq!(
            Value::Model(Rc::new(m1)).fingerprint(),
            Value::Model(Rc::new(m2)).fingerprint()
        );
    }

    #[test]
    fn apply_model_caches_across_calls() {
        let hosts = HostSelector::new(vec![HostInfo {
            name: "localhost".into(),
            platform: "linux".into(),
            capacity: 4,
        }]);
        let runner = ModelRunner::new(MemoryCache::new(), hosts, "linux");
        let model = Model {
            params: vec!["x".into()],
            body: Rc::new(Expr::Name("x".into())),
            env: Context::empty(),
        };
        let ctx = Context::empty();

        let (first, _) = runner
            .apply_model(&model, vec![Value::Integer(5)], &ctx)
            .unwrap();
        assert_eq!(first, Value::Integer(5));

        let (second, _) = runner
            .apply_model(&model, vec![Value::Integer(5)], &ctx)
            .unwrap();
        assert_eq!(second, Value::Integer(5));
    }
}
