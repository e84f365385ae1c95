mod log;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context as _, Result};

use vesta_eval::ast::Expr;
use vesta_eval::config::EvaluatorConfig;
use vesta_eval::context::Context;
use vesta_eval::dpaths::DPaths;
use vesta_eval::eval::Evaluator;
use vesta_eval::host::{HostInfo, HostSelector};
use vesta_eval::modelrun::ModelRunner;
use vesta_protocol::cache::MemoryCache;

#[derive(Parser)]
#[command(name = "vesta-eval", version = git_version::git_version!(fallback = "unknown"))]
struct TopLevelFlags {
    #[arg(long, global = true, value_enum, default_value = "auto")]
    color: log::WhenColor,
    /// Path to a TOML config file (spec `[Evaluator]`/`[CacheServer]`/...
    /// sections). Defaults are used for any section it omits.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate a model, given as a JSON-encoded expression tree (there is
    /// no surface-syntax parser in this build; `vesta-eval eval` consumes
    /// the same `Expr` shape the evaluator's own tests construct).
    Eval {
        file: PathBuf,
        /// Record a call stack on evaluator failures.
        #[arg(long)]
        stack: bool,
        /// Print call-site statistics after evaluation.
        #[arg(long)]
        cstats: bool,
        /// Print model-application statistics after evaluation.
        #[arg(long)]
        mstats: bool,
        /// Re-evaluate and compare against the first pass to catch
        /// dependency under-reporting.
        #[arg(long = "dependency-check")]
        dependency_check: bool,
    },
    /// Print the resolved configuration and exit.
    Config,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let flags = TopLevelFlags::parse();
    let subscriber = log::make_logger(flags.color);
    tracing::subscriber::set_global_default(subscriber)
        .context("installing global tracing subscriber")?;

    let config = match &flags.config {
        Some(path) => EvaluatorConfig::load(path)?,
        None => EvaluatorConfig::default(),
    };

    match flags.command {
        Command::Eval {
            file,
            stack,
            cstats,
            mstats,
            dependency_check,
        } => run_eval(
            &file,
            &config,
            stack || config.evaluator.record_stack,
            cstats || config.user_interface.cstats,
            mstats || config.user_interface.mstats,
            dependency_check || config.evaluator.dependency_check,
        ),
        Command::Config => {
            println!("{config:#?}");
            Ok(())
        }
    }
}

fn run_eval(
    file: &PathBuf,
    config: &EvaluatorConfig,
    record_stack: bool,
    cstats: bool,
    mstats: bool,
    dependency_check: bool,
) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading expression file {}", file.display()))?;
    let expr: Expr = serde_json::from_str(&text)
        .with_context(|| format!("parsing expression tree from {}", file.display()))?;

    let default_platform = config
        .evaluator
        .default_platform
        .clone()
        .unwrap_or_else(|| "localhost".to_string());
    let hosts = HostSelector::new(
        config
            .run_tool
            .hosts
            .iter()
            .map(|name| HostInfo {
                name: name.clone(),
                platform: default_platform.clone(),
                capacity: 1,
            })
            .collect(),
    );
    let runner = Arc::new(ModelRunner::new(MemoryCache::new(), hosts, default_platform));
    let evaluator = Evaluator::with_effects(record_stack, runner.clone());
    let ctx = Context::empty();

    let mut deps = DPaths::empty();
    let value = evaluator
        .eval(&expr, &ctx, &mut deps)
        .map_err(|failure| color_eyre::eyre::eyre!(failure.to_string()))?;

    println!("{value}");

    if dependency_check {
        let mut second_deps = DPaths::empty();
        let second_value = evaluator
            .eval(&expr, &ctx, &mut second_deps)
            .map_err(|failure| color_eyre::eyre::eyre!(failure.to_string()))?;
        if second_value != value {
            color_eyre::eyre::bail!(
                "dependency check failed: re-evaluation produced a different result"
            );
        }
    }

    if cstats {
        let s = runner.cache_stats().total();
        eprintln!(
            "call count: {} (hits: {}, misses: {}, cache rpc time: {:?})",
            s.calls, s.hits, s.misses, s.rpc_time
        );
    }
    if mstats {
        let s = runner.cache_stats().snapshot("model");
        eprintln!(
            "model application count: {} (hits: {}, misses: {}, cache rpc time: {:?})",
            s.calls, s.hits, s.misses, s.rpc_time
        );
    }

    Ok(())
}
