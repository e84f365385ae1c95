//! `PrimRunTool`: the `_run_tool` primitive, which materializes a sandbox
//! root, invokes an external tool against it on a selected host, and folds
//! the modified tree plus any `ToolDirServer` queries into the call's
//! dependency set.
//!
//! Grounded on `examples/original_source/progs/vestaeval/PrimRunTool.H`
//! (spec §4.7). The original dispatches the tool over an RPC to a remote
//! `RunToolServer` process; this port keeps the same argument surface and
//! host-selection step but executes locally via [`std::process::Command`],
//! the same way `hurry`'s build-script units shell out to `rustc`/build
//! scripts directly rather than through a custom wire protocol.

pub mod classify;

use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

use color_eyre::eyre::{bail, Result};

use crate::deppath::{DepPath, PathKind};
use crate::dpaths::DPaths;
use crate::fp::Tag;
use crate::host::HostSelector;
use crate::tooldir::ToolDirServer;
use crate::value::{Binding, Value};

pub use classify::{
    classify, Classification, ExitDisposition, OutputTreatment, SignalTreatment, StatusTreatment,
};

/// The arguments to `_run_tool(platform, command, stdin="", stdout_treatment,
/// stderr_treatment, status_treatment, signal_treatment, fp_content, wd,
/// existing_writable, root)`, per spec §4.7's named positional list.
#[derive(Clone, Debug)]
pub struct RunToolArgs {
    pub platform: String,
    pub command_line: Vec<String>,
    pub stdin_data: Vec<u8>,
    pub wd_name: String,
    pub existing_writable: bool,
    pub signal_treatment: SignalTreatment,
    /// Whether the captured stdout stream is folded into the result binding.
    pub stdout_treatment: OutputTreatment,
    /// Whether the captured stderr stream is folded into the result binding.
    pub stderr_treatment: OutputTreatment,
    /// Whether a nonzero exit status blocks caching this call's result.
    pub status_treatment: StatusTreatment,
    /// Files at or above this byte size are represented in the collected
    /// tree by their content fingerprint rather than inline text, so a
    /// modified root containing large generated output doesn't bloat the
    /// pickle (spec §4.7's `fp_content` argument).
    pub fp_content_threshold: usize,
    /// The environment the tool sees, beyond whatever the host process
    /// inherits by default.
    pub env_vars: Vec<(String, String)>,
    pub root: Value,
}

#[derive(Clone, Debug)]
pub struct RunToolOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub disposition: ExitDisposition,
    pub modified_root: Value,
}

static CALL_COUNTER: AtomicU32 = AtomicU32::new(0);

pub struct PrimRunTool<'a> {
    pub hosts: &'a HostSelector,
}

impl<'a> PrimRunTool<'a> {
    pub fn new(hosts: &'a HostSelector) -> Self {
        PrimRunTool { hosts }
    }

    /// Run the tool, returning the composed result binding (spec §4.7 item
    /// 8: `code`, `signal`, `dumped_core`, `root`, plus `stdout`/`stderr`
    /// when their treatment asks for them) and the dependency set the
    /// invocation observed (filesystem queries served by the
    /// `ToolDirServer`, plus the root's own content fingerprint).
    pub fn run(&self, args: &RunToolArgs) -> Result<(Value, DPaths, Classification)> {
        let Some(host) = self.hosts.select(&args.platform) else {
            bail!("no available host for platform `{}`", args.platform);
        };

        let tooldir = ToolDirServer::new(
            CALL_COUNTER.fetch_add(1, Ordering::Relaxed),
            args.root.clone(),
        );

        let mut deps = DPaths::empty();
        let root_content_path = DepPath::root(PathKind::Norm);
        deps.put(root_content_path, args.root.clone());

        let result = self.execute(args, host);
        self.hosts.release(&host.name);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                self.hosts.mark_bad(&host.name);
                return Err(err);
            }
        };

        deps.union_in_place(&tooldir.take_deps());

        let classification = classify(outcome.disposition, args.signal_treatment, args.status_treatment);

        let (code, signal, dumped_core) = match outcome.disposition {
            ExitDisposition::Exited(code) => (code, 0, false),
            ExitDisposition::Signaled(signal) => (-1, signal, false),
            ExitDisposition::CoreDumped(signal) => (-1, signal, true),
        };
        let mut result = Binding::new();
        result.insert("code", Value::Integer(code), false);
        result.insert("signal", Value::Integer(signal), false);
        result.insert("dumped_core", Value::Boolean(dumped_core), false);
        result.insert("stdout_written", Value::Boolean(!outcome.stdout.is_empty()), false);
        result.insert("stderr_written", Value::Boolean(!outcome.stderr.is_empty()), false);
        result.insert("root", outcome.modified_root, false);
        if args.stdout_treatment == OutputTreatment::Report {
            result.insert("stdout", Value::text(String::from_utf8_lossy(&outcome.stdout).into_owned()), false);
        }
        if args.stderr_treatment == OutputTreatment::Report {
            result.insert("stderr", Value::text(String::from_utf8_lossy(&outcome.stderr).into_owned()), false);
        }

        Ok((Value::Binding(result), deps, classification))
    }

    /// Run the command as a local child process, rooted at a temporary
    /// working directory materialized from `args.root`.
    fn execute(&self, args: &RunToolArgs, host: &crate::host::HostInfo) -> Result<RunToolOutcome> {
        let Some((program, rest)) = args.command_line.split_first() else {
            bail!("_run_tool: empty command line");
        };

        let workdir = materialize(&args.root, &args.wd_name)?;

        let mut child = Command::new(program);
        child.args(rest).current_dir(workdir.path());
        child.envs(args.env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if !args.stdin_data.is_empty() {
            child.stdin(std::process::Stdio::piped());
        }
        child.stdout(std::process::Stdio::piped());
        child.stderr(std::process::Stdio::piped());

        let mut spawned = child
            .spawn()
            .map_err(|e| color_eyre::eyre::eyre!("failed to spawn `{program}` on {}: {e}", host.name))?;

        if !args.stdin_data.is_empty() {
            use std::io::Write;
            if let Some(mut stdin) = spawned.stdin.take() {
                stdin.write_all(&args.stdin_data)?;
            }
        }

        let output = spawned.wait_with_output()?;
        let disposition = exit_disposition(&output.status);
        let modified_root = collect_tree(workdir.path(), args.fp_content_threshold)?;

        Ok(RunToolOutcome {
            stdout: output.stdout,
            stderr: output.stderr,
            disposition,
            modified_root,
        })
    }
}

struct Workdir(tempfile::TempDir);
impl Workdir {
    fn path(&self) -> &std::path::Path {
        self.0.path()
    }
}

fn materialize(root: &Value, _wd_name: &str) -> Result<Workdir> {
    let dir = tempfile::tempdir()?;
    write_tree(root, dir.path())?;
    Ok(Workdir(dir))
}

fn write_tree(value: &Value, at: &std::path::Path) -> Result<()> {
    match value {
        Value::Binding(binding) => {
            std::fs::create_dir_all(at)?;
            for (name, child) in binding.entries() {
                write_tree(child, &at.join(name))?;
            }
            Ok(())
        }
        Value::Text(text) => {
            std::fs::write(at, text.as_bytes())?;
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Walk a materialized tool sandbox back into a [`Value`]. A file at or
/// above `fp_content_threshold` bytes is recorded as its content
/// fingerprint (`Value::Fp`) rather than inlined, matching `fp_content`'s
/// role of keeping large generated artifacts out of the pickled result.
fn collect_tree(at: &std::path::Path, fp_content_threshold: usize) -> Result<Value> {
    if at.is_dir() {
        let mut binding = Binding::new();
        let mut entries: Vec<_> = std::fs::read_dir(at)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = collect_tree(&entry.path(), fp_content_threshold)?;
            binding.insert(name, child, false);
        }
        Ok(Value::Binding(binding))
    } else {
        let bytes = std::fs::read(at)?;
        if bytes.len() >= fp_content_threshold {
            Ok(Value::Fp(Tag::of(&bytes)))
        } else {
            Ok(Value::text(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }
}

fn exit_disposition(status: &std::process::ExitStatus) -> ExitDisposition {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return if status.core_dumped() {
                ExitDisposition::CoreDumped(signal)
            } else {
                ExitDisposition::Signaled(signal)
            };
        }
    }
    ExitDisposition::Exited(status.code().unwrap_or(-1))
}

/// Fingerprint of the command line, used as part of the `_run_tool` PK.
pub fn command_line_fp(command_line: &[String]) -> Tag {
    command_line
        .iter()
        .fold(Tag::ZERO, |acc, part| acc.extend(part.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_fp_is_order_sensitive() {
        let a = command_line_fp(&["cc".into(), "-O2".into()]);
        let b = command_line_fp(&["-O2".into(), "cc".into()]);
        assert_ne!(a, b);
    }

    #[test]
    fn write_and_collect_tree_round_trips_binding() {
        let mut src = Binding::new();
        src.insert("a.txt", Value::text("hello"), false);
        let root = Value::Binding(src);
        let dir = tempfile::tempdir().unwrap();
        write_tree(&root, dir.path()).unwrap();
        let collected = collect_tree(dir.path(), usize::MAX).unwrap();
        assert_eq!(collected, root);
    }

    #[test]
    fn collect_tree_fingerprints_content_past_threshold() {
        let mut src = Binding::new();
        src.insert("big.txt", Value::text("hello"), false);
        let root = Value::Binding(src);
        let dir = tempfile::tempdir().unwrap();
        write_tree(&root, dir.path()).unwrap();
        let collected = collect_tree(dir.path(), 1).unwrap();
        let Value::Binding(b) = collected else {
            panic!("expected a binding");
        };
        assert!(matches!(b.lookup("big.txt"), Some(Value::Fp(_))));
    }
}
