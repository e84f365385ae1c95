//! Primary-key derivation: the fingerprint that identifies a cacheable call.
//!
//! Grounded on `examples/original_source/progs/vestaeval/ApplyCache.H`'s
//! `ApplyFunction`/`ApplyModel`/`ApplyRunTool` entry points, each of which
//! salts the call's identity differently so a function call and a model
//! call that happen to share an argument fingerprint never collide.

use crate::fp::Tag;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum CallKind {
    Function = 0,
    Model = 1,
    RunTool = 2,
}

fn salted(kind: CallKind) -> Tag {
    Tag::ZERO.extend([kind as u8])
}

/// PK for an ordinary closure application: salted by the closure's body
/// identity (its fingerprint already folds in the captured environment's
/// names) and the fingerprints of the actual arguments, in order.
pub fn function_pk(closure_fp: Tag, args: &[Value]) -> Tag {
    let mut tag = salted(CallKind::Function).extend(closure_fp.as_bytes());
    for arg in args {
        tag = tag.extend(arg.fingerprint().as_bytes());
    }
    tag
}

/// PK for a model application: like [`function_pk`], plus the target
/// platform, since the same model can be cached independently per platform
/// (spec §4.7/§4.8).
pub fn model_pk(model_fp: Tag, args: &[Value], platform: &str) -> Tag {
    let mut tag = salted(CallKind::Model)
        .extend(model_fp.as_bytes())
        .extend(platform.as_bytes());
    for arg in args {
        tag = tag.extend(arg.fingerprint().as_bytes());
    }
    tag
}

/// PK for a direct `_run_tool` invocation outside of model application:
/// salted by every field spec §4.3's PK table lists for `run_tool` that
/// isn't already folded into the secondary key by `ToolDirServer`'s
/// dependency recording — command line, working root content, platform,
/// stdin, working-directory name, `existing_writable`, all four
/// output/status/signal treatments, and the environment the tool sees.
#[allow(clippy::too_many_arguments)]
pub fn run_tool_pk(
    command_line_fp: Tag,
    root_content_fp: Tag,
    platform: &str,
    stdin_data: &[u8],
    wd_name: &str,
    existing_writable: bool,
    treatments: &str,
    env_vars: &[(String, String)],
) -> Tag {
    let mut tag = salted(CallKind::RunTool)
        .extend(command_line_fp.as_bytes())
        .extend(root_content_fp.as_bytes())
        .extend(platform.as_bytes())
        .extend(stdin_data)
        .extend(wd_name.as_bytes())
        .extend([existing_writable as u8])
        .extend(treatments.as_bytes());
    for (name, value) in env_vars {
        tag = tag.extend(name.as_bytes()).extend(value.as_bytes());
    }
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_and_model_pks_never_collide() {
        let fp = Tag::of(b"body");
        let args = vec![Value::Integer(1)];
        assert_ne!(function_pk(fp, &args), model_pk(fp, &args, "linux"));
    }

    #[test]
    fn model_pk_is_platform_sensitive() {
        let fp = Tag::of(b"body");
        let args = vec![Value::Integer(1)];
        assert_ne!(
            model_pk(fp, &args, "linux"),
            model_pk(fp, &args, "darwin")
        );
    }

    #[test]
    fn run_tool_pk_is_sensitive_to_stdin_and_wd() {
        let cl = Tag::of(b"cc");
        let root = Tag::of(b"root");
        let base = run_tool_pk(cl, root, "linux", b"", ".WD", false, "t", &[]);
        let diff_stdin = run_tool_pk(cl, root, "linux", b"input", ".WD", false, "t", &[]);
        let diff_wd = run_tool_pk(cl, root, "linux", b"", ".OTHER", false, "t", &[]);
        let diff_writable = run_tool_pk(cl, root, "linux", b"", ".WD", true, "t", &[]);
        assert_ne!(base, diff_stdin);
        assert_ne!(base, diff_wd);
        assert_ne!(base, diff_writable);
    }

    #[test]
    fn run_tool_pk_is_sensitive_to_treatments_and_env() {
        let cl = Tag::of(b"cc");
        let root = Tag::of(b"root");
        let base = run_tool_pk(cl, root, "linux", b"", ".WD", false, "report", &[]);
        let diff_treatment = run_tool_pk(cl, root, "linux", b"", ".WD", false, "report_nocache", &[]);
        let diff_env = run_tool_pk(
            cl,
            root,
            "linux",
            b"",
            ".WD",
            false,
            "report",
            &[("PATH".to_string(), "/bin".to_string())],
        );
        assert_ne!(base, diff_treatment);
        assert_ne!(base, diff_env);
    }

    #[test]
    fn function_pk_is_argument_order_sensitive() {
        let fp = Tag::of(b"body");
        let a = vec![Value::Integer(1), Value::Integer(2)];
        let b = vec![Value::Integer(2), Value::Integer(1)];
        assert_ne!(function_pk(fp, &a), function_pk(fp, &b));
    }
}
