//! Error taxonomy for evaluation failures.
//!
//! Grounded on `examples/original_source/progs/vestaeval/Err.H`'s `Evaluator`
//! exception hierarchy, and on `hurry`'s pervasive use of `color_eyre::eyre`
//! for everything above the library boundary (`bail!`/`ensure!`/`.context()`
//! at call sites rather than a hand-built `Display` chain per error).

use std::fmt;

use crate::value::ErrorSeverity;

/// A failure raised while evaluating an expression, distinct from an
/// infrastructure-level [`Report`] (I/O, RPC, pickling) in that it carries
/// evaluator context: severity and, when `-stack` is active, the call
/// stack at the point of failure.
#[derive(Debug)]
pub struct EvalFailure {
    pub message: String,
    pub severity: ErrorSeverity,
    pub call_stack: Vec<String>,
}

impl EvalFailure {
    pub fn recoverable(message: impl Into<String>) -> Self {
        EvalFailure {
            message: message.into(),
            severity: ErrorSeverity::Recoverable,
            call_stack: Vec::new(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        EvalFailure {
            message: message.into(),
            severity: ErrorSeverity::Fatal,
            call_stack: Vec::new(),
        }
    }

    pub fn with_stack(mut self, call_stack: Vec<String>) -> Self {
        self.call_stack = call_stack;
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == ErrorSeverity::Fatal
    }
}

impl fmt::Display for EvalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;
            for frame in &self.call_stack {
                write!(f, "\n    {frame}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for EvalFailure {}
