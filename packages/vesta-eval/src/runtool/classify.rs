//! Classifies how a completed tool invocation's exit disposition should be
//! treated for caching and error reporting.
//!
//! Grounded on `examples/original_source/progs/vestaeval/PrimRunTool.H`'s
//! `SignalTreatment`/status handling, which lets a model declare ahead of
//! time which exit statuses and signals are "expected" (e.g. a test runner
//! that exits 1 on failing tests is still a cacheable, non-error result).

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalTreatment {
    /// Any exit status/signal is acceptable; the result is always cached.
    AnyOk,
    /// Only a zero exit status is acceptable; anything else is an
    /// evaluation error and is never cached.
    OnlyZero,
    /// A signal (but not a nonzero exit status) aborts caching and is
    /// surfaced as a fatal evaluator error — used for tools whose crash is
    /// never meaningful to memoize (e.g. a segfaulting compiler).
    SignalIsFatal,
}

/// Whether a captured output stream is folded into the result binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputTreatment {
    /// Include the stream under its `stdout`/`stderr` key.
    Report,
    /// Discard the stream; it affects neither the result nor the cache key.
    Ignore,
}

/// Whether a nonzero exit status blocks the `AddEntry` this call would
/// otherwise make.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusTreatment {
    /// A failing status is cacheable like any other result.
    Report,
    /// A failing status must never be cached — the caller sees the result
    /// but the next identical call re-runs the tool rather than trusting it.
    ReportNoCache,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitDisposition {
    Exited(i32),
    Signaled(i32),
    CoreDumped(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// The result is cacheable and not an evaluator error.
    Ok,
    /// The result is cacheable, but the evaluator should report it as an
    /// error value rather than fail the whole run.
    RecoverableError,
    /// The result is an evaluation error, as with `RecoverableError`, and
    /// additionally must never be cached — `status_treatment` asked for a
    /// failing status to not be trusted on a future identical call.
    UncacheableError,
    /// The calling evaluator frame must fail; never cached.
    Fatal,
}

/// Per spec §4.7 item 9: core dumps and fatal signals always abort caching;
/// a nonzero exit status is cacheable unless `signal_treatment` demands a
/// zero status or `status_treatment` explicitly forbids caching a failure.
pub fn classify(
    disposition: ExitDisposition,
    signal_treatment: SignalTreatment,
    status_treatment: StatusTreatment,
) -> Classification {
    match (disposition, signal_treatment) {
        (ExitDisposition::CoreDumped(_), _) => Classification::Fatal,
        (ExitDisposition::Signaled(_), SignalTreatment::SignalIsFatal) => Classification::Fatal,
        (ExitDisposition::Signaled(_), _) => Classification::RecoverableError,
        (ExitDisposition::Exited(0), _) => Classification::Ok,
        (ExitDisposition::Exited(_), SignalTreatment::AnyOk) => Classification::Ok,
        (ExitDisposition::Exited(_), _) => match status_treatment {
            StatusTreatment::ReportNoCache => Classification::UncacheableError,
            StatusTreatment::Report => Classification::RecoverableError,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_exit_is_always_ok() {
        assert_eq!(
            classify(
                ExitDisposition::Exited(0),
                SignalTreatment::OnlyZero,
                StatusTreatment::ReportNoCache
            ),
            Classification::Ok
        );
    }

    #[test]
    fn nonzero_exit_under_only_zero_is_recoverable_when_status_is_reported() {
        assert_eq!(
            classify(
                ExitDisposition::Exited(1),
                SignalTreatment::OnlyZero,
                StatusTreatment::Report
            ),
            Classification::RecoverableError
        );
    }

    #[test]
    fn nonzero_exit_under_report_nocache_is_uncacheable() {
        assert_eq!(
            classify(
                ExitDisposition::Exited(1),
                SignalTreatment::OnlyZero,
                StatusTreatment::ReportNoCache
            ),
            Classification::UncacheableError
        );
    }

    #[test]
    fn nonzero_exit_under_any_ok_is_ok_regardless_of_status_treatment() {
        assert_eq!(
            classify(
                ExitDisposition::Exited(1),
                SignalTreatment::AnyOk,
                StatusTreatment::ReportNoCache
            ),
            Classification::Ok
        );
    }

    #[test]
    fn core_dump_is_always_fatal() {
        assert_eq!(
            classify(
                ExitDisposition::CoreDumped(11),
                SignalTreatment::AnyOk,
                StatusTreatment::Report
            ),
            Classification::Fatal
        );
    }

    #[test]
    fn signal_is_fatal_treatment_escalates() {
        assert_eq!(
            classify(
                ExitDisposition::Signaled(15),
                SignalTreatment::SignalIsFatal,
                StatusTreatment::Report
            ),
            Classification::Fatal
        );
        assert_eq!(
            classify(
                ExitDisposition::Signaled(15),
                SignalTreatment::AnyOk,
                StatusTreatment::Report
            ),
            Classification::RecoverableError
        );
    }
}
