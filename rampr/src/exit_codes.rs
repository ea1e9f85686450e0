use rampr_core::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// Setup hook failed; no load was generated.
    SetupFailed = 21,

    /// Invalid CLI/config (bad flags, invalid durations, invalid thresholds syntax, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, unexpected invariants).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => Self::Success,
            Verdict::Fail => Self::ThresholdsFailed,
            Verdict::Aborted => Self::SetupFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdicts_map_to_documented_codes() {
        assert_eq!(ExitCode::from_verdict(Verdict::Pass).as_i32(), 0);
        assert_eq!(ExitCode::from_verdict(Verdict::Fail).as_i32(), 11);
        assert_eq!(ExitCode::from_verdict(Verdict::Aborted).as_i32(), 21);
    }
}
