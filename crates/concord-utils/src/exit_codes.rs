//! Exit code constants for the concord CLI.
//!
//! # Exit Code Table
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Pipeline ran to completion |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 10 | `DEADLINE` | Request deadline exceeded before any report could be built |
//! | 70 | `REASONING_FAILURE` | Reasoning backend could not be used |
//! | 71 | `RETRIEVAL_FAILURE` | Retrieval service unavailable |
//!
//! A report in which individual documents failed or degraded still exits
//! with `SUCCESS`: per-document outcomes are part of the report, not the
//! process status.

/// Type-safe process exit code.
///
/// # Example
///
/// ```rust
/// use concord_utils::exit_codes::ExitCode;
///
/// assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
/// assert_eq!(ExitCode::RETRIEVAL_FAILURE, ExitCode::from_i32(71));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Success - the pipeline ran to completion
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// Internal error - general failure
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// CLI arguments error - invalid arguments or configuration
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    /// Deadline - the global request deadline elapsed
    pub const DEADLINE: ExitCode = ExitCode(10);

    /// Reasoning failure - the LLM backend could not be constructed or used
    pub const REASONING_FAILURE: ExitCode = ExitCode(70);

    /// Retrieval failure - the search service could not be reached
    pub const RETRIEVAL_FAILURE: ExitCode = ExitCode(71);

    /// Get the numeric exit code value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Create an ExitCode from a raw i32 value.
    ///
    /// Prefer using the named constants when possible.
    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_values_are_stable() {
        assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
        assert_eq!(ExitCode::INTERNAL.as_i32(), 1);
        assert_eq!(ExitCode::CLI_ARGS.as_i32(), 2);
        assert_eq!(ExitCode::DEADLINE.as_i32(), 10);
        assert_eq!(ExitCode::REASONING_FAILURE.as_i32(), 70);
        assert_eq!(ExitCode::RETRIEVAL_FAILURE.as_i32(), 71);
    }

    #[test]
    fn test_i32_conversions() {
        let code: ExitCode = 70.into();
        assert_eq!(code, ExitCode::REASONING_FAILURE);
        let raw: i32 = ExitCode::DEADLINE.into();
        assert_eq!(raw, 10);
    }
}
