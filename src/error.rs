//! Exit codes and the JSON error envelope used by the binary.

use serde::Serialize;

/// Process exit codes.
///
/// - 0: scan completed and duplicates were found
/// - 1: unexpected failure
/// - 2: scan completed without duplicates
/// - 130: interrupted by Ctrl+C
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Duplicates found.
    Success = 0,
    /// An error stopped the scan.
    GeneralError = 1,
    /// Nothing matched.
    NoDuplicates = 2,
    /// Finished early on Ctrl+C; results are partial.
    Interrupted = 130,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Machine-readable code, e.g. `PD001`.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "PD000",
            Self::GeneralError => "PD001",
            Self::NoDuplicates => "PD002",
            Self::Interrupted => "PD130",
        }
    }

    /// Exit code for a completed scan.
    #[must_use]
    pub fn for_outcome(duplicates: usize, interrupted: bool) -> Self {
        if interrupted {
            Self::Interrupted
        } else if duplicates > 0 {
            Self::Success
        } else {
            Self::NoDuplicates
        }
    }
}

/// Error report printed to stderr with `--json`.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// Code such as `PD001`
    pub code: String,
    pub exit_code: i32,
    /// The error chain, outermost first
    pub message: String,
    pub interrupted: bool,
}

impl StructuredError {
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
