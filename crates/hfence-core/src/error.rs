//! Shared error type across hfence crates.

use thiserror::Error;

/// Stable error codes surfaced to orchestrators and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed directive input, rejected at builder call time.
    InvalidArgument,
    /// Cross-directive invariant violated, rejected at build time.
    InvalidPolicy,
    /// Application path or host name could not be resolved.
    ResolutionFailed,
    /// Action/kind combination has no compiler mapping.
    UnsupportedDirective,
    /// The packet-classification engine refused an operation.
    InstallFailed,
    /// Settings file could not be parsed or validated.
    BadConfig,
    /// Unsupported settings schema version.
    UnsupportedVersion,
}

impl ErrorCode {
    /// String representation used in logs and status responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::InvalidPolicy => "INVALID_POLICY",
            ErrorCode::ResolutionFailed => "RESOLUTION_FAILED",
            ErrorCode::UnsupportedDirective => "UNSUPPORTED_DIRECTIVE",
            ErrorCode::InstallFailed => "INSTALL_FAILED",
            ErrorCode::BadConfig => "BAD_CONFIG",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, HFenceError>;

/// Unified error type used by core and firewall.
///
/// Any error returned by build or install means protection is NOT active.
/// Nothing here is retried automatically.
#[derive(Debug, Error)]
pub enum HFenceError {
    #[error("invalid argument to {call}: {reason}")]
    InvalidArgument { call: &'static str, reason: String },
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("failed to resolve {target}: {reason}")]
    ResolutionFailed { target: String, reason: String },
    #[error("unsupported directive {action} {kind}: {reason}")]
    UnsupportedDirective {
        kind: &'static str,
        action: &'static str,
        reason: &'static str,
    },
    #[error("install failed during {op} (code {code:#010x}): {message}")]
    Install {
        op: &'static str,
        code: u32,
        message: String,
    },
    #[error("config: {0}")]
    Config(String),
    #[error("unsupported settings version")]
    UnsupportedVersion,
}

impl HFenceError {
    /// Map error to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            HFenceError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            HFenceError::InvalidPolicy(_) => ErrorCode::InvalidPolicy,
            HFenceError::ResolutionFailed { .. } => ErrorCode::ResolutionFailed,
            HFenceError::UnsupportedDirective { .. } => ErrorCode::UnsupportedDirective,
            HFenceError::Install { .. } => ErrorCode::InstallFailed,
            HFenceError::Config(_) => ErrorCode::BadConfig,
            HFenceError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
        }
    }

    pub fn invalid_argument(call: &'static str, reason: impl Into<String>) -> Self {
        HFenceError::InvalidArgument {
            call,
            reason: reason.into(),
        }
    }
}
