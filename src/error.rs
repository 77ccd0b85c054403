use std::path::PathBuf;

/// Error taxonomy for every fallible operation in the archive reader,
/// directive rewriter, resolver and tool driver.
///
/// `ObjectParse` failures are intentionally *not* a variant here: a member
/// payload that doesn't parse as a COFF object is tolerated (it just
/// contributes no symbols) and is never propagated as an error.
#[derive(Debug, thiserror::Error)]
pub enum PrelibError {
    #[error("{path}: invalid archive magic (expected \"!<arch>\\n\")")]
    BadMagic { path: PathBuf },

    #[error("{path}: bad member header: {detail}")]
    BadMemberHeader { path: PathBuf, detail: String },

    #[error("{path}: member {member} truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        path: PathBuf,
        member: String,
        expected: u64,
        actual: u64,
    },

    #[error("{path}: '.drectve' section length changed during rewrite: expected {expected_len}, got {actual_len}")]
    BadDirective {
        path: PathBuf,
        expected_len: usize,
        actual_len: usize,
    },

    #[error("command failed with status {status}: {command}")]
    ToolFailure { command: String, status: String },

    #[error("no VS<N>COMNTOOLS environment variable points at a usable toolchain")]
    NoToolchain,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PrelibError>;
