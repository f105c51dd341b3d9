//! Error types shared by the corpus, codec, image accessor and engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that abort an instrumentation run.
///
/// Validation findings are *not* errors; they are collected into a
/// [`ValidationReport`](crate::validate::ValidationReport) so a single run can
/// surface every violation.
#[derive(Debug, Error)]
pub enum CfpError {
    /// Disassembly, section-table or symbol-table text does not have the expected shape.
    #[error("malformed input at line {line}: {reason}")]
    MalformedInput { line: usize, reason: String },

    /// A function or symbol the run depends on is not present in the corpus.
    #[error("missing symbol: {0}")]
    MissingSymbol(String),

    /// A function name is defined more than once and no definition line was given.
    #[error("{name} is defined on several lines ({lines:?}); name the line")]
    AmbiguousSymbol { name: String, lines: Vec<usize> },

    /// No springboard exists for the register used by a `blr`.
    #[error("missing springboard {name} for blr x{register} at {address:#x}")]
    MissingSpringboard { name: String, register: u8, address: u64 },

    /// An instruction/operand combination falls outside its encodable bit ranges.
    #[error("unsupported encoding for {kind}: {reason}")]
    UnsupportedEncoding { kind: &'static str, reason: String },

    /// Filesystem error on one of the images.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An external tool (objdump, nm) failed.
    #[error("toolchain error: {0}")]
    Toolchain(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CfpError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedInput { line, reason: reason.into() }
    }

    pub(crate) fn unsupported(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::UnsupportedEncoding { kind, reason: reason.into() }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Convenience result type for core operations.
pub type CfpResult<T> = Result<T, CfpError>;
