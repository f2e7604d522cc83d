use thiserror::Error;

/// Errors produced while building or executing expression actions.
///
/// Build-time errors leave the graph untouched; execute-time errors abort the
/// current block. Nothing at this layer retries.
#[derive(Error, Debug)]
pub enum QuiverError {
    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Duplicate input: {0}")]
    DuplicateInput(String),

    #[error("Empty actions chain")]
    EmptyChain,

    #[error("Too many temporary columns: {0}")]
    TooManyTemporaryColumns(String),

    #[error("Too many temporary non-const columns: {0}")]
    TooManyTemporaryNonConstColumns(String),

    #[error("ARRAY JOIN on non-array column: {0}")]
    ArrayJoinTypeMismatch(String),

    /// Invariant violations. These indicate bugs, not user errors.
    #[error("Logical error: {0}")]
    LogicalError(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

pub type Result<T, E = QuiverError> = std::result::Result<T, E>;

#[macro_export]
macro_rules! logical_err {
    ($($arg:tt)*) => {
        $crate::QuiverError::LogicalError(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)*) => {
        return Err($crate::QuiverError::NotImplemented(format!($($arg)*)))
    };
}

impl QuiverError {
    /// Stable name for the error kind, usable in tests and diagnostics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownIdentifier(_) => "UnknownIdentifier",
            Self::TypeMismatch(_) => "TypeMismatch",
            Self::DuplicateInput(_) => "DuplicateInput",
            Self::EmptyChain => "EmptyChain",
            Self::TooManyTemporaryColumns(_) => "TooManyTemporaryColumns",
            Self::TooManyTemporaryNonConstColumns(_) => "TooManyTemporaryNonConstColumns",
            Self::ArrayJoinTypeMismatch(_) => "ArrayJoinTypeMismatch",
            Self::LogicalError(_) => "LogicalError",
            Self::NotImplemented(_) => "NotImplemented",
        }
    }
}
