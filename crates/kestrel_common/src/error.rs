use thiserror::Error;

/// Convenience alias for `Result<T, PlanError>`.
pub type PlanResult<T> = Result<T, PlanError>;

/// Error classification surfaced to the gateway client.
///
/// - `Unimplemented`    — the planner cannot express this construct across shards
/// - `InvalidArgument`  — bad input; carries a MySQL-compatible message
/// - `Internal`         — planner invariant violation; should never happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unimplemented,
    InvalidArgument,
    Internal,
}

/// Errors produced while planning the query horizon.
///
/// `Clone + PartialEq` so the query projection can cache one for deferred
/// surfacing and the semantic table can carry the sharded-error sentinel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A construct the planner cannot yet support across shards.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// MySQL-compatible bad-field error.
    #[error("Unknown column '{column}' in '{clause}'")]
    BadField { column: String, clause: String },

    /// Malformed input expression (e.g. a distinct aggregate without an argument).
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Planner invariant violation.
    #[error("[BUG] {0}")]
    Internal(String),
}

impl PlanError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PlanError::Unsupported(_) => ErrorCode::Unimplemented,
            PlanError::BadField { .. } | PlanError::Syntax(_) => ErrorCode::InvalidArgument,
            PlanError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn bad_field(column: impl Into<String>, clause: impl Into<String>) -> PlanError {
        PlanError::BadField { column: column.into(), clause: clause.into() }
    }
}

/// Build an `Unsupported` error.
/// Usage: `return Err(unsupported!("in scatter query: aggregation function '{}'", name))`
#[macro_export]
macro_rules! unsupported {
    ($($arg:tt)*) => {
        $crate::error::PlanError::Unsupported(format!($($arg)*))
    };
}

/// Build an `Internal` error (rendered with a `[BUG]` prefix).
/// Usage: `return Err(bug!("cannot push projections in ordered aggregates"))`
#[macro_export]
macro_rules! bug {
    ($($arg:tt)*) => {
        $crate::error::PlanError::Internal(format!($($arg)*))
    };
}
