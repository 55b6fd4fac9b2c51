
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelataError {
    #[error("Invalid relation type name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("Illegal state: {0}")]
    IllegalState(String),
    #[error("Invalid target: a {expected} relation cannot hold a {actual} value")]
    InvalidTarget { expected: String, actual: String },
    #[error("Unresolvable relation type: {0}")]
    UnresolvableRelation(String),
    #[error("Parse error: {message}")]
    Parse { message: String, line: Option<usize>, col: Option<usize> },
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, RelataError>;
