use thiserror::Error;

use crate::claim_store::ClaimStatus;
use crate::contribution::RejectReason;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: ClaimStatus, to: ClaimStatus },

    #[error("contribution rejected: {0}")]
    Rejected(RejectReason),

    #[error("arithmetic overflow")]
    Overflow,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}
