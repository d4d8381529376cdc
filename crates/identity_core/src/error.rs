use thiserror::Error;

use crate::types::ContactId;

/// Failures raised by a `ContactStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("contact {0} not found")]
    NotFound(ContactId),

    /// Serialization failure or lock contention. The transaction was rolled
    /// back; the caller may retry the whole reconciliation.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend: {0}")]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid assertion: {0}")]
    InvalidAssertion(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ReconcileError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidAssertion(_) => 400,
            Self::Store(StoreError::Conflict(_)) => 409,
            Self::Store(_) => 500,
            Self::InvariantViolation(_) => 500,
        }
    }
}
