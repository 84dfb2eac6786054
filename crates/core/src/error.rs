//! Domain error model.

use thiserror::Error;

use crate::reservation::ReservationStatus;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// These are deterministic business outcomes. Storage and transport failures
/// belong to the layers that own them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. non-positive amount, empty key).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The account, or the reservation/owner pair, does not exist.
    #[error("not found")]
    NotFound,

    /// The balance or the reservable amount does not cover the request.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The reservation already reached a terminal state.
    #[error("reservation is not active (status: {0})")]
    InvalidState(ReservationStatus),

    /// Confirmation attempted after `expires_at`.
    #[error("reservation expired")]
    Expired,

    /// Stored state contradicts an account invariant.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}
