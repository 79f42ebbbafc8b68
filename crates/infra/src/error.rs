//! Application-level error surfaced by the services.
//!
//! Domain failures keep their kind; store conflicts surface as
//! `VersionConflict` only inside retry loops and never reach callers.

use thiserror::Error;

use stockflow_core::{DomainError, ItemId};

use crate::store::StoreError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cart is empty")]
    EmptyCart,

    #[error("insufficient stock for item {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        item_id: ItemId,
        requested: i64,
        available: i64,
    },

    #[error("access denied")]
    AccessDenied,

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Stale read detected at commit time. Consumed by [`crate::RetryPolicy`].
    #[error("version conflict: {0}")]
    VersionConflict(String),

    /// Every attempt of `operation` lost a version race.
    #[error("{operation} gave up after {attempts} attempts due to concurrent updates")]
    ConcurrentUpdateExceeded {
        operation: &'static str,
        attempts: u32,
    },

    /// A compensating release could not put reserved stock back; the item's
    /// stock is short by `quantity` until repaired.
    #[error("failed to release {quantity} reserved units of item {item_id}: {reason}")]
    StockReleaseFailed {
        item_id: ItemId,
        quantity: u32,
        reason: String,
    },

    #[error("store failure: {0}")]
    Store(String),

    /// A core invariant did not hold (a bug, not an input problem).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether the caller may reasonably try the same request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::VersionConflict(_) | ServiceError::ConcurrentUpdateExceeded { .. }
        )
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument(msg) => ServiceError::InvalidArgument(msg),
            DomainError::NotFound(what) => ServiceError::NotFound(what),
            DomainError::EmptyCart => ServiceError::EmptyCart,
            DomainError::InsufficientStock {
                item_id,
                requested,
                available,
            } => ServiceError::InsufficientStock {
                item_id,
                requested,
                available,
            },
            DomainError::AccessDenied => ServiceError::AccessDenied,
            DomainError::InvalidTransition(msg) => ServiceError::InvalidTransition(msg),
            DomainError::VersionConflict(msg) => ServiceError::VersionConflict(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => ServiceError::VersionConflict(msg),
            StoreError::Backend(msg) => ServiceError::Store(msg),
        }
    }
}
