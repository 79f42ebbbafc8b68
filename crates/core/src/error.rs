//! Domain error model.

use thiserror::Error;

use crate::id::ItemId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Non-positive quantity, malformed identifier, blank title, ...
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced item/order/cart does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Order placement was attempted with an empty cart.
    #[error("cart is empty")]
    EmptyCart,

    /// A reservation would drive `available_stock` below zero.
    #[error("insufficient stock for item {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        item_id: ItemId,
        requested: i64,
        available: i64,
    },

    /// The caller does not own the referenced resource.
    #[error("access denied")]
    AccessDenied,

    /// A status transition is not allowed from the current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A stale version was observed (optimistic concurrency).
    #[error("version conflict: {0}")]
    VersionConflict(String),
}

impl DomainError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(format!("invalid identifier: {}", msg.into()))
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn version_conflict(msg: impl Into<String>) -> Self {
        Self::VersionConflict(msg.into())
    }
}
