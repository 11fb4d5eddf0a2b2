//! Error types for relmap.

use thiserror::Error;

/// The main error type for relmap operations.
#[derive(Debug, Error)]
pub enum RelmapError {
    /// The entity model is malformed (no fields, missing or duplicate id, ...).
    #[error("Invalid entity declaration for '{entity}': {reason}")]
    InvalidEntityDeclaration { entity: String, reason: String },

    /// The entity was never registered.
    #[error("'{0}' is not an entity")]
    NotAnEntity(String),

    /// A projection, populate or filter key is not a declared relation.
    #[error("'{relation}' is not a relation of '{entity}'")]
    NotARelation { entity: String, relation: String },

    /// The relation is declared but its join references could not be inferred.
    #[error("Relation '{relation}' of '{entity}' has no resolvable join references")]
    UnresolvedRelation { entity: String, relation: String },

    /// Unsupported filter operator.
    #[error("Unknown operator: '{0}'")]
    UnknownOperator(String),

    /// A dynamic query document has the wrong shape.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Soft delete was forced on an entity without a soft-delete field.
    #[error("'{0}' does not support soft delete")]
    SoftDeleteNotSupported(String),

    /// A transaction is already open on this querier.
    #[error("Pending transaction")]
    PendingTransaction,

    /// Commit/rollback was requested without an open transaction.
    #[error("No pending transaction")]
    NoPendingTransaction,

    /// Driver error, propagated unchanged.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Connection error reported by a non-sqlx connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelmapError {
    /// Create an invalid declaration error.
    pub fn invalid_entity(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEntityDeclaration {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-a-relation error.
    pub fn not_a_relation(entity: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::NotARelation {
            entity: entity.into(),
            relation: relation.into(),
        }
    }
}

/// Result type alias for relmap operations.
pub type RelmapResult<T> = Result<T, RelmapError>;
