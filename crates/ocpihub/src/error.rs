//! Error taxonomy for the hub core.
//!
//! Stale updates are *not* errors: the merge coordinator returns `Ok(None)`
//! for them. Callers therefore have to check both the error and whether the
//! returned entity is present before assuming an update took effect.

use thiserror::Error;

/// Storage operation that failed, for error attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Get,
    Create,
    Update,
    Merge,
    Delete,
    Search,
    Transaction,
}

impl std::fmt::Display for StorageOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StorageOp::Get => "get",
            StorageOp::Create => "create",
            StorageOp::Update => "update",
            StorageOp::Merge => "merge",
            StorageOp::Delete => "delete",
            StorageOp::Search => "search",
            StorageOp::Transaction => "transaction",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    /// A field-attributed validation failure. Returned immediately, never
    /// retried.
    #[error("{entity}: invalid {field}: {reason}")]
    Validation {
        entity: &'static str,
        field: &'static str,
        reason: String,
    },

    /// The record a PATCH targets does not exist. Distinct from a stale
    /// update, which is a silent no-op.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// A Location/Evse PATCH carried nested children. Children are merged
    /// through their own endpoints only.
    #[error("{entity} merge cannot carry owned children")]
    ChildMergeRejected { entity: &'static str },

    /// Reservation id already claimed by a different command.
    #[error("reservation id {reservation_id} already used by command {command_id}")]
    ReservationInUse {
        reservation_id: String,
        command_id: String,
    },

    /// A storage call failed, attributed to the operation and entity.
    #[error("storage {op} failed for {entity}")]
    Storage {
        op: StorageOp,
        entity: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A bulk-merge worker panicked.
    #[error("merge worker panicked: {0}")]
    WorkerPanic(String),
}

impl HubError {
    pub fn validation(
        entity: &'static str,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        HubError::Validation {
            entity,
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        HubError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn storage(
        op: StorageOp,
        entity: &'static str,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        HubError::Storage {
            op,
            entity,
            source: source.into(),
        }
    }
}
