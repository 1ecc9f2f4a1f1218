use chrono::Utc;
use http::StatusCode;
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use sea_orm::SqlErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::allocation::AllocationLine;

/// Message fragments reported by Postgres and SQLite when a write lost a race
/// with another transaction.
const CONFLICT_MARKERS: [&str; 6] = [
    "40001",
    "40p01",
    "could not serialize",
    "deadlock",
    "database is locked",
    "database table is locked",
];

/// Serializable error envelope handed to the HTTP layer.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable error kind (e.g. `insufficient_balance`)
    pub kind: String,
    /// Human-readable description, free of storage internals
    pub message: String,
    /// Partial allocation returned alongside an `insufficient_supply` error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_allocation: Option<Vec<AllocationLine>>,
    /// RFC 3339 timestamp of when the error was produced
    pub timestamp: String,
}

impl From<&ServiceError> for ErrorResponse {
    fn from(error: &ServiceError) -> Self {
        let partial_allocation = match error {
            ServiceError::InsufficientSupply { partial, .. } => Some(partial.clone()),
            _ => None,
        };
        Self {
            kind: error.kind().to_string(),
            message: error.response_message(),
            partial_allocation,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("No conversion path from {uom} to base unit {base_uom} for item {item_id}")]
    InvalidUom {
        item_id: Uuid,
        uom: String,
        base_uom: String,
    },

    #[error(
        "Insufficient balance at location {location_id}: available {available}, requested {requested}"
    )]
    InsufficientBalance {
        location_id: Uuid,
        lot_id: Option<Uuid>,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Insufficient supply for item {item_id}: requested {requested}, available {available}")]
    InsufficientSupply {
        item_id: Uuid,
        requested: Decimal,
        available: Decimal,
        partial: Vec<AllocationLine>,
    },

    #[error("Missing reason code: {0}")]
    MissingReasonCode(String),

    #[error("Tenant mismatch: {0}")]
    TenantMismatch(String),

    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

/// Whether a storage error means the write raced another transaction and can
/// be attempted again after re-reading current state.
pub fn is_storage_conflict(error: &DbErr) -> bool {
    if matches!(error.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        return true;
    }
    let message = error.to_string().to_ascii_lowercase();
    CONFLICT_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

impl ServiceError {
    /// Normalizes a database error, classifying write races as
    /// `StorageConflict` so the retry loop can pick them up.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        let error = error.into_db_err();
        if is_storage_conflict(&error) {
            ServiceError::StorageConflict(error.to_string())
        } else {
            ServiceError::DatabaseError(error)
        }
    }

    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} {} not found", entity, id))
    }

    /// Stable machine-readable kind. Clients branch on this, never on the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidUom { .. } => "invalid_uom",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::InsufficientSupply { .. } => "insufficient_supply",
            Self::MissingReasonCode(_) => "missing_reason_code",
            Self::TenantMismatch(_) => "tenant_mismatch",
            Self::StorageConflict(_) => "storage_conflict",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::EventError(_) => "event_error",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidUom { .. }
            | Self::InsufficientBalance { .. }
            | Self::MissingReasonCode(_)
            | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientSupply { partial, .. } => {
                if partial.is_empty() {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::MULTI_STATUS
                }
            }
            Self::TenantMismatch(_) => StatusCode::FORBIDDEN,
            Self::DatabaseError(_)
            | Self::StorageConflict(_)
            | Self::EventError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Storage and internal errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::StorageConflict(_) => {
                "Inventory was modified concurrently; please retry the request".to_string()
            }
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Only consistency errors are retried; validation, not-found and
    /// authorization errors are final for the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageConflict(_))
    }
}
