use http::StatusCode;
use sea_orm::error::DbErr;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error(
        "Transfer of item {failed_index} (product {product_id}) failed after {completed} completed item(s); compensated: {compensated}: {reason}"
    )]
    PartialTransfer {
        failed_index: usize,
        product_id: Uuid,
        completed: usize,
        compensated: bool,
        reason: String,
    },

    #[error("Allocation of order {order_id} to truck {truck_id} rolled back: {reason}")]
    AllocationRolledBack {
        order_id: Uuid,
        truck_id: Uuid,
        reason: String,
    },

    #[error("Store call timed out after {0} ms")]
    Timeout(u64),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
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

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// True for version-stamp mismatches, the only errors the optimistic
    /// retry helper will retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::ConcurrentModification(_))
    }

    /// Short machine-readable label, used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::CapacityExceeded(_) => "capacity_exceeded",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::PartialTransfer { .. } => "partial_transfer",
            Self::AllocationRolledBack { .. } => "allocation_rolled_back",
            Self::Timeout(_) => "timeout",
            Self::EventError(_) => "event",
            Self::InternalError(_) => "internal",
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::ConcurrentModification(_) | Self::RetriesExhausted { .. } => {
                StatusCode::CONFLICT
            }
            Self::CapacityExceeded(_)
            | Self::InsufficientStock(_)
            | Self::AllocationRolledBack { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PartialTransfer { .. } => StatusCode::MULTI_STATUS,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            Self::ConcurrentModification(id) => {
                format!("Concurrent modification for ID {}", id)
            }
            _ => self.to_string(),
        }
    }
}
