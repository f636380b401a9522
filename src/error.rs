//! Error taxonomy shared by the safety core and its HTTP surface.
//!
//! Every admin-facing failure maps to a structured JSON body so the admin UI
//! can render it; the end-user-facing gate only ever sees locked/not-locked
//! plus a retry-after hint.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Bad input; recovered locally, never touches storage.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Authoritative rejection: the identifier is locked out.
    #[error("lockout active")]
    LockoutActive { retry_after_seconds: Option<i64> },

    /// Attempt persistence failed; auth itself must not be blocked by this.
    #[error("attempt tracking degraded")]
    TrackingDegraded,

    /// The audit event for a security-critical state change could not be
    /// persisted; the state change rolls back with it.
    #[error("audit write failure")]
    AuditWriteFailure(#[source] anyhow::Error),

    /// A catalog migration differs from what was recorded for the same
    /// version. Requires operator intervention; no migrations proceed.
    #[error("migration v{version} checksum mismatch: recorded {recorded}, catalog {computed}")]
    MigrationChecksumMismatch {
        version: i64,
        recorded: String,
        computed: String,
    },

    /// Another migration run holds the gate; caller retries later.
    #[error("another migration run is in progress")]
    ConcurrentMigration,

    /// Storage did not answer in time. Lockout checks fail closed on this.
    #[error("storage timeout")]
    StorageTimeout,

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Structured error body returned by every failing endpoint.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    /// Stable taxonomy tag, e.g. `lockout_active`.
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

impl CoreError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::LockoutActive { .. } => StatusCode::LOCKED,
            Self::TrackingDegraded => StatusCode::SERVICE_UNAVAILABLE,
            Self::MigrationChecksumMismatch { .. } | Self::ConcurrentMigration => {
                StatusCode::CONFLICT
            }
            Self::StorageTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::AuditWriteFailure(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::LockoutActive { .. } => "lockout_active",
            Self::TrackingDegraded => "tracking_degraded",
            Self::AuditWriteFailure(_) => "audit_write_failure",
            Self::MigrationChecksumMismatch { .. } => "migration_checksum_mismatch",
            Self::ConcurrentMigration => "concurrent_migration",
            Self::StorageTimeout => "storage_timeout",
            Self::Database(_) => "database_error",
            Self::Internal(_) => "internal_error",
        }
    }

    fn body(&self) -> ErrorBody {
        let retry_after_seconds = match self {
            Self::LockoutActive {
                retry_after_seconds,
            } => *retry_after_seconds,
            _ => None,
        };
        // Internal detail stays in the logs; the body carries the taxonomy
        // tag and a short human-readable message only.
        let message = match self {
            Self::Database(_) | Self::Internal(_) | Self::AuditWriteFailure(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        ErrorBody {
            error: self.tag().to_string(),
            message,
            retry_after_seconds,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
