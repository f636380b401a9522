//! Admin query surface: attempts, lockouts, audit trail, migrations.
//!
//! Handlers are thin: authorize, validate input, delegate to the owning
//! component, map `CoreError` to its documented status. No business rules
//! live here.

use axum::{
    extract::{Extension, Path, Query},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::info;

use super::valid_identifier;
use crate::{
    api::AppState,
    error::{CoreError, ErrorBody},
    migrate::catalog,
};

pub mod guard;
pub mod types;

pub use guard::{AdminIdentity, AdminVerifier, DenyAllVerifier, StaticTokenVerifier};
use guard::require_admin;
use types::{AttemptsQuery, AuditQuery, VerifyResponse};

/// Default page span for audit listings.
const AUDIT_LIST_SPAN: i64 = 200;
/// Default span for chain verification, matching the storage-side cap.
const AUDIT_VERIFY_SPAN: i64 = 10_000;

#[utoipa::path(
    get,
    path = "/v1/admin/attempts",
    params(AttemptsQuery),
    responses(
        (status = 200, description = "Recent login attempts, newest first", body = [crate::tracker::AuthAttempt]),
        (status = 400, description = "Invalid filter", body = ErrorBody),
        (status = 401, description = "Missing or invalid admin credential"),
    ),
    tag = "admin"
)]
pub async fn list_attempts(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<AttemptsQuery>,
) -> Response {
    if let Err(status) = require_admin(&headers, state.verifier.as_ref()) {
        return status.into_response();
    }
    if let Some(identifier) = query.identifier.as_deref() {
        if !valid_identifier(identifier) {
            return CoreError::Validation("identifier has an invalid format".to_string())
                .into_response();
        }
    }
    match state
        .tracker
        .list_attempts(query.identifier.as_deref(), query.since)
        .await
    {
        Ok(attempts) => Json(attempts).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/lockouts/{identifier}",
    params(("identifier" = String, Path, description = "Account or client identifier")),
    responses(
        (status = 200, description = "Current lockout state", body = crate::lockout::LockoutStatus),
        (status = 400, description = "Invalid identifier", body = ErrorBody),
        (status = 401, description = "Missing or invalid admin credential"),
        (status = 504, description = "Storage did not answer in time", body = ErrorBody),
    ),
    tag = "admin"
)]
pub async fn lockout_status(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Response {
    if let Err(status) = require_admin(&headers, state.verifier.as_ref()) {
        return status.into_response();
    }
    if !valid_identifier(&identifier) {
        return CoreError::Validation("identifier has an invalid format".to_string())
            .into_response();
    }
    match state.lockout.check_status(&identifier).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/admin/lockouts/{identifier}/unlock",
    params(("identifier" = String, Path, description = "Account or client identifier")),
    responses(
        (status = 200, description = "Lock cleared; idempotent on an unlocked identifier", body = crate::lockout::LockoutStatus),
        (status = 400, description = "Invalid identifier", body = ErrorBody),
        (status = 401, description = "Missing or invalid admin credential"),
        (status = 500, description = "Unlock could not be recorded", body = ErrorBody),
    ),
    tag = "admin"
)]
pub async fn force_unlock(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Response {
    let identity = match require_admin(&headers, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(status) => return status.into_response(),
    };
    if !valid_identifier(&identifier) {
        return CoreError::Validation("identifier has an invalid format".to_string())
            .into_response();
    }
    match state.lockout.force_unlock(&identifier).await {
        Ok(status) => {
            info!("Admin {} force-unlocked {identifier}", identity.subject);
            Json(status).into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/audit",
    params(AuditQuery),
    responses(
        (status = 200, description = "Audit events of one partition, ascending by sequence", body = [crate::audit::AuditEvent]),
        (status = 400, description = "Invalid range or partition", body = ErrorBody),
        (status = 401, description = "Missing or invalid admin credential"),
    ),
    tag = "admin"
)]
pub async fn list_audit(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Response {
    if let Err(status) = require_admin(&headers, state.verifier.as_ref()) {
        return status.into_response();
    }
    let (partition, from, to) = match audit_range(&query, AUDIT_LIST_SPAN) {
        Ok(range) => range,
        Err(err) => return err.into_response(),
    };
    match state.audit.list(&partition, from, to).await {
        Ok(events) => Json(events).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/audit/verify",
    params(AuditQuery),
    responses(
        (status = 200, description = "Chain verification verdict for the range", body = VerifyResponse),
        (status = 400, description = "Invalid range or partition", body = ErrorBody),
        (status = 401, description = "Missing or invalid admin credential"),
    ),
    tag = "admin"
)]
pub async fn verify_audit(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Response {
    if let Err(status) = require_admin(&headers, state.verifier.as_ref()) {
        return status.into_response();
    }
    let (partition, from, to) = match audit_range(&query, AUDIT_VERIFY_SPAN) {
        Ok(range) => range,
        Err(err) => return err.into_response(),
    };
    match state.audit.verify_chain(&partition, from, to).await {
        Ok(verdict) => Json(VerifyResponse {
            partition,
            from,
            to,
            verdict,
        })
        .into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/migrations",
    responses(
        (status = 200, description = "Migration history, ascending by version", body = [crate::migrate::MigrationRecord]),
        (status = 401, description = "Missing or invalid admin credential"),
    ),
    tag = "admin"
)]
pub async fn list_migrations(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if let Err(status) = require_admin(&headers, state.verifier.as_ref()) {
        return status.into_response();
    }
    match state.migrator.status().await {
        Ok(records) => Json(records).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/admin/migrations/run",
    responses(
        (status = 200, description = "Run finished; the report lists applied versions and any halting failure", body = crate::migrate::MigrationReport),
        (status = 401, description = "Missing or invalid admin credential"),
        (status = 409, description = "Another run holds the gate, or a recorded migration was edited", body = ErrorBody),
    ),
    tag = "admin"
)]
pub async fn run_migrations(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    let identity = match require_admin(&headers, state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(status) => return status.into_response(),
    };
    info!("Admin {} triggered a migration run", identity.subject);
    match state.migrator.run(&catalog::builtin()).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Resolve the partition and inclusive range, with a bounded default span.
fn audit_range(query: &AuditQuery, span: i64) -> Result<(String, i64, i64), CoreError> {
    let partition = query.partition.clone().unwrap_or_else(|| "global".to_string());
    if !valid_identifier(&partition) {
        return Err(CoreError::Validation(
            "partition has an invalid format".to_string(),
        ));
    }
    let from = query.from.unwrap_or(1);
    let to = query.to.unwrap_or_else(|| from.saturating_add(span - 1));
    Ok((partition, from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_range_defaults_to_first_page_of_global() {
        let (partition, from, to) =
            audit_range(&AuditQuery::default(), AUDIT_LIST_SPAN).expect("range");
        assert_eq!(partition, "global");
        assert_eq!(from, 1);
        assert_eq!(to, 200);
    }

    #[test]
    fn audit_range_keeps_explicit_bounds() {
        let query = AuditQuery {
            partition: Some("id:user@example.com".to_string()),
            from: Some(50),
            to: Some(60),
        };
        let (partition, from, to) = audit_range(&query, AUDIT_LIST_SPAN).expect("range");
        assert_eq!(partition, "id:user@example.com");
        assert_eq!(from, 50);
        assert_eq!(to, 60);
    }

    #[test]
    fn audit_range_rejects_bad_partition() {
        let query = AuditQuery {
            partition: Some("bad partition".to_string()),
            ..AuditQuery::default()
        };
        assert!(matches!(
            audit_range(&query, AUDIT_LIST_SPAN),
            Err(CoreError::Validation(_))
        ));
    }
}
