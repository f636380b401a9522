//! Login gate routes for the portfolio backend.
//!
//! The backend reports every credential check outcome here and consults the
//! lockout state before verifying credentials. Responses never carry internal
//! detail; the caller only learns locked or not, plus a retry hint.

use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::ToSchema;

use super::{admin::guard::require_admin, valid_identifier};
use crate::{
    api::AppState,
    error::{CoreError, ErrorBody},
    lockout::LockoutStatus,
    tracker::{AttemptMeta, AttemptOutcome},
};

/// One attempt outcome as reported by the auth collaborator.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AttemptReport {
    pub identifier: String,
    pub outcome: AttemptOutcome,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// What the gate tells its caller. Nothing else leaves this surface.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct GateStatus {
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

#[utoipa::path(
    post,
    path = "/v1/auth/attempts",
    request_body = AttemptReport,
    responses(
        (status = 200, description = "Attempt recorded; identifier is not locked", body = GateStatus),
        (status = 400, description = "Invalid report", body = ErrorBody),
        (status = 401, description = "Missing or invalid credential"),
        (status = 423, description = "Identifier is locked out", body = ErrorBody),
    ),
    tag = "gate"
)]
pub async fn report_attempt(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
    Json(report): Json<AttemptReport>,
) -> Response {
    if let Err(status) = require_admin(&headers, state.verifier.as_ref()) {
        return status.into_response();
    }
    if !valid_identifier(&report.identifier) {
        return CoreError::Validation("identifier has an invalid format".to_string())
            .into_response();
    }

    let meta = AttemptMeta {
        ip: report.ip.clone(),
        user_agent: report.user_agent.clone(),
    };
    // Tracking is non-fatal by contract; a degraded tracker must not block
    // the caller's auth flow.
    if let Err(err) = state
        .tracker
        .record_attempt(&report.identifier, report.outcome, &meta)
        .await
    {
        warn!("Attempt tracking degraded for {}: {err}", report.identifier);
    }

    let status = match report.outcome {
        AttemptOutcome::Failure => {
            match state.lockout.record_failure(&report.identifier).await {
                Ok(status) => status,
                Err(err) => {
                    // Fail closed: an unaccounted failure must not look clear.
                    error!(
                        "Failure accounting for {} failed closed: {err}",
                        report.identifier
                    );
                    LockoutStatus {
                        locked: true,
                        locked_until: None,
                        failure_count: 0,
                        retry_after_seconds: None,
                    }
                }
            }
        }
        AttemptOutcome::Success => {
            if let Err(err) = state.lockout.record_success(&report.identifier).await {
                error!(
                    "Failed to reset the failure window for {}: {err}",
                    report.identifier
                );
            }
            state
                .lockout
                .check_status_fail_closed(&report.identifier)
                .await
        }
    };

    if status.locked {
        return CoreError::LockoutActive {
            retry_after_seconds: status.retry_after_seconds,
        }
        .into_response();
    }
    Json(GateStatus {
        locked: false,
        retry_after_seconds: None,
    })
    .into_response()
}

#[utoipa::path(
    get,
    path = "/v1/auth/lockouts/{identifier}",
    params(("identifier" = String, Path, description = "Account or client identifier")),
    responses(
        (status = 200, description = "Lockout state before a credential check; reports locked on storage uncertainty", body = GateStatus),
        (status = 400, description = "Invalid identifier", body = ErrorBody),
        (status = 401, description = "Missing or invalid credential"),
    ),
    tag = "gate"
)]
pub async fn gate_status(
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
    let status = state.lockout.check_status_fail_closed(&identifier).await;
    Json(GateStatus {
        locked: status.locked,
        retry_after_seconds: status.retry_after_seconds,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_status_omits_retry_hint_when_clear() {
        let status = GateStatus {
            locked: false,
            retry_after_seconds: None,
        };
        let json = serde_json::to_string(&status).expect("serialize gate status");
        assert_eq!(json, "{\"locked\":false}");
    }

    #[test]
    fn attempt_report_accepts_minimal_body() {
        let report: AttemptReport = serde_json::from_str(
            r#"{"identifier":"user@example.com","outcome":"failure"}"#,
        )
        .expect("deserialize report");
        assert_eq!(report.outcome, AttemptOutcome::Failure);
        assert!(report.ip.is_none());
    }
}
