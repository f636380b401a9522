//! Attempt tracking for login flows.
//!
//! Recording is deliberately non-fatal: a failed insert degrades tracking
//! but never blocks the caller's auth flow. Attempt-level audit events are
//! best-effort for the same reason; only lockout transitions require the
//! atomic audit write, and those happen in the policy engine.

use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{error, warn, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{AuditEventType, AuditLog};
use crate::config::AuditPartitioning;
use crate::error::CoreError;

const MAX_LISTED_ATTEMPTS: i64 = 200;

#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

impl AttemptOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// # Errors
    /// Returns the unknown input.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            other => Err(format!("unknown attempt outcome: {other}")),
        }
    }
}

/// One recorded login attempt. Immutable once written.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug)]
pub struct AuthAttempt {
    pub id: Uuid,
    pub identifier: String,
    pub occurred_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Source metadata reported by the auth collaborator.
#[derive(Clone, Debug, Default)]
pub struct AttemptMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AttemptTracker {
    pool: PgPool,
    audit: AuditLog,
    partitioning: AuditPartitioning,
}

impl AttemptTracker {
    #[must_use]
    pub fn new(pool: PgPool, audit: AuditLog, partitioning: AuditPartitioning) -> Self {
        Self {
            pool,
            audit,
            partitioning,
        }
    }

    /// Persist one attempt and emit its attempt-level audit event.
    ///
    /// # Errors
    /// Only ever returns `CoreError::TrackingDegraded`; persistence failures
    /// are logged and must not fail the caller's auth flow.
    pub async fn record_attempt(
        &self,
        identifier: &str,
        outcome: AttemptOutcome,
        meta: &AttemptMeta,
    ) -> Result<AuthAttempt, CoreError> {
        let attempt = AuthAttempt {
            id: Uuid::new_v4(),
            identifier: identifier.to_string(),
            occurred_at: Utc::now().trunc_subsecs(6),
            outcome,
            ip: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
        };

        let query = r"
            INSERT INTO auth_attempts (id, identifier, occurred_at, outcome, ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let inserted = sqlx::query(query)
            .bind(attempt.id)
            .bind(&attempt.identifier)
            .bind(attempt.occurred_at)
            .bind(attempt.outcome.as_str())
            .bind(&attempt.ip)
            .bind(&attempt.user_agent)
            .execute(&self.pool)
            .instrument(span)
            .await;

        if let Err(err) = inserted {
            error!("Failed to record auth attempt: {err}");
            return Err(CoreError::TrackingDegraded);
        }

        let event_type = match outcome {
            AttemptOutcome::Success => AuditEventType::LoginSuccess,
            AttemptOutcome::Failure => AuditEventType::LoginFailure,
        };
        let partition = self.partitioning.lockout_partition(identifier);
        let payload = json!({
            "identifier": identifier,
            "outcome": outcome.as_str(),
            "ip": attempt.ip,
        });
        if let Err(err) = self.audit.append(&partition, event_type, payload).await {
            warn!("Failed to append attempt audit event: {err}");
        }

        Ok(attempt)
    }

    /// Failures for one identifier inside the sliding window, newest first.
    ///
    /// Lockout accounting does not read this ledger: the engine counts
    /// failures in the `lockouts` row its row lock serializes, since two
    /// racing reads of `auth_attempts` could both see the same count. This
    /// is the attempts-eye view of the same window, for cross-checking the
    /// counter during an incident.
    ///
    /// # Errors
    /// Returns `CoreError::Database` when the read fails.
    pub async fn recent_failures(
        &self,
        identifier: &str,
        window: Duration,
    ) -> Result<Vec<AuthAttempt>, CoreError> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(window)
                .unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 2));
        let query = r"
            SELECT id, identifier, occurred_at, outcome, ip, user_agent
            FROM auth_attempts
            WHERE identifier = $1 AND outcome = 'failure' AND occurred_at >= $2
            ORDER BY occurred_at DESC
            LIMIT $3
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(identifier)
            .bind(cutoff)
            .bind(MAX_LISTED_ATTEMPTS)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;

        rows.into_iter().map(|row| attempt_from_row(&row)).collect()
    }

    /// Admin listing with optional identifier and time filters, newest first.
    ///
    /// # Errors
    /// Returns `CoreError::Database` when the read fails.
    pub async fn list_attempts(
        &self,
        identifier: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuthAttempt>, CoreError> {
        let query = r"
            SELECT id, identifier, occurred_at, outcome, ip, user_agent
            FROM auth_attempts
            WHERE ($1::text IS NULL OR identifier = $1)
              AND ($2::timestamptz IS NULL OR occurred_at >= $2)
            ORDER BY occurred_at DESC
            LIMIT $3
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(identifier)
            .bind(since)
            .bind(MAX_LISTED_ATTEMPTS)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;

        rows.into_iter().map(|row| attempt_from_row(&row)).collect()
    }
}

fn attempt_from_row(row: &sqlx::postgres::PgRow) -> Result<AuthAttempt, CoreError> {
    let outcome: String = row.get("outcome");
    let outcome = AttemptOutcome::parse(&outcome).map_err(CoreError::Validation)?;
    Ok(AuthAttempt {
        id: row.get("id"),
        identifier: row.get("identifier"),
        occurred_at: row.get("occurred_at"),
        outcome,
        ip: row.get("ip"),
        user_agent: row.get("user_agent"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_round_trips_wire_names() {
        assert_eq!(
            AttemptOutcome::parse(AttemptOutcome::Success.as_str()),
            Ok(AttemptOutcome::Success)
        );
        assert_eq!(
            AttemptOutcome::parse(AttemptOutcome::Failure.as_str()),
            Ok(AttemptOutcome::Failure)
        );
        assert!(AttemptOutcome::parse("locked").is_err());
    }

    #[test]
    fn outcome_serde_is_lowercase() {
        let json = serde_json::to_string(&AttemptOutcome::Failure).expect("serialize outcome");
        assert_eq!(json, "\"failure\"");
        let decoded: AttemptOutcome =
            serde_json::from_str("\"success\"").expect("deserialize outcome");
        assert_eq!(decoded, AttemptOutcome::Success);
    }
}
