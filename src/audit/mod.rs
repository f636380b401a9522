//! Tamper-evident audit log.
//!
//! Events are append-only and hash-chained per partition. Sequence numbers
//! are gapless: each append claims the next number by updating the
//! partition's `audit_heads` row, whose row lock is the single serialized
//! point for writers. Appends run inside the caller's transaction so a
//! security-critical state change and its audit event commit atomically.

use anyhow::{Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Row};
use tracing::Instrument;
use utoipa::ToSchema;

use crate::error::CoreError;

pub mod chain;

pub use chain::ChainVerdict;

/// Upper bound on rows returned by a single list/verify call.
const MAX_RANGE_ROWS: i64 = 10_000;

#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    LoginFailure,
    LoginSuccess,
    LockoutApplied,
    LockoutCleared,
    MigrationApplied,
    MigrationFailed,
}

impl AuditEventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoginFailure => "LOGIN_FAILURE",
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LockoutApplied => "LOCKOUT_APPLIED",
            Self::LockoutCleared => "LOCKOUT_CLEARED",
            Self::MigrationApplied => "MIGRATION_APPLIED",
            Self::MigrationFailed => "MIGRATION_FAILED",
        }
    }

    /// # Errors
    /// Returns the unknown input.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "LOGIN_FAILURE" => Ok(Self::LoginFailure),
            "LOGIN_SUCCESS" => Ok(Self::LoginSuccess),
            "LOCKOUT_APPLIED" => Ok(Self::LockoutApplied),
            "LOCKOUT_CLEARED" => Ok(Self::LockoutCleared),
            "MIGRATION_APPLIED" => Ok(Self::MigrationApplied),
            "MIGRATION_FAILED" => Ok(Self::MigrationFailed),
            other => Err(format!("unknown audit event type: {other}")),
        }
    }
}

/// One immutable, hash-chained audit record.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug)]
pub struct AuditEvent {
    pub partition_key: String,
    pub sequence: i64,
    pub event_type: AuditEventType,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
    pub previous_hash: String,
    pub current_hash: String,
}

/// Append one event inside the caller's transaction.
///
/// The head upsert claims the next gapless sequence and returns the prior
/// hash; a rollback of the surrounding transaction releases both, so the
/// sequence can neither skip nor repeat.
///
/// # Errors
/// Returns an error when the head or event row cannot be written; callers on
/// security-critical paths must treat that as fatal for their state change.
pub async fn append_in(
    conn: &mut PgConnection,
    partition_key: &str,
    event_type: AuditEventType,
    payload: Value,
) -> Result<AuditEvent> {
    let recorded_at = Utc::now().trunc_subsecs(6);

    let query = r"
        INSERT INTO audit_heads (partition_key, next_sequence, last_hash)
        VALUES ($1, 2, $2)
        ON CONFLICT (partition_key) DO UPDATE
            SET next_sequence = audit_heads.next_sequence + 1
        RETURNING next_sequence - 1 AS sequence, last_hash
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let head = sqlx::query(query)
        .bind(partition_key)
        .bind(chain::genesis_hash())
        .fetch_one(&mut *conn)
        .instrument(span)
        .await
        .context("failed to claim audit sequence")?;

    let sequence: i64 = head.get("sequence");
    // On a fresh partition the inserted last_hash is already the genesis
    // anchor; on conflict the returned value is the predecessor's hash.
    let previous_hash: String = head.get("last_hash");
    let current_hash = chain::compute_hash(
        &previous_hash,
        event_type.as_str(),
        &payload,
        &recorded_at,
    );

    let query = "UPDATE audit_heads SET last_hash = $2 WHERE partition_key = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(partition_key)
        .bind(&current_hash)
        .execute(&mut *conn)
        .instrument(span)
        .await
        .context("failed to advance audit head")?;

    let query = r"
        INSERT INTO audit_log
            (partition_key, sequence, event_type, payload, recorded_at, previous_hash, current_hash)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(partition_key)
        .bind(sequence)
        .bind(event_type.as_str())
        .bind(&payload)
        .bind(recorded_at)
        .bind(&previous_hash)
        .bind(&current_hash)
        .execute(&mut *conn)
        .instrument(span)
        .await
        .context("failed to append audit event")?;

    Ok(AuditEvent {
        partition_key: partition_key.to_string(),
        sequence,
        event_type,
        payload,
        recorded_at,
        previous_hash,
        current_hash,
    })
}

/// Read and verification surface over the audit log.
#[derive(Clone, Debug)]
pub struct AuditLog {
    pool: PgPool,
}

impl AuditLog {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one event in its own transaction. Used for events that are not
    /// tied to another state change (attempt-level events).
    ///
    /// # Errors
    /// Returns an error when the event cannot be persisted.
    pub async fn append(
        &self,
        partition_key: &str,
        event_type: AuditEventType,
        payload: Value,
    ) -> Result<AuditEvent> {
        let mut tx = self.pool.begin().await.context("begin audit append")?;
        let event = append_in(&mut tx, partition_key, event_type, payload).await?;
        tx.commit().await.context("commit audit append")?;
        Ok(event)
    }

    /// Events of one partition, ascending by sequence, bounded range.
    ///
    /// # Errors
    /// Returns `CoreError::Validation` for a bad range, `Database` otherwise.
    pub async fn list(
        &self,
        partition_key: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<AuditEvent>, CoreError> {
        validate_range(from, to)?;
        let query = r"
            SELECT partition_key, sequence, event_type, payload, recorded_at,
                   previous_hash, current_hash
            FROM audit_log
            WHERE partition_key = $1 AND sequence BETWEEN $2 AND $3
            ORDER BY sequence ASC
            LIMIT $4
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(partition_key)
            .bind(from)
            .bind(to)
            .bind(MAX_RANGE_ROWS)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;

        rows.into_iter().map(|row| event_from_row(&row)).collect()
    }

    /// Replay the chain over `[from, to]` and report the first corruption.
    ///
    /// The replay anchors on the event before `from` (or the genesis hash),
    /// so a verifier never has to trust the range being checked.
    ///
    /// # Errors
    /// Returns `CoreError::Validation` for a bad range, `Database` otherwise.
    pub async fn verify_chain(
        &self,
        partition_key: &str,
        from: i64,
        to: i64,
    ) -> Result<ChainVerdict, CoreError> {
        validate_range(from, to)?;

        let head_last = self.head_last_sequence(partition_key).await?;
        let effective_to = to.min(head_last);
        if effective_to < from {
            return Ok(ChainVerdict::Valid);
        }

        let prior_hash = if from == 1 {
            chain::genesis_hash()
        } else {
            match self.event_hash(partition_key, from - 1).await? {
                Some(hash) => hash,
                // The predecessor inside the recorded range is gone.
                None => return Ok(ChainVerdict::CorruptAt { sequence: from - 1 }),
            }
        };

        let events = self.list(partition_key, from, effective_to).await?;
        match chain::verify_slice(&events, &prior_hash, from) {
            ChainVerdict::Valid => {
                let expected = effective_to - from + 1;
                if (events.len() as i64) < expected {
                    // Trailing events were deleted; the head still counts them.
                    Ok(ChainVerdict::CorruptAt {
                        sequence: from + events.len() as i64,
                    })
                } else {
                    Ok(ChainVerdict::Valid)
                }
            }
            corrupt => Ok(corrupt),
        }
    }

    async fn head_last_sequence(&self, partition_key: &str) -> Result<i64, CoreError> {
        let query = "SELECT next_sequence FROM audit_heads WHERE partition_key = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(partition_key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.map_or(0, |row| row.get::<i64, _>("next_sequence") - 1))
    }

    async fn event_hash(
        &self,
        partition_key: &str,
        sequence: i64,
    ) -> Result<Option<String>, CoreError> {
        let query =
            "SELECT current_hash FROM audit_log WHERE partition_key = $1 AND sequence = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(partition_key)
            .bind(sequence)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.map(|row| row.get("current_hash")))
    }
}

fn validate_range(from: i64, to: i64) -> Result<(), CoreError> {
    if from < 1 {
        return Err(CoreError::Validation(
            "range start must be >= 1".to_string(),
        ));
    }
    if to < from {
        return Err(CoreError::Validation(
            "range end must not precede range start".to_string(),
        ));
    }
    if to - from >= MAX_RANGE_ROWS {
        return Err(CoreError::Validation(format!(
            "range spans more than {MAX_RANGE_ROWS} events"
        )));
    }
    Ok(())
}

fn event_from_row(row: &sqlx::postgres::PgRow) -> Result<AuditEvent, CoreError> {
    let event_type: String = row.get("event_type");
    let event_type = AuditEventType::parse(&event_type).map_err(CoreError::Validation)?;
    Ok(AuditEvent {
        partition_key: row.get("partition_key"),
        sequence: row.get("sequence"),
        event_type,
        payload: row.get("payload"),
        recorded_at: row.get("recorded_at"),
        previous_hash: row.get("previous_hash"),
        current_hash: row.get("current_hash"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_wire_names() {
        for event_type in [
            AuditEventType::LoginFailure,
            AuditEventType::LoginSuccess,
            AuditEventType::LockoutApplied,
            AuditEventType::LockoutCleared,
            AuditEventType::MigrationApplied,
            AuditEventType::MigrationFailed,
        ] {
            assert_eq!(
                AuditEventType::parse(event_type.as_str()),
                Ok(event_type),
                "round trip for {event_type:?}"
            );
        }
        assert!(AuditEventType::parse("LOGIN_UNKNOWN").is_err());
    }

    #[test]
    fn event_type_serde_matches_as_str() {
        let json = serde_json::to_string(&AuditEventType::LockoutApplied)
            .expect("serialize event type");
        assert_eq!(json, "\"LOCKOUT_APPLIED\"");
    }

    #[test]
    fn range_validation_bounds() {
        assert!(validate_range(1, 1).is_ok());
        assert!(validate_range(5, 4).is_err());
        assert!(validate_range(0, 10).is_err());
        assert!(validate_range(1, MAX_RANGE_ROWS + 1).is_err());
    }
}
