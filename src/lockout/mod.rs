//! Lockout policy engine.
//!
//! Per-identifier state machine: Clear -> Warning -> Locked -> Clear. All
//! read-modify-write cycles run inside a transaction that locks the
//! identifier's row, so two racing failures are both counted and a
//! threshold crossing fires exactly once, across service instances. Every
//! state transition commits its audit event in the same transaction; if the
//! event cannot be written the transition rolls back with it.

use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgConnection, PgPool, Row};
use std::future::Future;
use tracing::{error, Instrument};
use utoipa::ToSchema;

use crate::audit::{self, AuditEventType};
use crate::config::CoreConfig;
use crate::error::CoreError;

pub mod policy;

/// One row of lockout state per identifier. Never deleted, only reset.
#[derive(Clone, Debug)]
pub struct LockoutRecord {
    pub identifier: String,
    pub failure_count: i32,
    pub window_start: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub offense_count: i32,
    pub last_cleared_at: Option<DateTime<Utc>>,
}

/// Status surfaced to callers. `locked == true` is authoritative regardless
/// of credential correctness.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug)]
pub struct LockoutStatus {
    pub locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub failure_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

impl LockoutStatus {
    fn clear() -> Self {
        Self {
            locked: false,
            locked_until: None,
            failure_count: 0,
            retry_after_seconds: None,
        }
    }

    fn counting(failure_count: i32) -> Self {
        Self {
            locked: false,
            locked_until: None,
            failure_count,
            retry_after_seconds: None,
        }
    }

    fn locked(locked_until: DateTime<Utc>, failure_count: i32, now: DateTime<Utc>) -> Self {
        let millis = locked_until.signed_duration_since(now).num_milliseconds();
        Self {
            locked: true,
            locked_until: Some(locked_until),
            failure_count,
            retry_after_seconds: Some((millis.max(0) + 999) / 1000),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LockoutEngine {
    pool: PgPool,
    config: CoreConfig,
}

impl LockoutEngine {
    #[must_use]
    pub fn new(pool: PgPool, config: CoreConfig) -> Self {
        Self { pool, config }
    }

    /// Count one failure and apply a lock when the threshold is crossed.
    ///
    /// # Errors
    /// `StorageTimeout` when storage does not answer in time,
    /// `AuditWriteFailure` when the transition's audit event cannot be
    /// persisted (the transition rolls back), `Database` otherwise.
    pub async fn record_failure(&self, identifier: &str) -> Result<LockoutStatus, CoreError> {
        self.with_timeout(self.record_failure_inner(identifier))
            .await
    }

    /// Reset the failure window after a successful credential check. Does
    /// not clear an active lock.
    ///
    /// # Errors
    /// `StorageTimeout` or `Database` on storage failure.
    pub async fn record_success(&self, identifier: &str) -> Result<(), CoreError> {
        self.with_timeout(self.record_success_inner(identifier))
            .await
    }

    /// Read path used before any credential check. Lazily clears an expired
    /// lock, emitting LOCKOUT_CLEARED before the new state becomes visible.
    ///
    /// # Errors
    /// `StorageTimeout` or `Database` on storage failure; gate callers must
    /// fail closed on either (see [`Self::check_status_fail_closed`]).
    pub async fn check_status(&self, identifier: &str) -> Result<LockoutStatus, CoreError> {
        self.with_timeout(self.check_status_inner(identifier)).await
    }

    /// Fail-closed variant for the login gate: any storage uncertainty is
    /// reported as locked, since a false "clear" is the worse failure.
    pub async fn check_status_fail_closed(&self, identifier: &str) -> LockoutStatus {
        match self.check_status(identifier).await {
            Ok(status) => status,
            Err(err) => {
                error!("Lockout check failed closed for {identifier}: {err}");
                LockoutStatus {
                    locked: true,
                    locked_until: None,
                    failure_count: 0,
                    retry_after_seconds: None,
                }
            }
        }
    }

    /// Admin override: clear any lock immediately. Idempotent; clearing an
    /// already-clear identifier emits no event.
    ///
    /// # Errors
    /// `StorageTimeout`, `AuditWriteFailure`, or `Database`.
    pub async fn force_unlock(&self, identifier: &str) -> Result<LockoutStatus, CoreError> {
        self.with_timeout(self.force_unlock_inner(identifier)).await
    }

    async fn with_timeout<T, F>(&self, operation: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        match tokio::time::timeout(self.config.storage_timeout(), operation).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::StorageTimeout),
        }
    }

    async fn record_failure_inner(&self, identifier: &str) -> Result<LockoutStatus, CoreError> {
        let now = Utc::now().trunc_subsecs(6);
        let mut tx = self.pool.begin().await?;
        let mut record = lock_record(&mut tx, identifier, now).await?;

        if let Some(locked_until) = record.locked_until {
            if locked_until <= now {
                self.clear_in(&mut tx, &mut record, now, "expired").await?;
            } else {
                // Active lock: count the failure, never move locked_until.
                let failure_count = record.failure_count + 1;
                update_counts(&mut tx, identifier, failure_count, record.window_start, now).await?;
                tx.commit().await.map_err(CoreError::from)?;
                return Ok(LockoutStatus::locked(locked_until, failure_count, now));
            }
        }

        let (failure_count, window_start) =
            if policy::window_expired(record.window_start, now, self.config.lockout_window()) {
                (1, now)
            } else {
                (record.failure_count + 1, record.window_start)
            };

        if failure_count >= self.config.lockout_threshold() {
            let offense_count = policy::next_offense_count(
                record.offense_count,
                record.last_cleared_at,
                now,
                self.config.repeat_offense_window(),
            );
            let duration = policy::lock_duration(
                offense_count,
                self.config.lockout_base_duration(),
                self.config.lockout_max_duration(),
            );
            let locked_until = now
                + ChronoDuration::from_std(duration)
                    .unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 2));

            let query = r"
                UPDATE lockouts
                SET failure_count = $2, window_start = $3, last_failure_at = $4,
                    locked_until = $5, offense_count = $6
                WHERE identifier = $1
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(identifier)
                .bind(failure_count)
                .bind(window_start)
                .bind(now)
                .bind(locked_until)
                .bind(offense_count)
                .execute(&mut *tx)
                .instrument(span)
                .await?;

            let partition = self
                .config
                .audit_partitioning()
                .lockout_partition(identifier);
            audit::append_in(
                &mut tx,
                &partition,
                AuditEventType::LockoutApplied,
                json!({
                    "identifier": identifier,
                    "failure_count": failure_count,
                    "offense_count": offense_count,
                    "locked_until": locked_until,
                }),
            )
            .await
            .map_err(CoreError::AuditWriteFailure)?;

            tx.commit().await.map_err(CoreError::from)?;
            return Ok(LockoutStatus::locked(locked_until, failure_count, now));
        }

        update_counts(&mut tx, identifier, failure_count, window_start, now).await?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(LockoutStatus::counting(failure_count))
    }

    async fn record_success_inner(&self, identifier: &str) -> Result<(), CoreError> {
        let now = Utc::now().trunc_subsecs(6);
        let query = r"
            UPDATE lockouts
            SET failure_count = 0, window_start = $2, last_failure_at = NULL
            WHERE identifier = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(identifier)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn check_status_inner(&self, identifier: &str) -> Result<LockoutStatus, CoreError> {
        let now = Utc::now().trunc_subsecs(6);
        let Some(record) = read_record(&self.pool, identifier).await? else {
            return Ok(LockoutStatus::clear());
        };

        match record.locked_until {
            Some(locked_until) if locked_until > now => Ok(LockoutStatus::locked(
                locked_until,
                record.failure_count,
                now,
            )),
            Some(_) => {
                // Expired: clear under the row lock so exactly one caller
                // emits LOCKOUT_CLEARED.
                let mut tx = self.pool.begin().await?;
                let mut record = lock_record(&mut tx, identifier, now).await?;
                match record.locked_until {
                    Some(locked_until) if locked_until <= now => {
                        self.clear_in(&mut tx, &mut record, now, "expired").await?;
                        tx.commit().await.map_err(CoreError::from)?;
                        Ok(LockoutStatus::clear())
                    }
                    Some(locked_until) => {
                        // Re-locked by a racing failure before we got the lock.
                        tx.commit().await.map_err(CoreError::from)?;
                        Ok(LockoutStatus::locked(
                            locked_until,
                            record.failure_count,
                            now,
                        ))
                    }
                    None => {
                        tx.commit().await.map_err(CoreError::from)?;
                        Ok(LockoutStatus::counting(windowed_count(
                            &record,
                            now,
                            &self.config,
                        )))
                    }
                }
            }
            None => Ok(LockoutStatus::counting(windowed_count(
                &record,
                now,
                &self.config,
            ))),
        }
    }

    async fn force_unlock_inner(&self, identifier: &str) -> Result<LockoutStatus, CoreError> {
        let now = Utc::now().trunc_subsecs(6);
        let mut tx = self.pool.begin().await?;
        let mut record = lock_record(&mut tx, identifier, now).await?;

        if record.locked_until.is_some() {
            self.clear_in(&mut tx, &mut record, now, "admin_override")
                .await?;
        }
        tx.commit().await.map_err(CoreError::from)?;
        Ok(LockoutStatus::clear())
    }

    /// Clear the lock and append LOCKOUT_CLEARED in the same transaction.
    /// `offense_count` survives the clear; it is the escalation memory.
    async fn clear_in(
        &self,
        tx: &mut PgConnection,
        record: &mut LockoutRecord,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), CoreError> {
        let query = r"
            UPDATE lockouts
            SET locked_until = NULL, failure_count = 0, window_start = $2,
                last_failure_at = NULL, last_cleared_at = $2
            WHERE identifier = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&record.identifier)
            .bind(now)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        let partition = self
            .config
            .audit_partitioning()
            .lockout_partition(&record.identifier);
        audit::append_in(
            tx,
            &partition,
            AuditEventType::LockoutCleared,
            json!({
                "identifier": record.identifier,
                "reason": reason,
                "was_locked_until": record.locked_until,
            }),
        )
        .await
        .map_err(CoreError::AuditWriteFailure)?;

        record.locked_until = None;
        record.failure_count = 0;
        record.window_start = now;
        record.last_failure_at = None;
        record.last_cleared_at = Some(now);
        Ok(())
    }
}

/// Failure count as seen through the sliding window.
fn windowed_count(record: &LockoutRecord, now: DateTime<Utc>, config: &CoreConfig) -> i32 {
    if policy::window_expired(record.window_start, now, config.lockout_window()) {
        0
    } else {
        record.failure_count
    }
}

/// Fetch-or-create the identifier's row and take its row lock. The dummy
/// conflict update makes the upsert acquire the lock on the existing row.
async fn lock_record(
    tx: &mut PgConnection,
    identifier: &str,
    now: DateTime<Utc>,
) -> Result<LockoutRecord, CoreError> {
    let query = r"
        INSERT INTO lockouts (identifier, failure_count, window_start)
        VALUES ($1, 0, $2)
        ON CONFLICT (identifier) DO UPDATE SET identifier = EXCLUDED.identifier
        RETURNING identifier, failure_count, window_start, locked_until,
                  last_failure_at, offense_count, last_cleared_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identifier)
        .bind(now)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await?;
    Ok(record_from_row(&row))
}

async fn read_record(pool: &PgPool, identifier: &str) -> Result<Option<LockoutRecord>, CoreError> {
    let query = r"
        SELECT identifier, failure_count, window_start, locked_until,
               last_failure_at, offense_count, last_cleared_at
        FROM lockouts
        WHERE identifier = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identifier)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(row.map(|row| record_from_row(&row)))
}

async fn update_counts(
    tx: &mut PgConnection,
    identifier: &str,
    failure_count: i32,
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    let query = r"
        UPDATE lockouts
        SET failure_count = $2, window_start = $3, last_failure_at = $4
        WHERE identifier = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identifier)
        .bind(failure_count)
        .bind(window_start)
        .bind(now)
        .execute(&mut *tx)
        .instrument(span)
        .await?;
    Ok(())
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> LockoutRecord {
    LockoutRecord {
        identifier: row.get("identifier"),
        failure_count: row.get("failure_count"),
        window_start: row.get("window_start"),
        locked_until: row.get("locked_until"),
        last_failure_at: row.get("last_failure_at"),
        offense_count: row.get("offense_count"),
        last_cleared_at: row.get("last_cleared_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_status_reports_ceiling_retry_after() {
        let now = Utc::now().trunc_subsecs(6);
        let locked_until = now + ChronoDuration::milliseconds(1500);
        let status = LockoutStatus::locked(locked_until, 5, now);
        assert!(status.locked);
        assert_eq!(status.retry_after_seconds, Some(2));
    }

    #[test]
    fn clear_status_has_no_retry_hint() {
        let status = LockoutStatus::clear();
        assert!(!status.locked);
        assert_eq!(status.retry_after_seconds, None);
        let json = serde_json::to_string(&status).expect("serialize status");
        assert!(!json.contains("retry_after_seconds"));
    }

    #[test]
    fn windowed_count_drops_stale_windows() {
        let now = Utc::now();
        let config = CoreConfig::new();
        let record = LockoutRecord {
            identifier: "alice".to_string(),
            failure_count: 4,
            window_start: now - ChronoDuration::hours(2),
            locked_until: None,
            last_failure_at: None,
            offense_count: 0,
            last_cleared_at: None,
        };
        assert_eq!(windowed_count(&record, now, &config), 0);

        let fresh = LockoutRecord {
            window_start: now - ChronoDuration::minutes(5),
            ..record
        };
        assert_eq!(windowed_count(&fresh, now, &config), 4);
    }
}
