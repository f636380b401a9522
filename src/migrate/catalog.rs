//! Migration catalog: ordered definitions and the pure planning step.

use base64ct::{Base64, Encoding};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::MigrationStatus;
use crate::error::CoreError;

/// One versioned migration supplied to the runner. The SQL text is the
/// definition; its checksum pins the version forever.
#[derive(Clone, Copy, Debug)]
pub struct MigrationDef {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

impl MigrationDef {
    #[must_use]
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sql.as_bytes());
        Base64::encode_string(&hasher.finalize())
    }
}

/// Migrations for the portfolio application's schema.
#[must_use]
pub fn builtin() -> Vec<MigrationDef> {
    vec![
        MigrationDef {
            version: 1,
            name: "create_projects",
            sql: include_str!("../../db/migrations/0001_create_projects.sql"),
        },
        MigrationDef {
            version: 2,
            name: "create_contact_messages",
            sql: include_str!("../../db/migrations/0002_create_contact_messages.sql"),
        },
        MigrationDef {
            version: 3,
            name: "create_newsletter_subscribers",
            sql: include_str!("../../db/migrations/0003_create_newsletter_subscribers.sql"),
        },
    ]
}

/// Checksum and status as recorded in `schema_migrations`.
#[derive(Clone, Debug)]
pub struct RecordedMigration {
    pub checksum: String,
    pub status: MigrationStatus,
}

/// Decide which catalog entries to apply, in ascending version order.
///
/// Any catalog entry whose version was recorded under a different checksum
/// aborts the whole plan: a historical migration was edited, and applying
/// anything on top of it would diverge from the recorded schema history.
///
/// # Errors
/// `Validation` for an unordered or duplicated catalog,
/// `MigrationChecksumMismatch` for an edited historical migration.
pub fn plan<'a>(
    catalog: &'a [MigrationDef],
    records: &BTreeMap<i64, RecordedMigration>,
) -> Result<Vec<&'a MigrationDef>, CoreError> {
    let mut previous_version = 0;
    for def in catalog {
        if def.version <= previous_version {
            return Err(CoreError::Validation(format!(
                "migration catalog is not strictly ascending at v{}",
                def.version
            )));
        }
        previous_version = def.version;

        if let Some(recorded) = records.get(&def.version) {
            let computed = def.checksum();
            if recorded.checksum != computed {
                return Err(CoreError::MigrationChecksumMismatch {
                    version: def.version,
                    recorded: recorded.checksum.clone(),
                    computed,
                });
            }
        }
    }

    let highest_applied = records
        .iter()
        .filter(|(_, record)| record.status == MigrationStatus::Applied)
        .map(|(version, _)| *version)
        .max()
        .unwrap_or(0);

    Ok(catalog
        .iter()
        .filter(|def| def.version > highest_applied)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: MigrationDef = MigrationDef {
        version: 1,
        name: "one",
        sql: "CREATE TABLE one (id INT);",
    };
    const V2: MigrationDef = MigrationDef {
        version: 2,
        name: "two",
        sql: "CREATE TABLE two (id INT);",
    };

    fn applied(def: &MigrationDef) -> RecordedMigration {
        RecordedMigration {
            checksum: def.checksum(),
            status: MigrationStatus::Applied,
        }
    }

    #[test]
    fn checksum_is_stable_and_content_addressed() {
        assert_eq!(V1.checksum(), V1.checksum());
        assert_ne!(V1.checksum(), V2.checksum());
    }

    #[test]
    fn empty_store_plans_everything_in_order() {
        let catalog = [V1, V2];
        let plan = plan(&catalog, &BTreeMap::new()).expect("plan");
        let versions: Vec<i64> = plan.iter().map(|def| def.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn applied_versions_are_skipped() {
        let catalog = [V1, V2];
        let records = BTreeMap::from([(1, applied(&V1))]);
        let plan = plan(&catalog, &records).expect("plan");
        let versions: Vec<i64> = plan.iter().map(|def| def.version).collect();
        assert_eq!(versions, vec![2]);
    }

    #[test]
    fn fully_applied_catalog_plans_nothing() {
        let catalog = [V1, V2];
        let records = BTreeMap::from([(1, applied(&V1)), (2, applied(&V2))]);
        assert!(plan(&catalog, &records).expect("plan").is_empty());
    }

    #[test]
    fn failed_version_is_retried_with_matching_checksum() {
        let catalog = [V1, V2];
        let records = BTreeMap::from([
            (1, applied(&V1)),
            (
                2,
                RecordedMigration {
                    checksum: V2.checksum(),
                    status: MigrationStatus::Failed,
                },
            ),
        ]);
        let plan = plan(&catalog, &records).expect("plan");
        let versions: Vec<i64> = plan.iter().map(|def| def.version).collect();
        assert_eq!(versions, vec![2]);
    }

    #[test]
    fn edited_historical_migration_is_fatal() {
        let catalog = [
            MigrationDef {
                sql: "CREATE TABLE one (id BIGINT);",
                ..V1
            },
            V2,
        ];
        let records = BTreeMap::from([(1, applied(&V1))]);
        let err = plan(&catalog, &records).expect_err("must refuse");
        assert!(matches!(
            err,
            CoreError::MigrationChecksumMismatch { version: 1, .. }
        ));
    }

    #[test]
    fn unordered_catalog_is_rejected() {
        let catalog = [V2, V1];
        assert!(matches!(
            plan(&catalog, &BTreeMap::new()),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn builtin_catalog_is_well_formed() {
        let catalog = builtin();
        assert!(plan(&catalog, &BTreeMap::new()).is_ok());
        assert_eq!(catalog.len(), 3);
    }
}
