//! Runtime configuration for the safety core.

use std::time::Duration;

const DEFAULT_LOCKOUT_THRESHOLD: i32 = 5;
const DEFAULT_LOCKOUT_WINDOW_SECONDS: u64 = 15 * 60;
const DEFAULT_LOCKOUT_BASE_SECONDS: u64 = 15 * 60;
const DEFAULT_LOCKOUT_MAX_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_REPEAT_OFFENSE_WINDOW_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_STORAGE_TIMEOUT_SECONDS: u64 = 5;
const DEFAULT_ADMIN_ORIGIN: &str = "http://localhost:3000";

/// How audit sequence numbers are partitioned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditPartitioning {
    /// One global gapless sequence (default).
    Global,
    /// One gapless sequence per identifier; migrations get their own.
    PerIdentifier,
}

impl AuditPartitioning {
    /// Parse the `audit.partition` configuration value.
    ///
    /// # Errors
    /// Returns the offending input when it is not a recognized mode.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "global" => Ok(Self::Global),
            "per-identifier" => Ok(Self::PerIdentifier),
            other => Err(format!("unknown audit partitioning: {other}")),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::PerIdentifier => "per-identifier",
        }
    }

    /// Partition key for lockout and attempt events of one identifier.
    #[must_use]
    pub fn lockout_partition(self, identifier: &str) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::PerIdentifier => format!("id:{identifier}"),
        }
    }

    /// Partition key for migration events.
    #[must_use]
    pub const fn migration_partition(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::PerIdentifier => "migrations",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CoreConfig {
    lockout_threshold: i32,
    lockout_window: Duration,
    lockout_base_duration: Duration,
    lockout_max_duration: Duration,
    repeat_offense_window: Duration,
    audit_partitioning: AuditPartitioning,
    storage_timeout: Duration,
    admin_origin: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_window: Duration::from_secs(DEFAULT_LOCKOUT_WINDOW_SECONDS),
            lockout_base_duration: Duration::from_secs(DEFAULT_LOCKOUT_BASE_SECONDS),
            lockout_max_duration: Duration::from_secs(DEFAULT_LOCKOUT_MAX_SECONDS),
            repeat_offense_window: Duration::from_secs(DEFAULT_REPEAT_OFFENSE_WINDOW_SECONDS),
            audit_partitioning: AuditPartitioning::Global,
            storage_timeout: Duration::from_secs(DEFAULT_STORAGE_TIMEOUT_SECONDS),
            admin_origin: DEFAULT_ADMIN_ORIGIN.to_string(),
        }
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: i32) -> Self {
        self.lockout_threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_lockout_window(mut self, window: Duration) -> Self {
        self.lockout_window = window;
        self
    }

    #[must_use]
    pub fn with_lockout_base_duration(mut self, base: Duration) -> Self {
        self.lockout_base_duration = base;
        self
    }

    #[must_use]
    pub fn with_lockout_max_duration(mut self, max: Duration) -> Self {
        self.lockout_max_duration = max;
        self
    }

    #[must_use]
    pub fn with_repeat_offense_window(mut self, window: Duration) -> Self {
        self.repeat_offense_window = window;
        self
    }

    #[must_use]
    pub fn with_audit_partitioning(mut self, partitioning: AuditPartitioning) -> Self {
        self.audit_partitioning = partitioning;
        self
    }

    #[must_use]
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_admin_origin(mut self, origin: String) -> Self {
        self.admin_origin = origin;
        self
    }

    #[must_use]
    pub fn lockout_threshold(&self) -> i32 {
        self.lockout_threshold
    }

    #[must_use]
    pub fn lockout_window(&self) -> Duration {
        self.lockout_window
    }

    #[must_use]
    pub fn lockout_base_duration(&self) -> Duration {
        self.lockout_base_duration
    }

    #[must_use]
    pub fn lockout_max_duration(&self) -> Duration {
        self.lockout_max_duration
    }

    #[must_use]
    pub fn repeat_offense_window(&self) -> Duration {
        self.repeat_offense_window
    }

    #[must_use]
    pub fn audit_partitioning(&self) -> AuditPartitioning {
        self.audit_partitioning
    }

    #[must_use]
    pub fn storage_timeout(&self) -> Duration {
        self.storage_timeout
    }

    #[must_use]
    pub fn admin_origin(&self) -> &str {
        &self.admin_origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CoreConfig::new();
        assert_eq!(config.lockout_threshold(), 5);
        assert_eq!(config.lockout_window(), Duration::from_secs(900));
        assert_eq!(config.lockout_base_duration(), Duration::from_secs(900));
        assert_eq!(config.lockout_max_duration(), Duration::from_secs(86_400));
        assert_eq!(config.audit_partitioning(), AuditPartitioning::Global);
    }

    #[test]
    fn builders_override_defaults() {
        let config = CoreConfig::new()
            .with_lockout_threshold(3)
            .with_lockout_window(Duration::from_secs(600))
            .with_audit_partitioning(AuditPartitioning::PerIdentifier);
        assert_eq!(config.lockout_threshold(), 3);
        assert_eq!(config.lockout_window(), Duration::from_secs(600));
        assert_eq!(
            config.audit_partitioning(),
            AuditPartitioning::PerIdentifier
        );
    }

    #[test]
    fn threshold_never_drops_below_one() {
        let config = CoreConfig::new().with_lockout_threshold(0);
        assert_eq!(config.lockout_threshold(), 1);
    }

    #[test]
    fn partitioning_parses_known_modes() {
        assert_eq!(
            AuditPartitioning::parse("global"),
            Ok(AuditPartitioning::Global)
        );
        assert_eq!(
            AuditPartitioning::parse("per-identifier"),
            Ok(AuditPartitioning::PerIdentifier)
        );
        assert!(AuditPartitioning::parse("per-user").is_err());
    }

    #[test]
    fn partition_keys_by_mode() {
        assert_eq!(
            AuditPartitioning::Global.lockout_partition("alice"),
            "global"
        );
        assert_eq!(
            AuditPartitioning::PerIdentifier.lockout_partition("alice"),
            "id:alice"
        );
        assert_eq!(AuditPartitioning::Global.migration_partition(), "global");
        assert_eq!(
            AuditPartitioning::PerIdentifier.migration_partition(),
            "migrations"
        );
    }
}
