use crate::cli::actions::Action;
use crate::config::{AuditPartitioning, CoreConfig};
use anyhow::Result;
use std::time::Duration;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let partitioning = matches
        .get_one::<String>("audit-partition")
        .map(String::as_str)
        .map_or(Ok(AuditPartitioning::Global), AuditPartitioning::parse)
        .map_err(|err| anyhow::anyhow!(err))?;

    let seconds = |name: &str, default: u64| -> Duration {
        Duration::from_secs(matches.get_one::<u64>(name).copied().unwrap_or(default))
    };

    let config = CoreConfig::new()
        .with_lockout_threshold(
            matches
                .get_one::<i32>("lockout-threshold")
                .copied()
                .unwrap_or(5),
        )
        .with_lockout_window(seconds("lockout-window-seconds", 900))
        .with_lockout_base_duration(seconds("lockout-base-seconds", 900))
        .with_lockout_max_duration(seconds("lockout-max-seconds", 86_400))
        .with_repeat_offense_window(seconds("lockout-repeat-window-seconds", 86_400))
        .with_audit_partitioning(partitioning)
        .with_storage_timeout(seconds("storage-timeout-seconds", 5))
        .with_admin_origin(
            matches
                .get_one::<String>("admin-origin")
                .map_or_else(|| "http://localhost:3000".to_string(), String::clone),
        );

    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one("dsn")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --dsn"))?,
        admin_token: matches.get_one::<String>("admin-token").cloned(),
        config,
        migrate_on_start: matches.get_flag("migrate-on-start"),
    })
}
