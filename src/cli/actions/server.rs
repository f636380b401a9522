use crate::api;
use crate::cli::actions::Action;
use anyhow::{anyhow, Result};
use url::Url;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            admin_token,
            config,
            migrate_on_start,
        } => {
            let parsed = Url::parse(&dsn)?;
            if parsed.scheme() != "postgres" && parsed.scheme() != "postgresql" {
                return Err(anyhow!("DSN must be a postgres:// URL"));
            }

            api::new(port, dsn, config, admin_token, migrate_on_start).await?;
        }
    }

    Ok(())
}
