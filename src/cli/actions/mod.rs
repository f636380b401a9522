use crate::config::CoreConfig;

pub mod server;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        admin_token: Option<String>,
        config: CoreConfig,
        migrate_on_start: bool,
    },
}
