use crate::{
    api::handlers::{admin, root},
    audit::AuditLog,
    config::CoreConfig,
    error::CoreError,
    lockout::LockoutEngine,
    migrate::{catalog, MigrationRunner},
    tracker::AttemptTracker,
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::get,
    Extension,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

/// Shared state handed to every handler.
pub struct AppState {
    pub config: CoreConfig,
    pub tracker: AttemptTracker,
    pub lockout: LockoutEngine,
    pub audit: AuditLog,
    pub migrator: MigrationRunner,
    pub verifier: Arc<dyn admin::AdminVerifier>,
}

/// Start the server.
///
/// # Errors
/// Returns an error when the database is unreachable, the bootstrap schema
/// cannot be applied, or a startup migration run hits a checksum mismatch.
pub async fn new(
    port: u16,
    dsn: String,
    config: CoreConfig,
    admin_token: Option<String>,
    migrate_on_start: bool,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .acquire_timeout(config.storage_timeout())
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    // The core's own tables. Idempotent; the portfolio catalog is separate
    // and runs through the migration gate below.
    sqlx::raw_sql(include_str!("../../db/sql/01_gardisto.sql"))
        .execute(&pool)
        .await
        .context("Failed to apply bootstrap schema")?;

    let audit = AuditLog::new(pool.clone());
    let tracker = AttemptTracker::new(
        pool.clone(),
        audit.clone(),
        config.audit_partitioning(),
    );
    let lockout = LockoutEngine::new(pool.clone(), config.clone());
    let migrator = MigrationRunner::new(pool.clone(), config.clone());

    let verifier: Arc<dyn admin::AdminVerifier> = match admin_token {
        Some(token) => Arc::new(admin::StaticTokenVerifier::new(&token)),
        None => {
            warn!("No admin token configured; every authorized route will be rejected");
            Arc::new(admin::DenyAllVerifier)
        }
    };

    if migrate_on_start {
        match migrator.run(&catalog::builtin()).await {
            Ok(report) => {
                info!("Startup migration run applied {:?}", report.applied);
                if let Some(failed) = report.failed {
                    error!(
                        "Startup migration v{} failed: {}",
                        failed.version, failed.message
                    );
                }
            }
            Err(CoreError::ConcurrentMigration) => {
                warn!("Another instance is migrating; continuing without");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(admin_origin(config.admin_origin())?));

    let state = Arc::new(AppState {
        config,
        tracker,
        lockout,
        audit,
        migrator,
        verifier,
    });

    let (router, _openapi) = router().split_for_parts();
    let app = router.route("/", get(root::root)).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(state))
            .layer(Extension(pool)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn admin_origin(base_url: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(base_url).with_context(|| format!("Invalid admin origin: {base_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Admin origin must include a valid host: {base_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build admin origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_origin_strips_path_and_keeps_port() {
        let origin = admin_origin("http://localhost:3000/admin").expect("origin");
        assert_eq!(origin, HeaderValue::from_static("http://localhost:3000"));
    }

    #[test]
    fn admin_origin_rejects_garbage() {
        assert!(admin_origin("not a url").is_err());
    }
}
