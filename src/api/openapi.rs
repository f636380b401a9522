use super::handlers::{admin, gate, health};
use utoipa::openapi::{InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// New endpoints go through `.routes(routes!(...))` so they are served and
/// documented from the same registration. `/` stays undocumented.
pub(crate) fn api_router() -> OpenApiRouter {
    OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(gate::report_attempt))
        .routes(routes!(gate::gate_status))
        .routes(routes!(admin::list_attempts))
        .routes(routes!(admin::lockout_status))
        .routes(routes!(admin::force_unlock))
        .routes(routes!(admin::list_audit))
        .routes(routes!(admin::verify_audit))
        .routes(routes!(admin::list_migrations))
        .routes(routes!(admin::run_migrations))
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    // Tags go in here too; the router only merges paths into this document.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    let identifier = env!("CARGO_PKG_LICENSE");
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    info.license = Some(license);

    let mut gate_tag = Tag::new("gate");
    gate_tag.description = Some("Login gate for the auth collaborator".to_string());

    let mut admin_tag = Tag::new("admin");
    admin_tag.description =
        Some("Attempts, lockouts, audit trail and migrations for the admin UI".to_string());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Service and database health".to_string());

    OpenApiBuilder::new()
        .info(info)
        .tags(Some(vec![gate_tag, admin_tag, health_tag]))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            spec.info.description.as_deref(),
            Some(env!("CARGO_PKG_DESCRIPTION"))
        );

        let license = spec.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
            assert_eq!(license.identifier.as_deref(), Some("BSD-3-Clause"));
        }
    }

    #[test]
    fn openapi_tags_and_paths() {
        let spec = openapi();
        let tags = spec.tags.clone().unwrap_or_default();
        assert!(tags
            .iter()
            .any(|tag| tag.name == "gate" && tag.description.is_some()));
        assert!(tags
            .iter()
            .any(|tag| tag.name == "admin" && tag.description.is_some()));
        assert!(tags.iter().any(|tag| tag.name == "health"));

        assert!(spec.paths.paths.contains_key("/v1/auth/attempts"));
        assert!(spec.paths.paths.contains_key("/v1/admin/audit/verify"));
        assert!(spec.paths.paths.contains_key("/v1/admin/migrations/run"));
        assert!(
            spec.paths
                .paths
                .contains_key("/v1/admin/lockouts/{identifier}/unlock")
        );
    }
}
