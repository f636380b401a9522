use axum::response::IntoResponse;

/// Service banner. Undocumented on purpose; probes hit this path constantly.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}
