//! Request and response types for the admin query surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::audit::ChainVerdict;

/// Filters for the attempt listing. Both are optional and combine with AND.
#[derive(IntoParams, Deserialize, Debug, Default)]
pub struct AttemptsQuery {
    /// Restrict to one identifier.
    pub identifier: Option<String>,
    /// Only attempts at or after this instant (RFC3339).
    pub since: Option<DateTime<Utc>>,
}

/// Sequence range over one audit partition. Defaults to the first page of
/// the `global` partition.
#[derive(IntoParams, Deserialize, Debug, Default)]
pub struct AuditQuery {
    /// Partition key, e.g. `global` or `id:user@example.com`.
    pub partition: Option<String>,
    /// First sequence number, inclusive. Defaults to 1.
    pub from: Option<i64>,
    /// Last sequence number, inclusive.
    pub to: Option<i64>,
}

/// Verification outcome for one sequence range.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyResponse {
    pub partition: String,
    pub from: i64,
    pub to: i64,
    #[serde(flatten)]
    pub verdict: ChainVerdict,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_response_flattens_verdict() {
        let response = VerifyResponse {
            partition: "global".to_string(),
            from: 1,
            to: 10,
            verdict: ChainVerdict::CorruptAt { sequence: 7 },
        };
        let json = serde_json::to_value(&response).expect("serialize verify response");
        assert_eq!(json["verdict"], "corrupt_at");
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["partition"], "global");
    }
}
