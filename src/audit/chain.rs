//! Hash-chain primitives for the audit log.
//!
//! Each event's hash covers the previous event's hash, the event type, the
//! canonical JSON payload, and the canonical timestamp. Replaying the chain
//! from any trusted point detects insertion, deletion, and modification.

use base64ct::{Base64, Encoding};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::AuditEvent;

/// Chain anchor for the first event of a partition.
#[must_use]
pub fn genesis_hash() -> String {
    Base64::encode_string(&[0u8; 32])
}

/// Timestamps are hashed at microsecond precision so the value survives a
/// round-trip through `TIMESTAMPTZ` unchanged.
#[must_use]
pub fn canonical_timestamp(recorded_at: &DateTime<Utc>) -> String {
    recorded_at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[must_use]
pub fn compute_hash(
    previous_hash: &str,
    event_type: &str,
    payload: &Value,
    recorded_at: &DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(event_type.as_bytes());
    // serde_json sorts object keys, so this rendering is canonical.
    hasher.update(payload.to_string().as_bytes());
    hasher.update(canonical_timestamp(recorded_at).as_bytes());
    Base64::encode_string(&hasher.finalize())
}

/// Outcome of replaying a chain segment.
#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ChainVerdict {
    Valid,
    CorruptAt { sequence: i64 },
}

/// Replay `events` against `prior_hash`, expecting the first event to carry
/// `first_sequence`. Returns the exact sequence where the chain breaks.
#[must_use]
pub fn verify_slice(events: &[AuditEvent], prior_hash: &str, first_sequence: i64) -> ChainVerdict {
    let mut prior = prior_hash.to_string();
    for (index, event) in events.iter().enumerate() {
        let expected_sequence = first_sequence + index as i64;
        if event.sequence != expected_sequence {
            return ChainVerdict::CorruptAt {
                sequence: expected_sequence,
            };
        }
        if event.previous_hash != prior {
            return ChainVerdict::CorruptAt {
                sequence: event.sequence,
            };
        }
        let recomputed = compute_hash(
            &event.previous_hash,
            event.event_type.as_str(),
            &event.payload,
            &event.recorded_at,
        );
        if recomputed != event.current_hash {
            return ChainVerdict::CorruptAt {
                sequence: event.sequence,
            };
        }
        prior = event.current_hash.clone();
    }
    ChainVerdict::Valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEventType;
    use chrono::SubsecRound;
    use serde_json::json;

    fn build_chain(count: usize) -> Vec<AuditEvent> {
        let mut events = Vec::with_capacity(count);
        let mut prior = genesis_hash();
        for index in 0..count {
            let sequence = index as i64 + 1;
            let recorded_at = Utc::now().trunc_subsecs(6);
            let payload = json!({ "identifier": "alice", "n": sequence });
            let current = compute_hash(
                &prior,
                AuditEventType::LockoutApplied.as_str(),
                &payload,
                &recorded_at,
            );
            events.push(AuditEvent {
                partition_key: "global".to_string(),
                sequence,
                event_type: AuditEventType::LockoutApplied,
                payload,
                recorded_at,
                previous_hash: prior.clone(),
                current_hash: current.clone(),
            });
            prior = current;
        }
        events
    }

    #[test]
    fn hash_is_deterministic() {
        let ts = Utc::now().trunc_subsecs(6);
        let payload = json!({ "identifier": "alice" });
        let first = compute_hash(&genesis_hash(), "LOCKOUT_APPLIED", &payload, &ts);
        let second = compute_hash(&genesis_hash(), "LOCKOUT_APPLIED", &payload, &ts);
        assert_eq!(first, second);
    }

    #[test]
    fn hash_depends_on_every_field() {
        let ts = Utc::now().trunc_subsecs(6);
        let payload = json!({ "identifier": "alice" });
        let base = compute_hash(&genesis_hash(), "LOCKOUT_APPLIED", &payload, &ts);
        assert_ne!(
            base,
            compute_hash(&genesis_hash(), "LOCKOUT_CLEARED", &payload, &ts)
        );
        assert_ne!(
            base,
            compute_hash(
                &genesis_hash(),
                "LOCKOUT_APPLIED",
                &json!({ "identifier": "bob" }),
                &ts
            )
        );
    }

    #[test]
    fn untouched_chain_verifies() {
        let events = build_chain(5);
        assert_eq!(
            verify_slice(&events, &genesis_hash(), 1),
            ChainVerdict::Valid
        );
    }

    #[test]
    fn altered_payload_is_pinpointed() {
        let mut events = build_chain(5);
        events[2].payload = serde_json::json!({ "identifier": "mallory" });
        assert_eq!(
            verify_slice(&events, &genesis_hash(), 1),
            ChainVerdict::CorruptAt { sequence: 3 }
        );
    }

    #[test]
    fn deleted_event_is_pinpointed() {
        let mut events = build_chain(5);
        events.remove(1);
        assert_eq!(
            verify_slice(&events, &genesis_hash(), 1),
            ChainVerdict::CorruptAt { sequence: 2 }
        );
    }

    #[test]
    fn rewritten_hash_breaks_the_link() {
        let mut events = build_chain(3);
        // Recompute event 2's hash over tampered data but leave event 3 alone;
        // the dangling previous_hash of event 3 exposes the edit.
        events[1].payload = serde_json::json!({ "identifier": "mallory" });
        events[1].current_hash = compute_hash(
            &events[1].previous_hash,
            events[1].event_type.as_str(),
            &events[1].payload,
            &events[1].recorded_at,
        );
        assert_eq!(
            verify_slice(&events, &genesis_hash(), 1),
            ChainVerdict::CorruptAt { sequence: 3 }
        );
    }

    #[test]
    fn empty_slice_is_valid() {
        assert_eq!(verify_slice(&[], &genesis_hash(), 1), ChainVerdict::Valid);
    }
}
