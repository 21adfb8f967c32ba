//! Hash chain over a certificate's audit trail.
//!
//! Each event commits to its predecessor:
//! `content_hash = SHA-256(previous_hash_bytes || canonical_payload)`, with
//! 32 zero bytes standing in for the predecessor of the first event. Editing,
//! dropping or reordering a stored event breaks every hash after it.

use std::collections::BTreeMap;

use certchain_core::canonical::encode_fields;
use certchain_core::Hash;
use sha2::{Digest as _, Sha256};

use crate::types::AuditEvent;
use crate::Result;

pub(crate) fn genesis_hash_hex() -> String {
    Hash::zero().to_hex()
}

/// Everything in the event except the two hashes, as canonical JSON.
pub(crate) fn canonical_event_payload(event: &AuditEvent) -> String {
    let mut fields = BTreeMap::new();
    fields.insert("eventId".to_string(), event.event_id.clone());
    fields.insert("certificateId".to_string(), event.certificate_id.clone());
    fields.insert("sequence".to_string(), event.sequence.to_string());
    fields.insert("timestamp".to_string(), event.timestamp.clone());
    fields.insert("action".to_string(), event.action.as_str().to_string());
    if let Some(from) = event.from_status {
        fields.insert("fromStatus".to_string(), from.to_string());
    }
    fields.insert("toStatus".to_string(), event.to_status.to_string());
    if let Some(actor) = event.actor.as_ref() {
        fields.insert("actor".to_string(), actor.clone());
    }
    for (key, value) in &event.detail {
        fields.insert(format!("detail.{key}"), value.clone());
    }
    encode_fields(&fields)
}

pub(crate) fn compute_chain_hash_hex(previous_hash_hex: &str, canonical_bytes: &[u8]) -> Result<String> {
    let prev = Hash::from_hex(previous_hash_hex)?;

    let mut hasher = Sha256::new();
    hasher.update(prev.as_bytes());
    hasher.update(canonical_bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Check that `events`, ordered by sequence, form an unbroken chain starting
/// at sequence 1.
pub fn verify_chain(events: &[AuditEvent]) -> bool {
    let mut prev = genesis_hash_hex();
    for (expected_sequence, event) in (1u64..).zip(events) {
        if event.sequence != expected_sequence || event.previous_hash != prev {
            return false;
        }
        let payload = canonical_event_payload(event);
        match compute_chain_hash_hex(&prev, payload.as_bytes()) {
            Ok(hash) if hash == event.content_hash => {}
            _ => return false,
        }
        prev = event.content_hash.clone();
    }
    true
}
