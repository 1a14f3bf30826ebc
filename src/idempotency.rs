// src/idempotency.rs
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::LedgerError;

/// How long a completed write's cached response is honored. After this, the
/// row is ignored (and may be garbage-collected) — the key reverts to the
/// `absent` state.
pub const IDEMPOTENCY_TTL: Duration = Duration::hours(24);

/// The cached outcome of a completed write, keyed by the caller-supplied
/// idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub endpoint: String,
    pub request_hash: String,
    pub response_status: u16,
    pub response_body: serde_json::Value,
    pub transaction_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(
        key: impl Into<String>,
        endpoint: impl Into<String>,
        request_hash: String,
        response_status: u16,
        response_body: serde_json::Value,
        transaction_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            endpoint: endpoint.into(),
            request_hash,
            response_status,
            response_body,
            transaction_id,
            expires_at: now + IDEMPOTENCY_TTL,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Validates a caller-supplied idempotency key against the constraint in
/// §4.6: non-empty, at most 255 characters.
pub fn validate_key(key: &str) -> Result<(), LedgerError> {
    if key.is_empty() {
        return Err(LedgerError::BadRequest(
            "idempotencyKey must not be empty".to_string(),
        ));
    }
    if key.chars().count() > 255 {
        return Err(LedgerError::BadRequest(
            "idempotencyKey must be at most 255 characters".to_string(),
        ));
    }
    Ok(())
}

/// The fields that make two write requests "the same" for idempotency
/// purposes, per §4.5/§9: `metadata` is deliberately excluded — two retries
/// differing only in metadata are treated as duplicates.
pub struct CanonicalRequest<'a> {
    pub asset_type_id: Uuid,
    pub amount: Decimal,
    pub reference: &'a str,
}

/// SHA-256 over a canonical JSON object with lexicographically sorted keys
/// and the amount normalized to a fixed-point string (no exponent, no
/// trailing zeros beyond scale). `serde_json::Map` preserves insertion order
/// by default, so keys are inserted already sorted rather than relying on a
/// `BTreeMap`, which would need its own serialization path.
pub fn hash_request(request: &CanonicalRequest<'_>) -> String {
    let mut canonical = serde_json::Map::new();
    canonical.insert(
        "assetTypeId".to_string(),
        serde_json::Value::String(request.asset_type_id.to_string()),
    );
    canonical.insert(
        "amount".to_string(),
        serde_json::Value::String(canonical_amount(request.amount)),
    );
    canonical.insert(
        "reference".to_string(),
        serde_json::Value::String(request.reference.to_string()),
    );

    let encoded =
        serde_json::to_vec(&serde_json::Value::Object(canonical)).expect("map of strings");

    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    hex::encode(hasher.finalize())
}

/// Normalizes a decimal to its canonical textual form: `Decimal`'s `Display`
/// already omits an exponent, but may carry a scale the caller set
/// explicitly (e.g. `"5.00"` vs `"5"`); normalizing to the minimal
/// representation keeps two requests for the same logical amount hashing
/// identically.
fn canonical_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for byte in bytes.as_ref() {
            write!(out, "{byte:02x}").expect("writing to String never fails");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn same_logical_request_hashes_identically_regardless_of_trailing_zeros() {
        let asset = Uuid::now_v7();
        let a = hash_request(&CanonicalRequest {
            asset_type_id: asset,
            amount: dec!(5.00),
            reference: "PAY-1",
        });
        let b = hash_request(&CanonicalRequest {
            asset_type_id: asset,
            amount: dec!(5),
            reference: "PAY-1",
        });
        assert_eq!(a, b);
    }

    #[test]
    fn different_reference_hashes_differently() {
        let asset = Uuid::now_v7();
        let a = hash_request(&CanonicalRequest {
            asset_type_id: asset,
            amount: dec!(5),
            reference: "PAY-1",
        });
        let b = hash_request(&CanonicalRequest {
            asset_type_id: asset,
            amount: dec!(5),
            reference: "PAY-2",
        });
        assert_ne!(a, b);
    }

    #[test]
    fn validate_key_rejects_empty_and_overlong() {
        assert!(validate_key("").is_err());
        assert!(validate_key(&"a".repeat(256)).is_err());
        assert!(validate_key(&"a".repeat(255)).is_ok());
    }

    #[test]
    fn record_expires_after_ttl() {
        let record = IdempotencyRecord::new(
            "k1",
            "topup",
            "deadbeef".to_string(),
            201,
            serde_json::json!({}),
            Some(Uuid::now_v7()),
        );
        assert!(!record.is_expired(Utc::now()));
        assert!(record.is_expired(Utc::now() + Duration::hours(25)));
    }
}
