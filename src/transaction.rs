// src/transaction.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Topup,
    Bonus,
    Spend,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Topup => "topup",
            TransactionType::Bonus => "bonus",
            TransactionType::Spend => "spend",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "topup" => Ok(TransactionType::Topup),
            "bonus" => Ok(TransactionType::Bonus),
            "spend" => Ok(TransactionType::Spend),
            other => Err(LedgerError::BadRequest(format!(
                "unknown transaction type '{other}'"
            ))),
        }
    }
}

/// The business-level event a pair of ledger entries belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionHeader {
    pub id: Uuid,
    pub transaction_type: TransactionType,
    pub reference: String,
    pub initiated_by: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl TransactionHeader {
    pub fn new(
        transaction_type: TransactionType,
        reference: impl Into<String>,
        initiated_by: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, LedgerError> {
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(LedgerError::BadRequest(
                "reference must not be empty".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::now_v7(),
            transaction_type,
            reference,
            initiated_by: initiated_by.unwrap_or_else(|| "system".to_string()),
            metadata,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_reference() {
        let err = TransactionHeader::new(TransactionType::Topup, "   ", None, None).unwrap_err();
        assert!(matches!(err, LedgerError::BadRequest(_)));
    }

    #[test]
    fn defaults_initiated_by_to_system() {
        let header =
            TransactionHeader::new(TransactionType::Topup, "PAY-1", None, None).unwrap();
        assert_eq!(header.initiated_by, "system");
    }

    #[test]
    fn type_round_trips_through_str() {
        for ty in [
            TransactionType::Topup,
            TransactionType::Bonus,
            TransactionType::Spend,
        ] {
            let parsed: TransactionType = ty.as_str().parse().unwrap();
            assert_eq!(parsed, ty);
        }
    }
}
