// src/ledger_entry.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Debit => Direction::Credit,
            Direction::Credit => Direction::Debit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "debit",
            Direction::Credit => "credit",
        }
    }
}

/// One immutable half-movement of a transaction. Entries are never updated
/// or deleted once written; balances are always derived by summation, never
/// stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub wallet_id: Uuid,
    pub asset_type_id: Uuid,
    pub direction: Direction,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        transaction_id: Uuid,
        wallet_id: Uuid,
        asset_type_id: Uuid,
        direction: Direction,
        amount: Decimal,
    ) -> Result<Self, LedgerError> {
        validate_amount(amount)?;

        Ok(Self {
            id: Uuid::now_v7(),
            transaction_id,
            wallet_id,
            asset_type_id,
            direction,
            amount,
            created_at: Utc::now(),
        })
    }

    /// The contribution of this entry toward `balance = credits - debits`.
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

/// `amount` must be strictly positive, fit precision 28 / scale 8, and be
/// finite (the decimal type cannot represent NaN or infinities, but callers
/// may hand in amounts parsed from untrusted input with excess scale).
pub fn validate_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::BadRequest(
            "amount must be a positive number".to_string(),
        ));
    }
    if amount.scale() > 8 {
        return Err(LedgerError::BadRequest(
            "amount may not have more than 8 fractional digits".to_string(),
        ));
    }
    // Precision 28 significant digits: the mantissa of a `Decimal` is a
    // 96-bit integer, which already caps total digits at 28-29; reject the
    // pathological case where scale 8 plus the integer part would overflow.
    let unscaled = amount.mantissa().unsigned_abs();
    if unscaled.to_string().len() > 28 {
        return Err(LedgerError::BadRequest(
            "amount exceeds supported precision".to_string(),
        ));
    }
    Ok(())
}

/// A ledger entry joined with its asset symbol and transaction metadata, for
/// the history read model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedEntry {
    pub entry_id: Uuid,
    pub transaction_id: Uuid,
    pub asset_type_id: Uuid,
    pub asset_symbol: String,
    pub direction: Direction,
    pub amount: Decimal,
    pub transaction_type: crate::transaction::TransactionType,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_non_positive_amount() {
        assert!(validate_amount(Decimal::ZERO).is_err());
        assert!(validate_amount(dec!(-1)).is_err());
    }

    #[test]
    fn rejects_excess_scale() {
        assert!(validate_amount(dec!(1.123456789)).is_err());
    }

    #[test]
    fn accepts_scale_eight() {
        assert!(validate_amount(dec!(1.12345678)).is_ok());
    }

    #[test]
    fn signed_amount_flips_sign_for_debit() {
        let entry = LedgerEntry::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            Uuid::now_v7(),
            Direction::Debit,
            dec!(100),
        )
        .unwrap();
        assert_eq!(entry.signed_amount(), dec!(-100));
    }
}
