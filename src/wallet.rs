// src/wallet.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

/// `system:treasury` — source of top-ups.
pub const TREASURY_OWNER_REF: &str = "system:treasury";
/// `system:bonus_pool` — source of bonuses.
pub const BONUS_POOL_OWNER_REF: &str = "system:bonus_pool";
/// `system:revenue` — sink of spends.
pub const REVENUE_OWNER_REF: &str = "system:revenue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    User,
    System,
}

/// An account capable of holding balances in any asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub owner_ref: String,
    pub owner_type: OwnerType,
    pub label: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(owner_ref: impl Into<String>, owner_type: OwnerType, label: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            owner_ref: owner_ref.into(),
            owner_type,
            label: label.into(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn system(owner_ref: &str, label: impl Into<String>) -> Self {
        Self::new(owner_ref, OwnerType::System, label)
    }

    pub fn require_active(&self) -> Result<(), LedgerError> {
        if !self.active {
            return Err(LedgerError::BadRequest(format!(
                "wallet '{}' is not active",
                self.id
            )));
        }
        Ok(())
    }
}

/// Which pair of wallets a write operation moves value between. The caller's
/// wallet always plays the role the flow doesn't fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Topup,
    Bonus,
    Spend,
}

impl Flow {
    /// The `owner_ref` of the well-known system wallet this flow touches.
    pub fn system_owner_ref(&self) -> &'static str {
        match self {
            Flow::Topup => TREASURY_OWNER_REF,
            Flow::Bonus => BONUS_POOL_OWNER_REF,
            Flow::Spend => REVENUE_OWNER_REF,
        }
    }

    /// `(from, to)` given the caller's wallet id and the resolved system
    /// wallet id for this flow.
    pub fn route(&self, caller_wallet: Uuid, system_wallet: Uuid) -> (Uuid, Uuid) {
        match self {
            Flow::Topup | Flow::Bonus => (system_wallet, caller_wallet),
            Flow::Spend => (caller_wallet, system_wallet),
        }
    }

    pub fn as_transaction_type(&self) -> crate::transaction::TransactionType {
        match self {
            Flow::Topup => crate::transaction::TransactionType::Topup,
            Flow::Bonus => crate::transaction::TransactionType::Bonus,
            Flow::Spend => crate::transaction::TransactionType::Spend,
        }
    }

    /// Only `spend` enforces a non-negative source balance: system wallets
    /// are the conservation counterparts of user balances and are allowed to
    /// go negative by design.
    pub fn requires_funds_check(&self) -> bool {
        matches!(self, Flow::Spend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topup_routes_from_treasury_to_caller() {
        let caller = Uuid::now_v7();
        let treasury = Uuid::now_v7();
        assert_eq!(Flow::Topup.route(caller, treasury), (treasury, caller));
    }

    #[test]
    fn spend_routes_from_caller_to_revenue() {
        let caller = Uuid::now_v7();
        let revenue = Uuid::now_v7();
        assert_eq!(Flow::Spend.route(caller, revenue), (caller, revenue));
    }

    #[test]
    fn only_spend_requires_funds_check() {
        assert!(Flow::Spend.requires_funds_check());
        assert!(!Flow::Topup.requires_funds_check());
        assert!(!Flow::Bonus.requires_funds_check());
    }
}
