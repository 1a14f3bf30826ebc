// src/balance.rs
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One asset line within a wallet's balance snapshot: `balance = sum(credit)
/// - sum(debit)` over that (wallet, asset) pair. Never stored, always
/// derived by the ledger store at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceLine {
    pub asset_type_id: Uuid,
    pub name: String,
    pub symbol: String,
    pub balance: Decimal,
}

/// The response shape for `getBalance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub wallet_id: Uuid,
    pub label: String,
    pub balances: Vec<BalanceLine>,
}
