// src/adapters/memory.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use chrono::Utc;

use crate::asset::AssetType;
use crate::balance::{BalanceLine, BalanceSnapshot};
use crate::error::LedgerError;
use crate::idempotency::IdempotencyRecord;
use crate::ledger_entry::{Direction, EnrichedEntry, LedgerEntry};
use crate::transaction::TransactionHeader;
use crate::transfer::LedgerAdapter;
use crate::wallet::{OwnerType, Wallet};

#[derive(Default)]
struct Store {
    assets_by_symbol: HashMap<String, AssetType>,
    wallets: HashMap<Uuid, Wallet>,
    system_wallets_by_owner_ref: HashMap<String, Uuid>,
    entries: Vec<LedgerEntry>,
    transactions: HashMap<Uuid, TransactionHeader>,
    idempotency: HashMap<String, IdempotencyRecord>,
}

/// An in-memory `LedgerAdapter` for tests: a single mutex stands in for
/// Postgres's row locks and transaction isolation. Holding it for the whole
/// of `commit_transfer` is the memory equivalent of `BEGIN ... FOR UPDATE
/// ... COMMIT` — no other task can observe a partial write.
pub struct MemoryLedgerAdapter {
    store: Arc<Mutex<Store>>,
}

impl MemoryLedgerAdapter {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
        }
    }

    pub fn seed_asset(&self, asset: AssetType) {
        let mut store = self.store.lock().unwrap();
        store.assets_by_symbol.insert(asset.symbol.clone(), asset);
    }

    pub fn seed_wallet(&self, wallet: Wallet) {
        let mut store = self.store.lock().unwrap();
        store.wallets.insert(wallet.id, wallet);
    }

    pub fn seed_system_wallet(&self, wallet: Wallet) {
        let mut store = self.store.lock().unwrap();
        store
            .system_wallets_by_owner_ref
            .insert(wallet.owner_ref.clone(), wallet.id);
        store.wallets.insert(wallet.id, wallet);
    }

    /// Test-only hook: backdates a stored idempotency record's `expires_at`
    /// into the past, simulating the 24h TTL having elapsed without waiting
    /// for it in real time.
    pub fn expire_idempotency_key(&self, key: &str) {
        let mut store = self.store.lock().unwrap();
        if let Some(record) = store.idempotency.get_mut(key) {
            record.expires_at = Utc::now() - chrono::Duration::hours(25);
        }
    }

    fn balance_of(store: &Store, wallet_id: Uuid, asset_type_id: Uuid) -> Decimal {
        store
            .entries
            .iter()
            .filter(|e| e.wallet_id == wallet_id && e.asset_type_id == asset_type_id)
            .map(|e| e.signed_amount())
            .sum()
    }
}

impl Default for MemoryLedgerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerAdapter for MemoryLedgerAdapter {
    async fn find_asset(&self, asset_id: Uuid) -> Result<AssetType, LedgerError> {
        let store = self.store.lock().unwrap();
        store
            .assets_by_symbol
            .values()
            .find(|a| a.id == asset_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("asset '{asset_id}' not found")))
    }

    async fn find_wallet(&self, wallet_id: Uuid) -> Result<Wallet, LedgerError> {
        let store = self.store.lock().unwrap();
        store
            .wallets
            .get(&wallet_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("wallet '{wallet_id}' not found")))
    }

    async fn find_system_wallet(&self, owner_ref: &str) -> Result<Wallet, LedgerError> {
        let store = self.store.lock().unwrap();
        let wallet_id = store
            .system_wallets_by_owner_ref
            .get(owner_ref)
            .copied()
            .ok_or_else(|| {
                LedgerError::NotFound(format!("system wallet '{owner_ref}' not provisioned"))
            })?;
        store
            .wallets
            .get(&wallet_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("system wallet '{owner_ref}' missing")))
    }

    async fn find_idempotency_record(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, LedgerError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .idempotency
            .get(key)
            .filter(|record| !record.is_expired(Utc::now()))
            .cloned())
    }

    async fn commit_transfer(
        &self,
        wallets: &[Uuid],
        check_funds: Option<(Uuid, Uuid, Decimal)>,
        transaction: &TransactionHeader,
        debit: &LedgerEntry,
        credit: &LedgerEntry,
        idempotency: &IdempotencyRecord,
    ) -> Result<(), LedgerError> {
        let mut store = self.store.lock().unwrap();

        for wallet_id in wallets {
            if !store.wallets.contains_key(wallet_id) {
                return Err(LedgerError::NotFound(format!(
                    "wallet '{wallet_id}' not found"
                )));
            }
        }

        // Idempotency key uniqueness is the same atomic check Postgres does
        // via `ON CONFLICT (key) DO UPDATE ... WHERE expires_at <= now()` —
        // checked while still holding the lock so two concurrent callers
        // with the same key can't both succeed. An expired row is not a
        // conflict: the key has reverted to `absent` and may be reused.
        if let Some(existing) = store.idempotency.get(&idempotency.key) {
            if !existing.is_expired(Utc::now()) {
                return Err(LedgerError::Conflict(format!(
                    "idempotency key '{}' already in use",
                    idempotency.key
                )));
            }
        }

        if let Some((wallet_id, asset_type_id, amount)) = check_funds {
            let current = Self::balance_of(&store, wallet_id, asset_type_id);
            if current < amount {
                return Err(LedgerError::Unprocessable(format!(
                    "wallet '{wallet_id}' has insufficient funds: has {current}, needs {amount}"
                )));
            }
        }

        store.transactions.insert(transaction.id, transaction.clone());
        store.entries.push(debit.clone());
        store.entries.push(credit.clone());
        store
            .idempotency
            .insert(idempotency.key.clone(), idempotency.clone());

        Ok(())
    }

    async fn get_balance(&self, wallet_id: Uuid) -> Result<BalanceSnapshot, LedgerError> {
        let store = self.store.lock().unwrap();
        let wallet = store
            .wallets
            .get(&wallet_id)
            .ok_or_else(|| LedgerError::NotFound(format!("wallet '{wallet_id}' not found")))?;

        let mut totals: HashMap<Uuid, Decimal> = HashMap::new();
        for entry in store.entries.iter().filter(|e| e.wallet_id == wallet_id) {
            *totals.entry(entry.asset_type_id).or_insert(Decimal::ZERO) += entry.signed_amount();
        }

        let mut balances: Vec<BalanceLine> = Vec::new();
        for (asset_type_id, balance) in totals {
            let asset = store
                .assets_by_symbol
                .values()
                .find(|a| a.id == asset_type_id)
                .cloned();
            if let Some(asset) = asset {
                balances.push(BalanceLine {
                    asset_type_id,
                    name: asset.name,
                    symbol: asset.symbol,
                    balance,
                });
            }
        }
        balances.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        Ok(BalanceSnapshot {
            wallet_id,
            label: wallet.label.clone(),
            balances,
        })
    }

    async fn get_history(
        &self,
        wallet_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<EnrichedEntry>, LedgerError> {
        let store = self.store.lock().unwrap();

        let mut entries: Vec<&LedgerEntry> =
            store.entries.iter().filter(|e| e.wallet_id == wallet_id).collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut enriched = Vec::new();
        for entry in entries
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
        {
            let transaction = store
                .transactions
                .get(&entry.transaction_id)
                .ok_or_else(|| {
                    LedgerError::Internal(format!(
                        "entry '{}' references missing transaction",
                        entry.id
                    ))
                })?;
            let asset_symbol = store
                .assets_by_symbol
                .values()
                .find(|a| a.id == entry.asset_type_id)
                .map(|a| a.symbol.clone())
                .unwrap_or_default();

            enriched.push(EnrichedEntry {
                entry_id: entry.id,
                transaction_id: entry.transaction_id,
                asset_type_id: entry.asset_type_id,
                asset_symbol,
                direction: entry.direction,
                amount: entry.amount,
                transaction_type: transaction.transaction_type,
                reference: transaction.reference.clone(),
                created_at: entry.created_at,
            });
        }

        Ok(enriched)
    }

    async fn count_history(&self, wallet_id: Uuid) -> Result<i64, LedgerError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .entries
            .iter()
            .filter(|e| e.wallet_id == wallet_id)
            .count() as i64)
    }

    async fn list_assets(&self) -> Result<Vec<AssetType>, LedgerError> {
        let store = self.store.lock().unwrap();
        let mut assets: Vec<AssetType> = store
            .assets_by_symbol
            .values()
            .filter(|a| a.active)
            .cloned()
            .collect();
        assets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(assets)
    }

    async fn list_wallets(&self) -> Result<Vec<Wallet>, LedgerError> {
        let store = self.store.lock().unwrap();
        let mut wallets: Vec<Wallet> = store.wallets.values().cloned().collect();
        wallets.sort_by(|a, b| {
            let rank = |w: &Wallet| matches!(w.owner_type, OwnerType::User) as u8;
            rank(a).cmp(&rank(b)).then_with(|| a.label.cmp(&b.label))
        });
        Ok(wallets)
    }

    async fn create_asset(&self, asset: AssetType) -> Result<(), LedgerError> {
        let mut store = self.store.lock().unwrap();
        store.assets_by_symbol.insert(asset.symbol.clone(), asset);
        Ok(())
    }

    async fn deactivate_asset(&self, asset_id: Uuid) -> Result<(), LedgerError> {
        let mut store = self.store.lock().unwrap();
        let asset = store
            .assets_by_symbol
            .values_mut()
            .find(|a| a.id == asset_id)
            .ok_or_else(|| LedgerError::NotFound(format!("asset '{asset_id}' not found")))?;
        asset.active = false;
        Ok(())
    }

    async fn create_wallet(&self, wallet: Wallet) -> Result<(), LedgerError> {
        let mut store = self.store.lock().unwrap();
        if wallet.owner_type == OwnerType::System {
            store
                .system_wallets_by_owner_ref
                .insert(wallet.owner_ref.clone(), wallet.id);
        }
        store.wallets.insert(wallet.id, wallet);
        Ok(())
    }

    async fn purge_expired_idempotency(&self) -> Result<u64, LedgerError> {
        let mut store = self.store.lock().unwrap();
        let now = Utc::now();
        let before = store.idempotency.len();
        store.idempotency.retain(|_, record| !record.is_expired(now));
        Ok((before - store.idempotency.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::{OwnerType, TREASURY_OWNER_REF};
    use rust_decimal_macros::dec;

    fn setup() -> (MemoryLedgerAdapter, AssetType, Wallet, Wallet) {
        let adapter = MemoryLedgerAdapter::new();
        let asset = AssetType::new("Gold", "GLD").unwrap();
        adapter.seed_asset(asset.clone());

        let treasury = Wallet::system(TREASURY_OWNER_REF, "Treasury");
        adapter.seed_system_wallet(treasury.clone());

        let user = Wallet::new(Uuid::now_v7().to_string(), OwnerType::User, "Player wallet");
        adapter.seed_wallet(user.clone());

        (adapter, asset, treasury, user)
    }

    #[tokio::test]
    async fn commit_transfer_rejects_reused_idempotency_key() {
        let (adapter, asset, treasury, user) = setup();
        let transaction =
            TransactionHeader::new(crate::transaction::TransactionType::Topup, "PAY-1", None, None)
                .unwrap();
        let debit =
            LedgerEntry::new(transaction.id, treasury.id, asset.id, Direction::Debit, dec!(10))
                .unwrap();
        let credit =
            LedgerEntry::new(transaction.id, user.id, asset.id, Direction::Credit, dec!(10))
                .unwrap();
        let idempotency = IdempotencyRecord::new(
            "key-1",
            "topup",
            "hash".to_string(),
            201,
            serde_json::json!({}),
            Some(transaction.id),
        );

        adapter
            .commit_transfer(&[treasury.id, user.id], None, &transaction, &debit, &credit, &idempotency)
            .await
            .unwrap();

        let err = adapter
            .commit_transfer(&[treasury.id, user.id], None, &transaction, &debit, &credit, &idempotency)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn commit_transfer_enforces_funds_check() {
        let (adapter, asset, treasury, user) = setup();
        let transaction =
            TransactionHeader::new(crate::transaction::TransactionType::Spend, "SPEND-1", None, None)
                .unwrap();
        let debit =
            LedgerEntry::new(transaction.id, user.id, asset.id, Direction::Debit, dec!(50))
                .unwrap();
        let credit =
            LedgerEntry::new(transaction.id, treasury.id, asset.id, Direction::Credit, dec!(50))
                .unwrap();
        let idempotency = IdempotencyRecord::new(
            "key-2",
            "spend",
            "hash".to_string(),
            201,
            serde_json::json!({}),
            Some(transaction.id),
        );

        let err = adapter
            .commit_transfer(
                &[treasury.id, user.id],
                Some((user.id, asset.id, dec!(50))),
                &transaction,
                &debit,
                &credit,
                &idempotency,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unprocessable(_)));
    }

    #[tokio::test]
    async fn balance_is_derived_from_entries() {
        let (adapter, asset, treasury, user) = setup();
        let transaction =
            TransactionHeader::new(crate::transaction::TransactionType::Topup, "PAY-1", None, None)
                .unwrap();
        let debit =
            LedgerEntry::new(transaction.id, treasury.id, asset.id, Direction::Debit, dec!(25))
                .unwrap();
        let credit =
            LedgerEntry::new(transaction.id, user.id, asset.id, Direction::Credit, dec!(25))
                .unwrap();
        let idempotency = IdempotencyRecord::new(
            "key-3",
            "topup",
            "hash".to_string(),
            201,
            serde_json::json!({}),
            Some(transaction.id),
        );

        adapter
            .commit_transfer(&[treasury.id, user.id], None, &transaction, &debit, &credit, &idempotency)
            .await
            .unwrap();

        let snapshot = adapter.get_balance(user.id).await.unwrap();
        assert_eq!(snapshot.balances[0].balance, dec!(25));
    }
}
