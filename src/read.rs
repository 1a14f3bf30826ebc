// src/read.rs
use std::sync::Arc;

use uuid::Uuid;

use crate::asset::AssetType;
use crate::balance::BalanceSnapshot;
use crate::error::LedgerError;
use crate::ledger_entry::EnrichedEntry;
use crate::transfer::LedgerAdapter;
use crate::wallet::Wallet;

/// `getTransactions`'s default page size when the caller omits `limit`.
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;
/// `getTransactions`'s hard cap on page size, regardless of what the caller
/// asks for.
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// The `getTransactions` response envelope: a wallet's history page plus the
/// pagination parameters that were actually applied (post-clamping) and the
/// total entry count.
#[derive(Debug, Clone)]
pub struct TransactionHistoryPage {
    pub wallet_id: Uuid,
    pub label: String,
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
    pub entries: Vec<EnrichedEntry>,
}

/// Read-only projections over the ledger: asset/wallet listings, balance
/// snapshots, and paginated history. Mirrors `TransferEngine`'s shape —
/// stateless beyond the adapter handle, cheap to clone, safe to share across
/// concurrent callers — since the read side never needs the write side's
/// locking or retry discipline.
#[derive(Clone)]
pub struct ReadService {
    adapter: Arc<dyn LedgerAdapter>,
}

impl ReadService {
    pub fn new(adapter: Arc<dyn LedgerAdapter>) -> Self {
        Self { adapter }
    }

    /// `listAssets`: active asset types ordered by name.
    pub async fn list_assets(&self) -> Result<Vec<AssetType>, LedgerError> {
        self.adapter.list_assets().await
    }

    /// `listWallets`: every wallet, system wallets first, then by label.
    pub async fn list_wallets(&self) -> Result<Vec<Wallet>, LedgerError> {
        self.adapter.list_wallets().await
    }

    /// `getBalance`: the derived per-asset balance snapshot for a wallet.
    pub async fn get_balance(&self, wallet_id: Uuid) -> Result<BalanceSnapshot, LedgerError> {
        self.adapter.get_balance(wallet_id).await
    }

    /// `getTransactions`: a newest-first page of `wallet_id`'s ledger
    /// entries. `limit` is clamped to `[1, 100]` (default 20); `offset`
    /// defaults to 0. These are snapshot reads — read-committed, non-locking
    /// — so they may or may not observe a transfer that commits concurrently.
    pub async fn get_transactions(
        &self,
        wallet_id: Uuid,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<TransactionHistoryPage, LedgerError> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let offset = offset.unwrap_or(0);

        let wallet = self.adapter.find_wallet(wallet_id).await?;
        let total = self.adapter.count_history(wallet_id).await?;
        let entries = self.adapter.get_history(wallet_id, limit, offset).await?;

        Ok(TransactionHistoryPage {
            wallet_id,
            label: wallet.label,
            total,
            limit,
            offset,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryLedgerAdapter;
    use crate::asset::AssetType;
    use crate::wallet::{OwnerType, Wallet, TREASURY_OWNER_REF};

    fn adapter_with_wallet() -> (Arc<MemoryLedgerAdapter>, Wallet) {
        let adapter = Arc::new(MemoryLedgerAdapter::new());
        let wallet = Wallet::new(Uuid::now_v7().to_string(), OwnerType::User, "Alice's wallet");
        adapter.seed_wallet(wallet.clone());
        (adapter, wallet)
    }

    #[tokio::test]
    async fn limit_defaults_and_clamps() {
        let (adapter, wallet) = adapter_with_wallet();
        let service = ReadService::new(adapter as Arc<dyn LedgerAdapter>);

        let page = service.get_transactions(wallet.id, None, None).await.unwrap();
        assert_eq!(page.limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(page.offset, 0);
        assert_eq!(page.total, 0);

        let page = service
            .get_transactions(wallet.id, Some(500), None)
            .await
            .unwrap();
        assert_eq!(page.limit, MAX_HISTORY_LIMIT);

        let page = service
            .get_transactions(wallet.id, Some(0), None)
            .await
            .unwrap();
        assert_eq!(page.limit, 1);
    }

    #[tokio::test]
    async fn list_assets_excludes_inactive_and_orders_by_name() {
        let adapter = Arc::new(MemoryLedgerAdapter::new());
        let mut diamond = AssetType::new("Diamond", "DIA").unwrap();
        let gold = AssetType::new("Gold", "GLD").unwrap();
        let mut inactive = AssetType::new("Zinc", "ZNC").unwrap();
        inactive.active = false;
        diamond.active = true;
        adapter.seed_asset(diamond.clone());
        adapter.seed_asset(gold.clone());
        adapter.seed_asset(inactive);

        let service = ReadService::new(adapter as Arc<dyn LedgerAdapter>);
        let assets = service.list_assets().await.unwrap();

        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].symbol, "DIA");
        assert_eq!(assets[1].symbol, "GLD");
    }

    #[tokio::test]
    async fn list_wallets_orders_system_before_user_then_by_label() {
        let adapter = Arc::new(MemoryLedgerAdapter::new());
        adapter.seed_system_wallet(Wallet::system(TREASURY_OWNER_REF, "Treasury"));
        adapter.seed_wallet(Wallet::new(
            Uuid::now_v7().to_string(),
            OwnerType::User,
            "Zack's wallet",
        ));
        adapter.seed_wallet(Wallet::new(
            Uuid::now_v7().to_string(),
            OwnerType::User,
            "Alice's wallet",
        ));

        let service = ReadService::new(adapter as Arc<dyn LedgerAdapter>);
        let wallets = service.list_wallets().await.unwrap();

        assert_eq!(wallets[0].label, "Treasury");
        assert_eq!(wallets[1].label, "Alice's wallet");
        assert_eq!(wallets[2].label, "Zack's wallet");
    }

    #[tokio::test]
    async fn balance_reflects_zero_for_an_untouched_wallet() {
        let (adapter, wallet) = adapter_with_wallet();
        let service = ReadService::new(adapter as Arc<dyn LedgerAdapter>);
        let snapshot = service.get_balance(wallet.id).await.unwrap();
        assert!(snapshot.balances.is_empty());
    }
}
