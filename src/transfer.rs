// src/transfer.rs
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::asset::AssetType;
use crate::balance::BalanceSnapshot;
use crate::error::LedgerError;
use crate::idempotency::{hash_request, validate_key, CanonicalRequest, IdempotencyRecord};
use crate::ledger_entry::{Direction, EnrichedEntry, LedgerEntry};
use crate::transaction::TransactionHeader;
use crate::wallet::{Flow, Wallet};

/// Maximum attempts for a single transfer before a transient conflict is
/// surfaced to the caller, per the retry policy: the first attempt plus two
/// retries.
const MAX_ATTEMPTS: u32 = 3;
/// Linear backoff base: the Nth retry sleeps roughly `N * BACKOFF_BASE`.
const BACKOFF_BASE_MS: u64 = 100;

/// A caller's request to move funds along one of the three fixed flows.
/// Keyed by `asset_type_id` (not a symbol) so the canonical request hash can
/// be computed without a storage round trip: resolving a symbol to an id
/// would force an asset lookup ahead of the idempotency read, inverting the
/// spec's step order (idempotency read, a pure read, must precede asset
/// validation).
#[derive(Debug, Clone)]
pub struct TransferInput {
    pub flow: Flow,
    pub caller_wallet_id: Uuid,
    pub asset_type_id: Uuid,
    pub amount: Decimal,
    pub reference: String,
    pub initiated_by: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub idempotency_key: String,
}

/// Everything the caller needs to render a completed write: the transaction
/// header, its two entries, and the caller wallet's resulting balance.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub transaction: TransactionHeader,
    pub debit_entry: LedgerEntry,
    pub credit_entry: LedgerEntry,
    pub caller_balance: BalanceSnapshot,
    /// `true` when this outcome was served from a prior idempotent write
    /// rather than freshly computed.
    pub replayed: bool,
}

/// The locks a transfer needs, expressed as wallet ids. Adapters acquire
/// these in ascending id order, deduplicated, before touching balances —
/// the mechanism that rules out deadlocks between concurrent transfers that
/// share a wallet.
pub fn lock_order(a: Uuid, b: Uuid) -> Vec<Uuid> {
    let mut ids = vec![a, b];
    ids.sort();
    ids.dedup();
    ids
}

/// The single storage seam between the engine and a backing store. Every
/// method that participates in committing a transfer is expected to run
/// inside one atomic scope; `commit_transfer` is the only method that
/// actually performs a write, and its contract is what carries the
/// conservation, pairing and idempotency invariants end to end.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    async fn find_asset(&self, asset_id: Uuid) -> Result<AssetType, LedgerError>;

    async fn find_wallet(&self, wallet_id: Uuid) -> Result<Wallet, LedgerError>;

    async fn find_system_wallet(&self, owner_ref: &str) -> Result<Wallet, LedgerError>;

    /// Optimistic pre-check performed before entering the transactional
    /// scope: a hit here lets the engine skip straight to replaying the
    /// cached response without ever acquiring a lock.
    async fn find_idempotency_record(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, LedgerError>;

    /// Locks `wallets` (already in ascending order, already deduplicated),
    /// checks the funds constraint when `check_funds` names a wallet that
    /// must stay non-negative, writes the transaction header, both ledger
    /// entries, and the idempotency record, and commits — all as one
    /// atomic unit. Returns `TransientConflict` when the underlying store
    /// detects a serialization failure or deadlock so the engine's retry
    /// loop can re-attempt with a fresh read of current state.
    #[allow(clippy::too_many_arguments)]
    async fn commit_transfer(
        &self,
        wallets: &[Uuid],
        check_funds: Option<(Uuid, Uuid, Decimal)>,
        transaction: &TransactionHeader,
        debit: &LedgerEntry,
        credit: &LedgerEntry,
        idempotency: &IdempotencyRecord,
    ) -> Result<(), LedgerError>;

    async fn get_balance(&self, wallet_id: Uuid) -> Result<BalanceSnapshot, LedgerError>;

    /// Newest-first page of `wallet_id`'s ledger entries, joined with asset
    /// symbol and transaction metadata. `offset` is caller-facing pagination,
    /// not a cursor — the read side never needs the locking discipline the
    /// write side does.
    async fn get_history(
        &self,
        wallet_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<EnrichedEntry>, LedgerError>;

    /// Total entry count for `wallet_id`, for the `getTransactions` envelope's
    /// `total` field. Monotonic: entries are never deleted.
    async fn count_history(&self, wallet_id: Uuid) -> Result<i64, LedgerError>;

    /// Active asset types ordered by `name`, backing `listAssets`.
    async fn list_assets(&self) -> Result<Vec<AssetType>, LedgerError>;

    /// All wallets ordered system-before-user, then by `label`, backing
    /// `listWallets`.
    async fn list_wallets(&self) -> Result<Vec<Wallet>, LedgerError>;

    /// Registers a new asset type. Not called by the transfer engine itself —
    /// asset seeding is a collaborator concern per §1 — but is the minimal
    /// write surface the asset registry needs to exist at all.
    async fn create_asset(&self, asset: AssetType) -> Result<(), LedgerError>;

    /// Flips an asset type's `active` flag to `false`.
    async fn deactivate_asset(&self, asset_id: Uuid) -> Result<(), LedgerError>;

    /// Registers a new wallet, mirroring `create_asset`'s role for the
    /// wallet registry.
    async fn create_wallet(&self, wallet: Wallet) -> Result<(), LedgerError>;

    /// Best-effort deletion of expired idempotency rows. Never called from
    /// the transfer engine's write path — expired rows are simply ignored by
    /// `find_idempotency_record` — this exists for an external scheduler
    /// collaborator that wants to reclaim space. Returns the number of rows
    /// removed.
    async fn purge_expired_idempotency(&self) -> Result<u64, LedgerError>;
}

/// Orchestrates a transfer request against a `LedgerAdapter`: validation,
/// idempotency lookup, wallet/asset resolution, and the atomic commit with
/// bounded retry on transient conflicts. Holds no state of its own beyond
/// the adapter handle, so it can be cloned cheaply and shared across
/// concurrent callers.
#[derive(Clone)]
pub struct TransferEngine {
    adapter: Arc<dyn LedgerAdapter>,
}

impl TransferEngine {
    pub fn new(adapter: Arc<dyn LedgerAdapter>) -> Self {
        Self { adapter }
    }

    pub async fn transfer(&self, input: TransferInput) -> Result<TransferOutcome, LedgerError> {
        validate_key(&input.idempotency_key)?;
        crate::ledger_entry::validate_amount(input.amount)?;
        if input.reference.trim().is_empty() {
            return Err(LedgerError::BadRequest(
                "reference must not be empty".to_string(),
            ));
        }

        // The canonical hash needs only the raw `asset_type_id` the caller
        // supplied, so it can be computed, and the idempotency record looked
        // up, before any asset validation: a retry of an already-committed
        // transfer must replay even if the asset has since been deactivated.
        let request_hash = hash_request(&CanonicalRequest {
            asset_type_id: input.asset_type_id,
            amount: input.amount,
            reference: &input.reference,
        });

        if let Some(existing) = self.adapter.find_idempotency_record(&input.idempotency_key).await? {
            // An expired row is ignored, not treated as a hit: the key state
            // machine reverts to `absent` once `expires_at` has passed (§9).
            if !existing.is_expired(chrono::Utc::now()) {
                return self.replay(existing, &request_hash).await;
            }
        }

        let asset = self.adapter.find_asset(input.asset_type_id).await?;
        asset.require_active()?;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(&input, &asset, &request_hash).await {
                Ok(outcome) => return Ok(outcome),
                Err(LedgerError::Conflict(_)) => {
                    // The adapter's uniqueness check on the idempotency row
                    // lost a race to a concurrent identical (or conflicting)
                    // request that committed first. Reconcile by re-reading
                    // the winner's record rather than surfacing the raw
                    // conflict: same hash means this was a genuine retry and
                    // must replay; only a different hash is a real conflict.
                    return self.reconcile_conflict(&input.idempotency_key, &request_hash).await;
                }
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        attempt,
                        reference = %input.reference,
                        "transient conflict committing transfer, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(
                        BACKOFF_BASE_MS * attempt as u64,
                    ))
                    .await;
                }
                Err(err) => return Err(err),
            }
        }

        unreachable!("loop always returns on its final iteration")
    }

    /// Resolves a `commit_transfer` uniqueness conflict on the idempotency
    /// key: some other writer committed first, so the current attempt's
    /// paired entries were never persisted. Per §4.6's race-resolution
    /// paragraph, whether that is a benign duplicate or a genuine conflict
    /// depends entirely on whether the winner's request hash matches ours.
    async fn reconcile_conflict(
        &self,
        key: &str,
        request_hash: &str,
    ) -> Result<TransferOutcome, LedgerError> {
        let existing = self.adapter.find_idempotency_record(key).await?.ok_or_else(|| {
            LedgerError::Conflict(format!("idempotency key '{key}' already in use"))
        })?;
        self.replay(existing, request_hash).await
    }

    async fn attempt(
        &self,
        input: &TransferInput,
        asset: &AssetType,
        request_hash: &str,
    ) -> Result<TransferOutcome, LedgerError> {
        let caller_wallet = self.adapter.find_wallet(input.caller_wallet_id).await?;
        caller_wallet.require_active()?;

        let system_wallet = self
            .adapter
            .find_system_wallet(input.flow.system_owner_ref())
            .await?;

        let (from, to) = input.flow.route(caller_wallet.id, system_wallet.id);

        let transaction = TransactionHeader::new(
            input.flow.as_transaction_type(),
            input.reference.clone(),
            input.initiated_by.clone(),
            input.metadata.clone(),
        )?;

        let debit = LedgerEntry::new(transaction.id, from, asset.id, Direction::Debit, input.amount)?;
        let credit = LedgerEntry::new(transaction.id, to, asset.id, Direction::Credit, input.amount)?;

        // The cached response is the replay source of truth: it carries the
        // full transaction and both entries so a retry never needs to touch
        // the ledger tables, only the idempotency record and a fresh balance
        // read.
        let response_body = serde_json::json!({
            "callerWalletId": caller_wallet.id,
            "transaction": &transaction,
            "debitEntry": &debit,
            "creditEntry": &credit,
        });
        let idempotency = IdempotencyRecord::new(
            input.idempotency_key.clone(),
            input.flow.as_transaction_type().as_str(),
            request_hash.to_string(),
            201,
            response_body,
            Some(transaction.id),
        );

        let check_funds = input
            .flow
            .requires_funds_check()
            .then_some((from, asset.id, input.amount));

        self.adapter
            .commit_transfer(
                &lock_order(from, to),
                check_funds,
                &transaction,
                &debit,
                &credit,
                &idempotency,
            )
            .await?;

        let caller_balance = self.adapter.get_balance(caller_wallet.id).await?;

        Ok(TransferOutcome {
            transaction,
            debit_entry: debit,
            credit_entry: credit,
            caller_balance,
            replayed: false,
        })
    }

    /// Serves a cached response for a key that was already resolved.
    /// Matching request hash means a genuine retry; mismatched hash means
    /// the caller reused a key for a different logical request, which is a
    /// conflict, never a silent overwrite.
    async fn replay(
        &self,
        existing: IdempotencyRecord,
        request_hash: &str,
    ) -> Result<TransferOutcome, LedgerError> {
        if existing.request_hash != request_hash {
            return Err(LedgerError::Conflict(
                "idempotency key reused with a different request".to_string(),
            ));
        }

        let caller_wallet_id: Uuid = existing
            .response_body
            .get("callerWalletId")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .ok_or_else(|| {
                LedgerError::Internal("idempotency record missing callerWalletId".to_string())
            })?;
        let transaction: TransactionHeader = existing
            .response_body
            .get("transaction")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .ok_or_else(|| {
                LedgerError::Internal("idempotency record missing transaction".to_string())
            })?;
        let debit_entry: LedgerEntry = existing
            .response_body
            .get("debitEntry")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .ok_or_else(|| {
                LedgerError::Internal("idempotency record missing debit entry".to_string())
            })?;
        let credit_entry: LedgerEntry = existing
            .response_body
            .get("creditEntry")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .ok_or_else(|| {
                LedgerError::Internal("idempotency record missing credit entry".to_string())
            })?;

        let caller_balance = self.adapter.get_balance(caller_wallet_id).await?;

        Ok(TransferOutcome {
            transaction,
            debit_entry,
            credit_entry,
            caller_balance,
            replayed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_order_dedupes_and_sorts() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let ordered_ab = lock_order(a, b);
        let ordered_ba = lock_order(b, a);
        assert_eq!(ordered_ab, ordered_ba);
        assert_eq!(ordered_ab.len(), 2);
    }

    #[test]
    fn lock_order_collapses_self_transfer() {
        let a = Uuid::now_v7();
        assert_eq!(lock_order(a, a), vec![a]);
    }
}
