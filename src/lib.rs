// src/lib.rs
pub mod adapters;
pub mod asset;
pub mod balance;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod ledger_entry;
pub mod read;
pub mod transaction;
pub mod transfer;
pub mod wallet;

pub use adapters::{MemoryLedgerAdapter, PgLedgerAdapter};
pub use asset::AssetType;
pub use balance::{BalanceLine, BalanceSnapshot};
pub use config::LedgerConfig;
pub use error::LedgerError;
pub use idempotency::IdempotencyRecord;
pub use ledger_entry::{Direction, EnrichedEntry, LedgerEntry};
pub use read::{ReadService, TransactionHistoryPage, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
pub use transaction::{TransactionHeader, TransactionType};
pub use transfer::{LedgerAdapter, TransferEngine, TransferInput, TransferOutcome};
pub use wallet::{Flow, OwnerType, Wallet};
