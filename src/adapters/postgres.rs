// src/adapters/postgres.rs
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::asset::AssetType;
use crate::balance::{BalanceLine, BalanceSnapshot};
use crate::config::LedgerConfig;
use crate::error::{classify_sqlx, LedgerError};
use crate::idempotency::IdempotencyRecord;
use crate::ledger_entry::{Direction, EnrichedEntry, LedgerEntry};
use crate::transaction::TransactionHeader;
use crate::transfer::LedgerAdapter;
use crate::wallet::{OwnerType, Wallet};

/// A `LedgerAdapter` backed by Postgres. Every write path goes through
/// `commit_transfer`, which acquires row locks on the participating wallets
/// in ascending id order before touching balances — the mechanism that
/// prevents two concurrent transfers sharing a wallet from deadlocking each
/// other.
#[derive(Clone)]
pub struct PgLedgerAdapter {
    pool: PgPool,
}

impl PgLedgerAdapter {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let mut connect_options: PgConnectOptions = config
            .database_url
            .parse()
            .map_err(|e: sqlx::Error| LedgerError::BadRequest(e.to_string()))?;
        connect_options = connect_options.options([(
            "statement_timeout",
            format!("{}", config.statement_timeout.as_millis()),
        )]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect_with(connect_options)
            .await
            .map_err(classify_sqlx)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the five tables and supporting indices described by the
    /// schema: `asset_types`, `wallets`, `transactions`, `ledger_entries`,
    /// `idempotency_keys`. Idempotent; safe to call on every startup.
    pub async fn init_schema(&self) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await.map_err(classify_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS asset_types (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                symbol TEXT NOT NULL UNIQUE,
                description TEXT,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                id UUID PRIMARY KEY,
                owner_ref TEXT NOT NULL,
                owner_type TEXT NOT NULL CHECK (owner_type IN ('user', 'system')),
                label TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (owner_ref, owner_type)
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id UUID PRIMARY KEY,
                transaction_type TEXT NOT NULL CHECK (transaction_type IN ('topup', 'bonus', 'spend')),
                reference TEXT NOT NULL,
                initiated_by TEXT NOT NULL,
                metadata JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_entries (
                id UUID PRIMARY KEY,
                transaction_id UUID NOT NULL REFERENCES transactions(id),
                wallet_id UUID NOT NULL REFERENCES wallets(id),
                asset_type_id UUID NOT NULL REFERENCES asset_types(id),
                direction TEXT NOT NULL CHECK (direction IN ('debit', 'credit')),
                amount NUMERIC(28, 8) NOT NULL CHECK (amount > 0),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ledger_entries_wallet_asset
            ON ledger_entries(wallet_id, asset_type_id)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ledger_entries_wallet_created
            ON ledger_entries(wallet_id, created_at DESC)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ledger_entries_transaction
            ON ledger_entries(transaction_id)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transactions_reference
            ON transactions(reference)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS idempotency_keys (
                key TEXT PRIMARY KEY,
                endpoint TEXT NOT NULL,
                request_hash TEXT NOT NULL,
                response_status SMALLINT NOT NULL,
                response_body JSONB NOT NULL,
                transaction_id UUID REFERENCES transactions(id),
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_idempotency_keys_expires_at
            ON idempotency_keys(expires_at)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        tx.commit().await.map_err(classify_sqlx)?;
        Ok(())
    }
}

fn row_to_asset(row: &sqlx::postgres::PgRow) -> Result<AssetType, LedgerError> {
    Ok(AssetType {
        id: row.try_get("id").map_err(classify_sqlx)?,
        name: row.try_get("name").map_err(classify_sqlx)?,
        symbol: row.try_get("symbol").map_err(classify_sqlx)?,
        description: row.try_get("description").map_err(classify_sqlx)?,
        active: row.try_get("active").map_err(classify_sqlx)?,
        created_at: row.try_get("created_at").map_err(classify_sqlx)?,
    })
}

fn row_to_wallet(row: &sqlx::postgres::PgRow) -> Result<Wallet, LedgerError> {
    let owner_type: String = row.try_get("owner_type").map_err(classify_sqlx)?;
    Ok(Wallet {
        id: row.try_get("id").map_err(classify_sqlx)?,
        owner_ref: row.try_get("owner_ref").map_err(classify_sqlx)?,
        owner_type: match owner_type.as_str() {
            "system" => OwnerType::System,
            _ => OwnerType::User,
        },
        label: row.try_get("label").map_err(classify_sqlx)?,
        active: row.try_get("active").map_err(classify_sqlx)?,
        created_at: row.try_get("created_at").map_err(classify_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(classify_sqlx)?,
    })
}

fn row_to_idempotency(row: &sqlx::postgres::PgRow) -> Result<IdempotencyRecord, LedgerError> {
    Ok(IdempotencyRecord {
        key: row.try_get("key").map_err(classify_sqlx)?,
        endpoint: row.try_get("endpoint").map_err(classify_sqlx)?,
        request_hash: row.try_get("request_hash").map_err(classify_sqlx)?,
        response_status: row.try_get::<i16, _>("response_status").map_err(classify_sqlx)? as u16,
        response_body: row.try_get("response_body").map_err(classify_sqlx)?,
        transaction_id: row.try_get("transaction_id").map_err(classify_sqlx)?,
        expires_at: row.try_get("expires_at").map_err(classify_sqlx)?,
        created_at: row.try_get("created_at").map_err(classify_sqlx)?,
    })
}

#[async_trait]
impl LedgerAdapter for PgLedgerAdapter {
    async fn find_asset(&self, asset_id: Uuid) -> Result<AssetType, LedgerError> {
        let row = sqlx::query(
            r#"SELECT id, name, symbol, description, active, created_at
               FROM asset_types WHERE id = $1"#,
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?
        .ok_or_else(|| LedgerError::NotFound(format!("asset '{asset_id}' not found")))?;

        row_to_asset(&row)
    }

    async fn find_wallet(&self, wallet_id: Uuid) -> Result<Wallet, LedgerError> {
        let row = sqlx::query(
            r#"SELECT id, owner_ref, owner_type, label, active, created_at, updated_at
               FROM wallets WHERE id = $1"#,
        )
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?
        .ok_or_else(|| LedgerError::NotFound(format!("wallet '{wallet_id}' not found")))?;

        row_to_wallet(&row)
    }

    async fn find_system_wallet(&self, owner_ref: &str) -> Result<Wallet, LedgerError> {
        let row = sqlx::query(
            r#"SELECT id, owner_ref, owner_type, label, active, created_at, updated_at
               FROM wallets WHERE owner_ref = $1 AND owner_type = 'system'"#,
        )
        .bind(owner_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?
        .ok_or_else(|| {
            LedgerError::NotFound(format!("system wallet '{owner_ref}' not provisioned"))
        })?;

        row_to_wallet(&row)
    }

    async fn find_idempotency_record(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, LedgerError> {
        // `expires_at > now()` filters out stale rows at the source: an
        // expired key reverts to the `absent` state and must never be
        // returned as a cache hit.
        let row = sqlx::query(
            r#"SELECT key, endpoint, request_hash, response_status, response_body,
                      transaction_id, expires_at, created_at
               FROM idempotency_keys WHERE key = $1 AND expires_at > now()"#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        row.as_ref().map(row_to_idempotency).transpose()
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
        let mut tx = self.pool.begin().await.map_err(classify_sqlx)?;

        // Lock participating wallets in ascending id order, already sorted
        // and deduplicated by the caller — this canonical ordering is what
        // rules out deadlocks between two transfers that share a wallet but
        // name it in opposite positions.
        for wallet_id in wallets {
            sqlx::query("SELECT id FROM wallets WHERE id = $1 FOR UPDATE")
                .bind(wallet_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(classify_sqlx)?
                .ok_or_else(|| LedgerError::NotFound(format!("wallet '{wallet_id}' not found")))?;
        }

        if let Some((wallet_id, asset_type_id, amount)) = check_funds {
            let current: Decimal = sqlx::query_scalar(
                r#"SELECT COALESCE(
                       SUM(CASE WHEN direction = 'credit' THEN amount ELSE -amount END), 0
                   )
                   FROM ledger_entries
                   WHERE wallet_id = $1 AND asset_type_id = $2"#,
            )
            .bind(wallet_id)
            .bind(asset_type_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(classify_sqlx)?;

            if current < amount {
                tx.rollback().await.ok();
                return Err(LedgerError::Unprocessable(format!(
                    "wallet '{wallet_id}' has insufficient funds: has {current}, needs {amount}"
                )));
            }
        }

        sqlx::query(
            r#"INSERT INTO transactions (id, transaction_type, reference, initiated_by, metadata, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(transaction.id)
        .bind(transaction.transaction_type.as_str())
        .bind(&transaction.reference)
        .bind(&transaction.initiated_by)
        .bind(&transaction.metadata)
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        for entry in [debit, credit] {
            sqlx::query(
                r#"INSERT INTO ledger_entries (id, transaction_id, wallet_id, asset_type_id, direction, amount, created_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
            )
            .bind(entry.id)
            .bind(entry.transaction_id)
            .bind(entry.wallet_id)
            .bind(entry.asset_type_id)
            .bind(entry.direction.as_str())
            .bind(entry.amount)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await
            .map_err(classify_sqlx)?;
        }

        // Insert the idempotency record last and rely on its PRIMARY KEY to
        // reject a concurrent duplicate submission: if two callers race with
        // the same key, exactly one commits and the other sees no row
        // returned here, which becomes `LedgerError::Conflict` below. An
        // existing row only yields to the new write if it has expired — the
        // `WHERE` clause on the `DO UPDATE` makes the upsert a no-op against
        // a live (unexpired) key, same as a plain `DO NOTHING` would, while
        // still letting a key past its 24h TTL be reused.
        let inserted = sqlx::query(
            r#"INSERT INTO idempotency_keys
                   (key, endpoint, request_hash, response_status, response_body, transaction_id, expires_at, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (key) DO UPDATE SET
                   endpoint = EXCLUDED.endpoint,
                   request_hash = EXCLUDED.request_hash,
                   response_status = EXCLUDED.response_status,
                   response_body = EXCLUDED.response_body,
                   transaction_id = EXCLUDED.transaction_id,
                   expires_at = EXCLUDED.expires_at,
                   created_at = EXCLUDED.created_at
               WHERE idempotency_keys.expires_at <= now()
               RETURNING key"#,
        )
        .bind(&idempotency.key)
        .bind(&idempotency.endpoint)
        .bind(&idempotency.request_hash)
        .bind(idempotency.response_status as i16)
        .bind(&idempotency.response_body)
        .bind(idempotency.transaction_id)
        .bind(idempotency.expires_at)
        .bind(idempotency.created_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify_sqlx)?;

        if inserted.is_none() {
            tx.rollback().await.ok();
            return Err(LedgerError::Conflict(format!(
                "idempotency key '{}' already in use",
                idempotency.key
            )));
        }

        tx.commit().await.map_err(classify_sqlx)?;
        Ok(())
    }

    async fn get_balance(&self, wallet_id: Uuid) -> Result<BalanceSnapshot, LedgerError> {
        let wallet = self.find_wallet(wallet_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT a.id AS asset_type_id, a.name, a.symbol,
                   COALESCE(SUM(CASE WHEN e.direction = 'credit' THEN e.amount ELSE -e.amount END), 0) AS balance
            FROM ledger_entries e
            JOIN asset_types a ON a.id = e.asset_type_id
            WHERE e.wallet_id = $1
            GROUP BY a.id, a.name, a.symbol
            ORDER BY a.symbol
            "#,
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        let mut balances = Vec::with_capacity(rows.len());
        for row in rows {
            balances.push(BalanceLine {
                asset_type_id: row.try_get("asset_type_id").map_err(classify_sqlx)?,
                name: row.try_get("name").map_err(classify_sqlx)?,
                symbol: row.try_get("symbol").map_err(classify_sqlx)?,
                balance: row.try_get("balance").map_err(classify_sqlx)?,
            });
        }

        Ok(BalanceSnapshot {
            wallet_id,
            label: wallet.label,
            balances,
        })
    }

    async fn get_history(
        &self,
        wallet_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<EnrichedEntry>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT e.id AS entry_id, e.transaction_id, e.asset_type_id, a.symbol AS asset_symbol,
                   e.direction, e.amount, t.transaction_type, t.reference, e.created_at
            FROM ledger_entries e
            JOIN asset_types a ON a.id = e.asset_type_id
            JOIN transactions t ON t.id = e.transaction_id
            WHERE e.wallet_id = $1
            ORDER BY e.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(wallet_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let direction: String = row.try_get("direction").map_err(classify_sqlx)?;
            let transaction_type: String =
                row.try_get("transaction_type").map_err(classify_sqlx)?;
            entries.push(EnrichedEntry {
                entry_id: row.try_get("entry_id").map_err(classify_sqlx)?,
                transaction_id: row.try_get("transaction_id").map_err(classify_sqlx)?,
                asset_type_id: row.try_get("asset_type_id").map_err(classify_sqlx)?,
                asset_symbol: row.try_get("asset_symbol").map_err(classify_sqlx)?,
                direction: match direction.as_str() {
                    "credit" => Direction::Credit,
                    _ => Direction::Debit,
                },
                amount: row.try_get("amount").map_err(classify_sqlx)?,
                transaction_type: transaction_type.parse()?,
                reference: row.try_get("reference").map_err(classify_sqlx)?,
                created_at: row.try_get("created_at").map_err(classify_sqlx)?,
            });
        }

        Ok(entries)
    }

    async fn count_history(&self, wallet_id: Uuid) -> Result<i64, LedgerError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries WHERE wallet_id = $1")
            .bind(wallet_id)
            .fetch_one(&self.pool)
            .await
            .map_err(classify_sqlx)
    }

    async fn list_assets(&self) -> Result<Vec<AssetType>, LedgerError> {
        let rows = sqlx::query(
            r#"SELECT id, name, symbol, description, active, created_at
               FROM asset_types WHERE active = TRUE ORDER BY name"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        rows.iter().map(row_to_asset).collect()
    }

    async fn list_wallets(&self) -> Result<Vec<Wallet>, LedgerError> {
        let rows = sqlx::query(
            r#"SELECT id, owner_ref, owner_type, label, active, created_at, updated_at
               FROM wallets
               ORDER BY (owner_type <> 'system'), label"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        rows.iter().map(row_to_wallet).collect()
    }

    async fn create_asset(&self, asset: AssetType) -> Result<(), LedgerError> {
        sqlx::query(
            r#"INSERT INTO asset_types (id, name, symbol, description, active, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(asset.id)
        .bind(&asset.name)
        .bind(&asset.symbol)
        .bind(&asset.description)
        .bind(asset.active)
        .bind(asset.created_at)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    async fn deactivate_asset(&self, asset_id: Uuid) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE asset_types SET active = FALSE WHERE id = $1")
            .bind(asset_id)
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!(
                "asset '{asset_id}' not found"
            )));
        }
        Ok(())
    }

    async fn create_wallet(&self, wallet: Wallet) -> Result<(), LedgerError> {
        let owner_type = match wallet.owner_type {
            OwnerType::System => "system",
            OwnerType::User => "user",
        };
        sqlx::query(
            r#"INSERT INTO wallets (id, owner_ref, owner_type, label, active, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(wallet.id)
        .bind(&wallet.owner_ref)
        .bind(owner_type)
        .bind(&wallet.label)
        .bind(wallet.active)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;
        Ok(())
    }

    async fn purge_expired_idempotency(&self) -> Result<u64, LedgerError> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx)?;
        Ok(result.rows_affected())
    }
}
