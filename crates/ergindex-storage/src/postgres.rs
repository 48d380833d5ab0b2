//! PostgreSQL storage backend.
//!
//! Uses `sqlx` with connection pooling. The schema is created on first
//! connect; every multi-row mutation runs inside an explicit transaction.
//! Non-negativity of values, amounts, and balances is enforced by CHECK
//! constraints, so a batch that would drive a balance negative fails the
//! whole transaction — nothing partial is ever visible.
//!
//! Integration tests require a running PostgreSQL instance; set
//! `DATABASE_URL` to enable them.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};

use ergindex_core::error::StoreError;
use ergindex_core::types::{ChainTip, SyncStatus};

use crate::batch::{BlockBatch, CommitOutcome, RewindReport, SpendableOutput};
use crate::Store;

// ─── Schema ───────────────────────────────────────────────────────────────────

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS blocks (
        id            TEXT     PRIMARY KEY,
        header_id     TEXT     NOT NULL,
        parent_id     TEXT     NOT NULL,
        height        BIGINT   NOT NULL,
        timestamp     BIGINT   NOT NULL,
        difficulty    BIGINT   NOT NULL,
        block_size    BIGINT   NOT NULL,
        block_coins   BIGINT   NOT NULL,
        tx_count      INTEGER  NOT NULL,
        txs_size      BIGINT   NOT NULL,
        miner_address TEXT,
        main_chain    BOOLEAN  NOT NULL,
        version       SMALLINT NOT NULL,
        pow_solutions JSONB
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_blocks_height_main
     ON blocks(height) WHERE main_chain",
    "CREATE INDEX IF NOT EXISTS idx_blocks_timestamp ON blocks(timestamp)",
    "CREATE TABLE IF NOT EXISTS transactions (
        id               TEXT    PRIMARY KEY,
        block_id         TEXT    NOT NULL REFERENCES blocks(id),
        header_id        TEXT    NOT NULL,
        inclusion_height BIGINT  NOT NULL,
        timestamp        BIGINT  NOT NULL,
        index_in_block   INTEGER NOT NULL,
        main_chain       BOOLEAN NOT NULL,
        size             BIGINT  NOT NULL,
        fee              BIGINT  NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_transactions_block ON transactions(block_id)",
    "CREATE TABLE IF NOT EXISTS outputs (
        box_id               TEXT    PRIMARY KEY,
        tx_id                TEXT    NOT NULL REFERENCES transactions(id),
        index_in_tx          INTEGER NOT NULL,
        value                BIGINT  NOT NULL CHECK (value >= 0),
        creation_height      BIGINT  NOT NULL,
        address              TEXT,
        ergo_tree            TEXT    NOT NULL,
        additional_registers JSONB,
        spent_by_tx_id       TEXT    REFERENCES transactions(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_outputs_address ON outputs(address)",
    "CREATE INDEX IF NOT EXISTS idx_outputs_spent_by ON outputs(spent_by_tx_id)",
    "CREATE INDEX IF NOT EXISTS idx_outputs_tx ON outputs(tx_id)",
    "CREATE TABLE IF NOT EXISTS inputs (
        box_id      TEXT    NOT NULL,
        tx_id       TEXT    NOT NULL REFERENCES transactions(id),
        index_in_tx INTEGER NOT NULL,
        proof_bytes TEXT,
        extension   JSONB,
        PRIMARY KEY (box_id, tx_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_inputs_tx ON inputs(tx_id)",
    "CREATE TABLE IF NOT EXISTS assets (
        box_id           TEXT    NOT NULL REFERENCES outputs(box_id),
        index_in_outputs INTEGER NOT NULL,
        token_id         TEXT    NOT NULL,
        amount           BIGINT  NOT NULL CHECK (amount >= 0),
        PRIMARY KEY (box_id, index_in_outputs)
    )",
    "CREATE INDEX IF NOT EXISTS idx_assets_token ON assets(token_id)",
    "CREATE TABLE IF NOT EXISTS tokens (
        token_id          TEXT   PRIMARY KEY,
        name              TEXT,
        description       TEXT,
        decimals          INTEGER,
        total_supply      BIGINT,
        first_seen_height BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS token_balances (
        token_id     TEXT   NOT NULL,
        address      TEXT   NOT NULL,
        balance      BIGINT NOT NULL CHECK (balance >= 0),
        last_updated BIGINT NOT NULL,
        PRIMARY KEY (token_id, address)
    )",
    "CREATE INDEX IF NOT EXISTS idx_token_balances_top
     ON token_balances(token_id, balance DESC)",
    "CREATE TABLE IF NOT EXISTS balance_changes (
        block_id TEXT   NOT NULL,
        token_id TEXT   NOT NULL,
        address  TEXT   NOT NULL,
        delta    BIGINT NOT NULL,
        PRIMARY KEY (block_id, token_id, address)
    )",
    "CREATE INDEX IF NOT EXISTS idx_balance_changes_block ON balance_changes(block_id)",
    "CREATE TABLE IF NOT EXISTS mining_rewards (
        block_id      TEXT   PRIMARY KEY REFERENCES blocks(id),
        reward_amount BIGINT NOT NULL,
        fees_amount   BIGINT NOT NULL,
        miner_address TEXT
    )",
    "CREATE TABLE IF NOT EXISTS address_stats (
        address           TEXT PRIMARY KEY,
        first_active_time BIGINT,
        last_active_time  BIGINT,
        address_type      TEXT,
        script_complexity INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS sync_status (
        id               INTEGER PRIMARY KEY CHECK (id = 1),
        current_height   BIGINT  NOT NULL,
        target_height    BIGINT  NOT NULL,
        is_syncing       BOOLEAN NOT NULL,
        last_block_time  BIGINT,
        updated_at       BIGINT  NOT NULL
    )",
    "INSERT INTO sync_status (id, current_height, target_height, is_syncing, updated_at)
     VALUES (1, 0, 0, FALSE, 0) ON CONFLICT (id) DO NOTHING",
    "CREATE TABLE IF NOT EXISTS poison_blocks (
        height     BIGINT NOT NULL,
        block_id   TEXT   NOT NULL,
        reason     TEXT   NOT NULL,
        created_at BIGINT NOT NULL,
        PRIMARY KEY (height, block_id)
    )",
];

// ─── PgStore ──────────────────────────────────────────────────────────────────

/// PostgreSQL-backed [`Store`]. Thread-safe and cheaply cloneable — wraps a
/// connection pool internally.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .min_connections(2)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(format!("postgres connect: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("PgStore connected and schema initialized");
        Ok(store)
    }

    /// Create tables and indexes if they don't already exist.
    async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        debug!("PgStore schema initialized");
        Ok(())
    }

    /// The underlying pool, for the read side and custom queries.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn apply_batch(
        tx: &mut Transaction<'_, Postgres>,
        batch: &BlockBatch,
        now: i64,
    ) -> Result<(), StoreError> {
        for record in &batch.transactions {
            sqlx::query(
                "INSERT INTO transactions
                    (id, block_id, header_id, inclusion_height, timestamp,
                     index_in_block, main_chain, size, fee)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(&record.id)
            .bind(&record.block_id)
            .bind(&record.header_id)
            .bind(record.inclusion_height as i64)
            .bind(record.timestamp)
            .bind(record.index_in_block as i32)
            .bind(record.main_chain)
            .bind(record.size)
            .bind(record.fee)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        }

        for output in &batch.outputs {
            sqlx::query(
                "INSERT INTO outputs
                    (box_id, tx_id, index_in_tx, value, creation_height,
                     address, ergo_tree, additional_registers)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(&output.box_id)
            .bind(&output.tx_id)
            .bind(output.index_in_tx as i32)
            .bind(output.value)
            .bind(output.creation_height as i64)
            .bind(&output.address)
            .bind(&output.ergo_tree)
            .bind(&output.additional_registers)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        }

        for input in &batch.inputs {
            sqlx::query(
                "INSERT INTO inputs (box_id, tx_id, index_in_tx, proof_bytes, extension)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (box_id, tx_id) DO NOTHING",
            )
            .bind(&input.box_id)
            .bind(&input.tx_id)
            .bind(input.index_in_tx as i32)
            .bind(&input.proof_bytes)
            .bind(&input.extension)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        }

        for asset in &batch.assets {
            sqlx::query(
                "INSERT INTO assets (box_id, index_in_outputs, token_id, amount)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(&asset.box_id)
            .bind(asset.index_in_outputs as i32)
            .bind(&asset.token_id)
            .bind(asset.amount)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        }

        // Spend links last: every output of the block exists by now, so
        // intra-block forward references resolve.
        for spend in &batch.spends {
            sqlx::query("UPDATE outputs SET spent_by_tx_id = $2 WHERE box_id = $1")
                .bind(&spend.box_id)
                .bind(&spend.tx_id)
                .execute(&mut **tx)
                .await
                .map_err(store_err)?;
        }

        for token in &batch.new_tokens {
            sqlx::query(
                "INSERT INTO tokens
                    (token_id, name, description, decimals, total_supply, first_seen_height)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (token_id) DO NOTHING",
            )
            .bind(&token.token_id)
            .bind(&token.name)
            .bind(&token.description)
            .bind(token.decimals)
            .bind(token.total_supply)
            .bind(token.first_seen_height as i64)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        }

        for delta in &batch.balance_deltas {
            sqlx::query(
                "INSERT INTO token_balances (token_id, address, balance, last_updated)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (token_id, address) DO UPDATE SET
                    balance      = token_balances.balance + EXCLUDED.balance,
                    last_updated = EXCLUDED.last_updated",
            )
            .bind(&delta.token_id)
            .bind(&delta.address)
            .bind(delta.delta)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;

            sqlx::query(
                "INSERT INTO balance_changes (block_id, token_id, address, delta)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(&batch.block.id)
            .bind(&delta.token_id)
            .bind(&delta.address)
            .bind(delta.delta)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        }

        if let Some(reward) = &batch.mining_reward {
            sqlx::query(
                "INSERT INTO mining_rewards (block_id, reward_amount, fees_amount, miner_address)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (block_id) DO NOTHING",
            )
            .bind(&reward.block_id)
            .bind(reward.reward_amount)
            .bind(reward.fees_amount)
            .bind(&reward.miner_address)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        }

        for activity in &batch.address_stats {
            sqlx::query(
                "INSERT INTO address_stats
                    (address, first_active_time, last_active_time, address_type, script_complexity)
                 VALUES ($1, $2, $2, $3, $4)
                 ON CONFLICT (address) DO UPDATE SET
                    first_active_time = LEAST(address_stats.first_active_time, EXCLUDED.first_active_time),
                    last_active_time  = GREATEST(address_stats.last_active_time, EXCLUDED.last_active_time)",
            )
            .bind(&activity.address)
            .bind(activity.timestamp)
            .bind(&activity.address_type)
            .bind(activity.script_complexity)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        }

        sqlx::query(
            "UPDATE sync_status SET
                current_height  = $1,
                last_block_time = $2,
                is_syncing      = TRUE,
                updated_at      = $3
             WHERE id = 1",
        )
        .bind(batch.block.height as i64)
        .bind(batch.block.timestamp)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;

        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn tip(&self) -> Result<Option<ChainTip>, StoreError> {
        let row = sqlx::query(
            "SELECT id, height FROM blocks WHERE main_chain ORDER BY height DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(|r| ChainTip {
            height: r.get::<i64, _>("height") as u64,
            block_id: r.get("id"),
        }))
    }

    async fn block_id_at(&self, height: u64) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT id FROM blocks WHERE height = $1 AND main_chain")
            .bind(height as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(|r| r.get("id")))
    }

    async fn sync_status(&self) -> Result<SyncStatus, StoreError> {
        let row = sqlx::query(
            "SELECT current_height, target_height, is_syncing, last_block_time, updated_at
             FROM sync_status WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(SyncStatus {
            current_height: row.get::<i64, _>("current_height") as u64,
            target_height: row.get::<i64, _>("target_height") as u64,
            is_syncing: row.get("is_syncing"),
            last_block_time: row.get("last_block_time"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn set_target(
        &self,
        target_height: u64,
        is_syncing: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sync_status SET target_height = $1, is_syncing = $2, updated_at = $3
             WHERE id = 1",
        )
        .bind(target_height as i64)
        .bind(is_syncing)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn outputs_for_spend(
        &self,
        box_ids: &[String],
    ) -> Result<Vec<SpendableOutput>, StoreError> {
        if box_ids.is_empty() {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            "SELECT box_id, value, address FROM outputs WHERE box_id = ANY($1)",
        )
        .bind(box_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut outputs: Vec<SpendableOutput> = rows
            .iter()
            .map(|r| SpendableOutput {
                box_id: r.get("box_id"),
                value: r.get("value"),
                address: r.get("address"),
                assets: vec![],
            })
            .collect();

        let asset_rows = sqlx::query(
            "SELECT box_id, token_id, amount FROM assets
             WHERE box_id = ANY($1)
             ORDER BY box_id, index_in_outputs",
        )
        .bind(box_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        for row in asset_rows {
            let box_id: String = row.get("box_id");
            if let Some(output) = outputs.iter_mut().find(|o| o.box_id == box_id) {
                output.assets.push((row.get("token_id"), row.get("amount")));
            }
        }

        Ok(outputs)
    }

    async fn commit_block(&self, batch: BlockBatch) -> Result<CommitOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let now = Utc::now().timestamp();

        let existing: Option<bool> =
            sqlx::query_scalar("SELECT main_chain FROM blocks WHERE id = $1")
                .bind(&batch.block.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(store_err)?;

        match existing {
            Some(true) => {
                // Already on the main chain — replaying a committed block
                // is a no-op.
                tx.rollback().await.map_err(store_err)?;
                return Ok(CommitOutcome::AlreadyApplied);
            }
            Some(false) => {
                // An orphan returning to the main chain; its children were
                // removed on rewind, so refresh the row and re-insert below.
                sqlx::query(
                    "UPDATE blocks SET
                        header_id = $2, parent_id = $3, height = $4, timestamp = $5,
                        difficulty = $6, block_size = $7, block_coins = $8,
                        tx_count = $9, txs_size = $10, miner_address = $11,
                        main_chain = TRUE, version = $12, pow_solutions = $13
                     WHERE id = $1",
                )
                .bind(&batch.block.id)
                .bind(&batch.block.header_id)
                .bind(&batch.block.parent_id)
                .bind(batch.block.height as i64)
                .bind(batch.block.timestamp)
                .bind(batch.block.difficulty)
                .bind(batch.block.block_size)
                .bind(batch.block.block_coins)
                .bind(batch.block.tx_count as i32)
                .bind(batch.block.txs_size)
                .bind(&batch.block.miner_address)
                .bind(batch.block.version)
                .bind(&batch.block.pow_solutions)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO blocks
                        (id, header_id, parent_id, height, timestamp, difficulty,
                         block_size, block_coins, tx_count, txs_size, miner_address,
                         main_chain, version, pow_solutions)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE, $12, $13)",
                )
                .bind(&batch.block.id)
                .bind(&batch.block.header_id)
                .bind(&batch.block.parent_id)
                .bind(batch.block.height as i64)
                .bind(batch.block.timestamp)
                .bind(batch.block.difficulty)
                .bind(batch.block.block_size)
                .bind(batch.block.block_coins)
                .bind(batch.block.tx_count as i32)
                .bind(batch.block.txs_size)
                .bind(&batch.block.miner_address)
                .bind(batch.block.version)
                .bind(&batch.block.pow_solutions)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
        }

        Self::apply_batch(&mut tx, &batch, now).await?;

        tx.commit().await.map_err(store_err)?;
        debug!(
            height = batch.block.height,
            id = %batch.block.id,
            txs = batch.transactions.len(),
            "block committed"
        );
        Ok(CommitOutcome::Applied)
    }

    async fn rewind_to_height(&self, height: u64) -> Result<RewindReport, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let now = Utc::now().timestamp();
        let mut report = RewindReport::default();

        let rewound_ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM blocks WHERE height > $1 AND main_chain ORDER BY height DESC",
        )
        .bind(height as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(store_err)?;

        if rewound_ids.is_empty() {
            tx.rollback().await.map_err(store_err)?;
            return Ok(report);
        }

        // Reverse the journaled balance deltas in one pass.
        let reversed = sqlx::query(
            "UPDATE token_balances tb SET
                balance      = tb.balance - bc.delta,
                last_updated = $2
             FROM (SELECT token_id, address, SUM(delta) AS delta
                   FROM balance_changes WHERE block_id = ANY($1)
                   GROUP BY token_id, address) bc
             WHERE tb.token_id = bc.token_id AND tb.address = bc.address",
        )
        .bind(&rewound_ids)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;
        report.deltas_reversed = reversed.rows_affected();

        sqlx::query("DELETE FROM balance_changes WHERE block_id = ANY($1)")
            .bind(&rewound_ids)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        // Re-credit surviving outputs spent by rewound transactions.
        let unspent = sqlx::query(
            "UPDATE outputs SET spent_by_tx_id = NULL
             WHERE spent_by_tx_id IN (SELECT id FROM transactions WHERE block_id = ANY($1))
               AND tx_id NOT IN (SELECT id FROM transactions WHERE block_id = ANY($1))",
        )
        .bind(&rewound_ids)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;
        report.outputs_unspent = unspent.rows_affected();

        // Remaining spent links inside the rewound range go away with their
        // outputs; clear them first so the transaction rows can be deleted.
        sqlx::query(
            "UPDATE outputs SET spent_by_tx_id = NULL
             WHERE spent_by_tx_id IN (SELECT id FROM transactions WHERE block_id = ANY($1))",
        )
        .bind(&rewound_ids)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "DELETE FROM assets WHERE box_id IN (
                SELECT box_id FROM outputs WHERE tx_id IN (
                    SELECT id FROM transactions WHERE block_id = ANY($1)))",
        )
        .bind(&rewound_ids)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "DELETE FROM outputs WHERE tx_id IN (
                SELECT id FROM transactions WHERE block_id = ANY($1))",
        )
        .bind(&rewound_ids)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "DELETE FROM inputs WHERE tx_id IN (
                SELECT id FROM transactions WHERE block_id = ANY($1))",
        )
        .bind(&rewound_ids)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query("DELETE FROM mining_rewards WHERE block_id = ANY($1)")
            .bind(&rewound_ids)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        sqlx::query("DELETE FROM transactions WHERE block_id = ANY($1)")
            .bind(&rewound_ids)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        // Orphan headers are retained for audit, off the main chain.
        let orphaned = sqlx::query("UPDATE blocks SET main_chain = FALSE WHERE id = ANY($1)")
            .bind(&rewound_ids)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        report.blocks_orphaned = orphaned.rows_affected();

        sqlx::query("DELETE FROM tokens WHERE first_seen_height > $1")
            .bind(height as i64)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        sqlx::query("UPDATE sync_status SET current_height = $1, updated_at = $2 WHERE id = 1")
            .bind(height as i64)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        info!(
            to_height = height,
            blocks = report.blocks_orphaned,
            outputs_unspent = report.outputs_unspent,
            "rewound main chain"
        );
        Ok(report)
    }

    async fn mark_poison(
        &self,
        height: u64,
        block_id: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO poison_blocks (height, block_id, reason, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (height, block_id) DO NOTHING",
        )
        .bind(height as i64)
        .bind(block_id)
        .bind(reason)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

fn store_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Connection(e.to_string())
        }
        sqlx::Error::Database(db) => match db.kind() {
            sqlx::error::ErrorKind::UniqueViolation
            | sqlx::error::ErrorKind::ForeignKeyViolation
            | sqlx::error::ErrorKind::NotNullViolation
            | sqlx::error::ErrorKind::CheckViolation => StoreError::Constraint(e.to_string()),
            _ => StoreError::Backend(e.to_string()),
        },
        _ => StoreError::Backend(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    // Integration tests require a running PostgreSQL instance.
    // Set DATABASE_URL to enable, e.g.
    //   DATABASE_URL=postgresql://localhost/ergindex_test cargo test -- --ignored

    use super::*;
    use ergindex_core::types::{BalanceDelta, BlockRecord};

    fn block_record(height: u64, id: &str, parent: &str) -> BlockRecord {
        BlockRecord {
            id: id.to_string(),
            header_id: id.to_string(),
            parent_id: parent.to_string(),
            height,
            timestamp: 1_600_000_000_000 + height as i64,
            difficulty: 1,
            block_size: 0,
            block_coins: 0,
            tx_count: 0,
            txs_size: 0,
            miner_address: None,
            main_chain: true,
            version: 3,
            pow_solutions: serde_json::Value::Null,
        }
    }

    fn batch(height: u64, id: &str, parent: &str, deltas: Vec<BalanceDelta>) -> BlockBatch {
        BlockBatch {
            block: block_record(height, id, parent),
            transactions: vec![],
            outputs: vec![],
            inputs: vec![],
            assets: vec![],
            spends: vec![],
            new_tokens: vec![],
            balance_deltas: deltas,
            mining_reward: None,
            address_stats: vec![],
        }
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn commit_and_recommit_roundtrip() {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");
        let store = PgStore::connect(&url).await.unwrap();
        store.rewind_to_height(0).await.unwrap();

        let deltas = vec![BalanceDelta {
            token_id: "ERG".into(),
            address: "it_addr".into(),
            delta: 700,
        }];
        let outcome = store
            .commit_block(batch(1, &"a1".repeat(32), &"a0".repeat(32), deltas.clone()))
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Applied);

        let outcome = store
            .commit_block(batch(1, &"a1".repeat(32), &"a0".repeat(32), deltas))
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::AlreadyApplied);

        let tip = store.tip().await.unwrap().unwrap();
        assert_eq!(tip.height, 1);

        store.rewind_to_height(0).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn rewind_reverses_journal() {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");
        let store = PgStore::connect(&url).await.unwrap();
        store.rewind_to_height(0).await.unwrap();

        let plus = vec![BalanceDelta {
            token_id: "ERG".into(),
            address: "it_addr2".into(),
            delta: 1000,
        }];
        let minus = vec![BalanceDelta {
            token_id: "ERG".into(),
            address: "it_addr2".into(),
            delta: -400,
        }];
        store
            .commit_block(batch(1, &"b1".repeat(32), &"b0".repeat(32), plus))
            .await
            .unwrap();
        store
            .commit_block(batch(2, &"b2".repeat(32), &"b1".repeat(32), minus))
            .await
            .unwrap();

        let report = store.rewind_to_height(1).await.unwrap();
        assert_eq!(report.blocks_orphaned, 1);

        let balance: i64 = sqlx::query_scalar(
            "SELECT balance FROM token_balances WHERE token_id = 'ERG' AND address = 'it_addr2'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(balance, 1000);

        store.rewind_to_height(0).await.unwrap();
    }
}
