//! PostgreSQL store

use alloy::primitives::{Bytes, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::error;

use super::RelayStore;
use crate::types::{CrossDomainMessage, Direction, RelayAttempt, RelayStatus};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

// NUMERIC and JSONB columns go through TEXT casts so no extra sqlx
// type features are needed.
#[derive(Debug, Clone, FromRow)]
struct AttemptRow {
    source_chain_id: i64,
    message_nonce: String,
    direction: String,
    message_hash: String,
    parent_tx_hash: String,
    target: String,
    sender: String,
    payload: Vec<u8>,
    proof: Option<String>,
    retry_count: i32,
    last_error: Option<String>,
    error_kind: Option<String>,
    status: String,
    outcome: Option<String>,
    #[allow(dead_code)]
    updated_at: DateTime<Utc>,
}

const SELECT_ATTEMPT: &str = r#"
    SELECT source_chain_id, message_nonce::TEXT AS message_nonce, direction, message_hash,
           parent_tx_hash, target, sender, payload, proof::TEXT AS proof, retry_count,
           last_error, error_kind, status, outcome::TEXT AS outcome, updated_at
    FROM relay_attempts
"#;

impl TryFrom<AttemptRow> for RelayAttempt {
    type Error = eyre::Report;

    fn try_from(row: AttemptRow) -> Result<Self> {
        let direction = match row.direction.as_str() {
            "deposit" => Direction::Deposit,
            "withdrawal" => Direction::Withdrawal,
            other => return Err(eyre!("Unknown direction in database: {}", other)),
        };
        let status = RelayStatus::parse(&row.status)
            .ok_or_else(|| eyre!("Unknown status in database: {}", row.status))?;

        Ok(RelayAttempt {
            source_chain_id: row.source_chain_id as u64,
            direction,
            message: CrossDomainMessage {
                target: row.target.parse().wrap_err("Invalid target address")?,
                sender: row.sender.parse().wrap_err("Invalid sender address")?,
                payload: Bytes::from(row.payload),
                nonce: row
                    .message_nonce
                    .parse::<U256>()
                    .wrap_err("Invalid message nonce")?,
            },
            message_hash: row.message_hash.parse().wrap_err("Invalid message hash")?,
            parent_tx_hash: row.parent_tx_hash.parse().wrap_err("Invalid parent tx hash")?,
            proof: row
                .proof
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .wrap_err("Invalid stored proof")?,
            retry_count: row.retry_count.max(0) as u32,
            last_error: row.last_error,
            error_kind: row.error_kind,
            status,
            outcome: row
                .outcome
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .wrap_err("Invalid stored outcome")?,
        })
    }
}

/// Relay store backed by PostgreSQL
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RelayStore for PgStore {
    async fn get_attempt(&self, source_chain_id: u64, nonce: U256) -> Result<Option<RelayAttempt>> {
        let query = format!(
            "{SELECT_ATTEMPT} WHERE source_chain_id = $1 AND message_nonce = $2::NUMERIC"
        );
        let row = sqlx::query_as::<_, AttemptRow>(&query)
            .bind(source_chain_id as i64)
            .bind(nonce.to_string())
            .fetch_optional(&self.pool)
            .await
            .wrap_err("Failed to get relay attempt")?;

        row.map(RelayAttempt::try_from).transpose()
    }

    async fn save_attempt(&self, attempt: &RelayAttempt) -> Result<()> {
        let proof = attempt
            .proof
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let outcome = attempt
            .outcome
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO relay_attempts (source_chain_id, message_nonce, direction, message_hash,
                parent_tx_hash, target, sender, payload, proof, retry_count, last_error, status,
                outcome, error_kind)
            VALUES ($1, $2::NUMERIC, $3, $4, $5, $6, $7, $8, $9::JSONB, $10, $11, $12, $13::JSONB,
                $14)
            ON CONFLICT (source_chain_id, message_nonce) DO UPDATE SET
                proof = EXCLUDED.proof,
                retry_count = EXCLUDED.retry_count,
                last_error = EXCLUDED.last_error,
                error_kind = EXCLUDED.error_kind,
                status = EXCLUDED.status,
                outcome = EXCLUDED.outcome,
                updated_at = NOW()
            "#,
        )
        .bind(attempt.source_chain_id as i64)
        .bind(attempt.message.nonce.to_string())
        .bind(attempt.direction.as_str())
        .bind(attempt.message_hash.to_string())
        .bind(attempt.parent_tx_hash.to_string())
        .bind(attempt.message.target.to_string())
        .bind(attempt.message.sender.to_string())
        .bind(attempt.message.payload.to_vec())
        .bind(proof)
        .bind(attempt.retry_count as i32)
        .bind(&attempt.last_error)
        .bind(attempt.status.as_str())
        .bind(outcome)
        .bind(&attempt.error_kind)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("SQL error saving relay attempt: {:?}", e);
            e
        })
        .wrap_err("Failed to save relay attempt")?;

        Ok(())
    }

    async fn list_attempts(&self, status: Option<RelayStatus>) -> Result<Vec<RelayAttempt>> {
        let rows = match status {
            Some(status) => {
                let query = format!("{SELECT_ATTEMPT} WHERE status = $1 ORDER BY id");
                sqlx::query_as::<_, AttemptRow>(&query)
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let query = format!("{SELECT_ATTEMPT} ORDER BY id");
                sqlx::query_as::<_, AttemptRow>(&query)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .wrap_err("Failed to list relay attempts")?;

        rows.into_iter().map(RelayAttempt::try_from).collect()
    }

    async fn list_unfinished(
        &self,
        direction: Direction,
        source_chain_id: u64,
    ) -> Result<Vec<RelayAttempt>> {
        let query = format!(
            "{SELECT_ATTEMPT} WHERE direction = $1 AND source_chain_id = $2 AND status <> 'relayed' ORDER BY id"
        );
        let rows = sqlx::query_as::<_, AttemptRow>(&query)
            .bind(direction.as_str())
            .bind(source_chain_id as i64)
            .fetch_all(&self.pool)
            .await
            .wrap_err("Failed to list unfinished relay attempts")?;

        rows.into_iter().map(RelayAttempt::try_from).collect()
    }

    async fn get_cursor(&self, name: &str) -> Result<Option<u64>> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT last_block FROM watcher_cursors WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .wrap_err("Failed to get watcher cursor")?;

        Ok(row.map(|(block,)| block as u64))
    }

    async fn set_cursor(&self, name: &str, block: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watcher_cursors (name, last_block) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET last_block = EXCLUDED.last_block, updated_at = NOW()
            "#,
        )
        .bind(name)
        .bind(block as i64)
        .execute(&self.pool)
        .await
        .wrap_err("Failed to update watcher cursor")?;

        Ok(())
    }
}
