//! Relay attempt persistence
//!
//! Attempts are keyed by `(source_chain_id, message nonce)`. The watcher
//! also keeps its scan cursor here.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use alloy::primitives::U256;
use async_trait::async_trait;
use eyre::Result;

use crate::types::{Direction, RelayAttempt, RelayStatus};

#[async_trait]
pub trait RelayStore: Send + Sync {
    async fn get_attempt(&self, source_chain_id: u64, nonce: U256) -> Result<Option<RelayAttempt>>;

    /// Insert or update by `(source_chain_id, nonce)`
    async fn save_attempt(&self, attempt: &RelayAttempt) -> Result<()>;

    async fn list_attempts(&self, status: Option<RelayStatus>) -> Result<Vec<RelayAttempt>>;

    /// Attempts from one source chain that have not reached `Relayed`
    async fn list_unfinished(
        &self,
        direction: Direction,
        source_chain_id: u64,
    ) -> Result<Vec<RelayAttempt>> {
        Ok(self
            .list_attempts(None)
            .await?
            .into_iter()
            .filter(|a| {
                a.direction == direction
                    && a.source_chain_id == source_chain_id
                    && a.status != RelayStatus::Relayed
            })
            .collect())
    }

    async fn get_cursor(&self, name: &str) -> Result<Option<u64>>;

    async fn set_cursor(&self, name: &str, block: u64) -> Result<()>;
}
