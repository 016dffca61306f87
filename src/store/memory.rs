//! In-memory store, used when no database is configured

use alloy::primitives::U256;
use async_trait::async_trait;
use eyre::Result;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::RelayStore;
use crate::types::{RelayAttempt, RelayStatus};

#[derive(Default)]
pub struct MemoryStore {
    attempts: RwLock<BTreeMap<(u64, U256), RelayAttempt>>,
    cursors: RwLock<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelayStore for MemoryStore {
    async fn get_attempt(&self, source_chain_id: u64, nonce: U256) -> Result<Option<RelayAttempt>> {
        Ok(self
            .attempts
            .read()
            .await
            .get(&(source_chain_id, nonce))
            .cloned())
    }

    async fn save_attempt(&self, attempt: &RelayAttempt) -> Result<()> {
        self.attempts.write().await.insert(
            (attempt.source_chain_id, attempt.message.nonce),
            attempt.clone(),
        );
        Ok(())
    }

    async fn list_attempts(&self, status: Option<RelayStatus>) -> Result<Vec<RelayAttempt>> {
        Ok(self
            .attempts
            .read()
            .await
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect())
    }

    async fn get_cursor(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.cursors.read().await.get(name).copied())
    }

    async fn set_cursor(&self, name: &str, block: u64) -> Result<()> {
        self.cursors.write().await.insert(name.to_string(), block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CrossDomainMessage, Direction, RelayOutcome, SentMessageRecord};
    use alloy::primitives::{Address, Bytes, B256};

    fn attempt(chain: u64, nonce: u64) -> RelayAttempt {
        let message = CrossDomainMessage {
            target: Address::ZERO,
            sender: Address::ZERO,
            payload: Bytes::new(),
            nonce: U256::from(nonce),
        };
        let record = SentMessageRecord {
            encoded_message: message.encode(),
            encoded_message_hash: message.hash(),
            message,
            parent_block_index: 1,
            parent_tx_hash: B256::ZERO,
            log_index: 0,
        };
        RelayAttempt::new(chain, Direction::Withdrawal, &record)
    }

    #[tokio::test]
    async fn test_upsert_by_chain_and_nonce() {
        let store = MemoryStore::new();
        let mut a = attempt(10, 1);
        store.save_attempt(&a).await.unwrap();
        store.save_attempt(&attempt(420, 1)).await.unwrap();

        a.mark_relayed(RelayOutcome::AlreadyRelayed);
        store.save_attempt(&a).await.unwrap();

        let stored = store.get_attempt(10, U256::from(1)).await.unwrap().unwrap();
        assert_eq!(stored.status, RelayStatus::Relayed);
        assert_eq!(store.list_attempts(None).await.unwrap().len(), 2);
        assert_eq!(
            store
                .list_attempts(Some(RelayStatus::Pending))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_list_unfinished_filters_route() {
        let store = MemoryStore::new();
        let mut relayed = attempt(420, 1);
        relayed.mark_relayed(RelayOutcome::AlreadyRelayed);
        let mut failed = attempt(420, 2);
        failed.mark_failed(&crate::error::RelayError::BatchTimeout { index: 0, rounds: 5 });
        for a in [relayed, failed, attempt(420, 3), attempt(10, 4)] {
            store.save_attempt(&a).await.unwrap();
        }

        let unfinished = store
            .list_unfinished(Direction::Withdrawal, 420)
            .await
            .unwrap();
        let nonces: Vec<U256> = unfinished.iter().map(|a| a.message.nonce).collect();
        assert_eq!(nonces, vec![U256::from(2), U256::from(3)]);
        assert!(store
            .list_unfinished(Direction::Deposit, 420)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_cursor() {
        let store = MemoryStore::new();
        assert_eq!(store.get_cursor("l2").await.unwrap(), None);
        store.set_cursor("l2", 99).await.unwrap();
        assert_eq!(store.get_cursor("l2").await.unwrap(), Some(99));
    }
}
