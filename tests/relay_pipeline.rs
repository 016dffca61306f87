//! End-to-end relay tests over in-memory chains
//!
//! Run with: cargo test --test relay_pipeline

use alloy::primitives::{address, Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use ovm_bridge_relayer::commitment::PollConfig;
use ovm_bridge_relayer::error::RelayError;
use ovm_bridge_relayer::messenger::Messenger;
use ovm_bridge_relayer::retry::RetryConfig;
use ovm_bridge_relayer::store::RelayStore;
use ovm_bridge_relayer::submitter::DeliveryMode;
use ovm_bridge_relayer::testing::{TestBridge, L1_CHAIN_ID, L1_MESSENGER, L2_CHAIN_ID, L2_MESSENGER};
use ovm_bridge_relayer::types::{RelayOutcome, RelayStatus};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod helpers {
    use super::*;
    use alloy::sol;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    sol! {
        interface ITokenGateway {
            function finalizeDeposit(address from, address to, uint256 amount) external;
            function finalizeWithdrawal(address from, address to, uint256 amount) external;
        }
    }

    pub const L1_GATEWAY: Address = address!("10e6593cdda8c58a1d0f14c5164b376352a55f2f");
    pub const L2_GATEWAY: Address = address!("467194771dae2967aef3ecbedd3bf9a310c76c65");
    pub const ALICE: Address = address!("00000000000000000000000000000000000a11ce");
    pub const BOB: Address = address!("0000000000000000000000000000000000000b0b");

    /// Token balances on both sides of the bridge
    #[derive(Default)]
    pub struct Ledger {
        pub l1: HashMap<Address, U256>,
        pub l2: HashMap<Address, U256>,
        pub escrow: U256,
    }

    pub type SharedLedger = Arc<Mutex<Ledger>>;

    pub fn balance(map: &HashMap<Address, U256>, who: Address) -> U256 {
        map.get(&who).copied().unwrap_or_default()
    }

    pub fn fast_poll() -> PollConfig {
        PollConfig {
            poll_interval: Duration::from_millis(10),
            max_rounds: 20,
            wait_for_fraud_proof_window: false,
        }
    }

    pub fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }

    /// A bridge whose messengers move tokens in `ledger` when they execute
    pub fn bridge_with_ledger(poll: PollConfig, retry: RetryConfig) -> (TestBridge, SharedLedger) {
        let bridge = TestBridge::new(poll, retry);
        let ledger: SharedLedger = Arc::new(Mutex::new(Ledger::default()));

        let deposits = ledger.clone();
        bridge.l2_messenger.set_handler(move |message| {
            if message.target != L2_GATEWAY || message.sender != L1_GATEWAY {
                return Err("unauthorized cross-domain sender".to_string());
            }
            let call = ITokenGateway::finalizeDepositCall::abi_decode(&message.payload, true)
                .map_err(|e| e.to_string())?;
            let mut ledger = deposits.lock().unwrap();
            *ledger.l2.entry(call.to).or_default() += call.amount;
            Ok(())
        });

        let withdrawals = ledger.clone();
        bridge.l1_messenger.set_handler(move |message| {
            if message.target != L1_GATEWAY || message.sender != L2_GATEWAY {
                return Err("unauthorized cross-domain sender".to_string());
            }
            let call = ITokenGateway::finalizeWithdrawalCall::abi_decode(&message.payload, true)
                .map_err(|e| e.to_string())?;
            let mut ledger = withdrawals.lock().unwrap();
            if ledger.escrow < call.amount {
                return Err("escrow underflow".to_string());
            }
            ledger.escrow -= call.amount;
            *ledger.l1.entry(call.to).or_default() += call.amount;
            Ok(())
        });

        (bridge, ledger)
    }

    /// Lock `amount` in escrow on L1 and send the matching L2 mint
    pub fn deposit(bridge: &TestBridge, ledger: &SharedLedger, from: Address, to: Address, amount: u64) -> B256 {
        {
            let mut ledger = ledger.lock().unwrap();
            let balance = ledger.l1.entry(from).or_default();
            *balance -= U256::from(amount);
            ledger.escrow += U256::from(amount);
        }
        let payload = ITokenGateway::finalizeDepositCall {
            from,
            to,
            amount: U256::from(amount),
        }
        .abi_encode();
        let (tx_hash, _) = bridge
            .l1
            .send_message(L1_MESSENGER, L2_GATEWAY, L1_GATEWAY, Bytes::from(payload));
        tx_hash
    }

    /// Burn `amount` on L2 and send the matching L1 release
    pub fn withdraw(bridge: &TestBridge, ledger: &SharedLedger, from: Address, to: Address, amount: u64) -> B256 {
        {
            let mut ledger = ledger.lock().unwrap();
            let balance = ledger.l2.entry(from).or_default();
            *balance -= U256::from(amount);
        }
        let payload = ITokenGateway::finalizeWithdrawalCall {
            from,
            to,
            amount: U256::from(amount),
        }
        .abi_encode();
        let (tx_hash, _) = bridge
            .l2
            .send_message(L2_MESSENGER, L1_GATEWAY, L2_GATEWAY, Bytes::from(payload));
        tx_hash
    }

    pub fn fund_l1(ledger: &SharedLedger, who: Address, amount: u64) {
        ledger.lock().unwrap().l1.insert(who, U256::from(amount));
    }

    /// Give `who` bridged L2 tokens backed by the same amount in escrow
    pub fn fund_l2(ledger: &SharedLedger, who: Address, amount: u64) {
        let mut ledger = ledger.lock().unwrap();
        ledger.l2.insert(who, U256::from(amount));
        ledger.escrow += U256::from(amount);
    }
}

use helpers::*;

#[tokio::test(start_paused = true)]
async fn test_deposit_credits_l2_and_locks_escrow() {
    let (bridge, ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    fund_l1(&ledger, ALICE, 1_000);

    let tx = deposit(&bridge, &ledger, ALICE, BOB, 500);
    let report = bridge
        .orchestrator
        .relay_deposit(tx, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.attempts.len(), 1);
    assert!(matches!(
        report.attempts[0].outcome,
        Some(RelayOutcome::Relayed { .. })
    ));

    let ledger = ledger.lock().unwrap();
    assert_eq!(balance(&ledger.l1, ALICE), U256::from(500));
    assert_eq!(balance(&ledger.l2, BOB), U256::from(500));
    assert_eq!(ledger.escrow, U256::from(500));

    // Deposits go through the proofless relay
    let relays = bridge.l2_messenger.relays();
    assert_eq!(relays.len(), 1);
    assert!(relays[0].proof.is_none());
    assert_eq!(bridge.l1_messenger.relay_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_withdrawal_round_trip_releases_escrow() {
    let (bridge, ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    fund_l1(&ledger, ALICE, 1_000);

    let tx = deposit(&bridge, &ledger, ALICE, ALICE, 400);
    bridge
        .orchestrator
        .relay_deposit(tx, &CancellationToken::new())
        .await
        .unwrap();

    let tx = withdraw(&bridge, &ledger, ALICE, ALICE, 150);
    let header = bridge.commit_l2_blocks().expect("L2 blocks to commit");
    assert_eq!(header.batch_index, U256::ZERO);

    let report = bridge
        .orchestrator
        .relay_withdrawal(tx, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success(), "{report:?}");

    {
        let ledger = ledger.lock().unwrap();
        assert_eq!(balance(&ledger.l1, ALICE), U256::from(750));
        assert_eq!(balance(&ledger.l2, ALICE), U256::from(250));
        assert_eq!(ledger.escrow, U256::from(250));
    }

    // The L1 relay carried a proof against the committed batch
    let relays = bridge.l1_messenger.relays();
    assert_eq!(relays.len(), 1);
    let proof = relays[0].proof.as_ref().expect("withdrawal proof");
    assert_eq!(proof.batch_header, header);
    assert!(!proof.state_trie_witness.is_empty());
    assert!(!proof.storage_trie_witness.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_withdrawal_waits_for_state_commitment() {
    let (bridge, ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    fund_l2(&ledger, ALICE, 100);

    let tx = withdraw(&bridge, &ledger, ALICE, BOB, 100);
    let orchestrator = bridge.orchestrator.clone();
    let relay = tokio::spawn(async move {
        orchestrator
            .relay_withdrawal(tx, &CancellationToken::new())
            .await
    });

    tokio::time::sleep(Duration::from_millis(55)).await;
    assert_eq!(bridge.l1_messenger.relay_count(), 0);
    bridge.commit_l2_blocks();

    let report = relay.await.unwrap().unwrap();
    assert!(report.is_success());
    assert_eq!(balance(&ledger.lock().unwrap().l1, BOB), U256::from(100));
}

#[tokio::test(start_paused = true)]
async fn test_replayed_withdrawal_is_already_relayed_without_double_credit() {
    let (bridge, ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    fund_l2(&ledger, ALICE, 300);

    let tx = withdraw(&bridge, &ledger, ALICE, BOB, 100);
    bridge.commit_l2_blocks();
    let cancel = CancellationToken::new();
    bridge.orchestrator.relay_withdrawal(tx, &cancel).await.unwrap();

    // Forget the stored outcome and hide successfulMessages so the relay
    // is actually resubmitted and refused by the messenger.
    let mut stored = bridge
        .store
        .get_attempt(L2_CHAIN_ID, U256::ZERO)
        .await
        .unwrap()
        .unwrap();
    stored.status = RelayStatus::Pending;
    stored.outcome = None;
    bridge.store.save_attempt(&stored).await.unwrap();
    bridge.l1_messenger.skip_precheck(true);

    let report = bridge.orchestrator.relay_withdrawal(tx, &cancel).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.attempts[0].outcome, Some(RelayOutcome::AlreadyRelayed));

    let ledger = ledger.lock().unwrap();
    assert_eq!(balance(&ledger.l1, BOB), U256::from(100));
    assert_eq!(ledger.escrow, U256::from(200));
    assert_eq!(bridge.l1_messenger.relay_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_run_skips_stored_relays() {
    let (bridge, ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    fund_l1(&ledger, ALICE, 100);
    let tx = deposit(&bridge, &ledger, ALICE, BOB, 100);
    let cancel = CancellationToken::new();

    let first = bridge.orchestrator.relay_deposit(tx, &cancel).await.unwrap();
    let second = bridge.orchestrator.relay_deposit(tx, &cancel).await.unwrap();

    assert_eq!(first.attempts, second.attempts);
    assert_eq!(bridge.l2_messenger.relay_count(), 1);
    assert_eq!(balance(&ledger.lock().unwrap().l2, BOB), U256::from(100));

    let stored = bridge
        .store
        .list_attempts(Some(RelayStatus::Relayed))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].source_chain_id, L1_CHAIN_ID);
}

#[tokio::test(start_paused = true)]
async fn test_multiple_messages_in_one_transaction() {
    let (bridge, _ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    bridge.l2_messenger.set_handler(|_| Ok(()));

    // Earlier traffic so the batch carries non-zero nonces
    bridge
        .l1
        .send_message(L1_MESSENGER, L2_GATEWAY, L1_GATEWAY, Bytes::from_static(b"warmup"));
    let (tx, sent) = bridge.l1.send_messages(
        L1_MESSENGER,
        L1_GATEWAY,
        &[
            (L2_GATEWAY, Bytes::from_static(b"one")),
            (L2_GATEWAY, Bytes::from_static(b"two")),
            (L2_GATEWAY, Bytes::from_static(b"three")),
        ],
    );

    let report = bridge
        .orchestrator
        .relay_deposit(tx, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());

    let nonces: Vec<U256> = report.attempts.iter().map(|a| a.message.nonce).collect();
    assert_eq!(nonces, vec![U256::from(1), U256::from(2), U256::from(3)]);
    let relayed: Vec<_> = bridge
        .l2_messenger
        .relays()
        .into_iter()
        .map(|r| r.message)
        .collect();
    assert_eq!(relayed, sent);
}

#[tokio::test(start_paused = true)]
async fn test_failed_message_does_not_block_the_rest() {
    let (bridge, _ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    bridge.l2_messenger.set_handler(|message| {
        if message.payload.as_ref() == b"bad" {
            Err("target reverted".to_string())
        } else {
            Ok(())
        }
    });

    let (tx, _) = bridge.l1.send_messages(
        L1_MESSENGER,
        L1_GATEWAY,
        &[
            (L2_GATEWAY, Bytes::from_static(b"bad")),
            (L2_GATEWAY, Bytes::from_static(b"good")),
        ],
    );
    let report = bridge
        .orchestrator
        .relay_deposit(tx, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.attempts[0].status, RelayStatus::Failed);
    assert!(report.attempts[0].retry_count > 0);
    assert_eq!(report.attempts[1].status, RelayStatus::Relayed);
}

#[tokio::test(start_paused = true)]
async fn test_uncommitted_withdrawal_times_out() {
    let poll = PollConfig {
        poll_interval: Duration::from_millis(10),
        max_rounds: 3,
        wait_for_fraud_proof_window: false,
    };
    let (bridge, ledger) = bridge_with_ledger(poll, fast_retry());
    fund_l2(&ledger, ALICE, 1);
    let tx = withdraw(&bridge, &ledger, ALICE, BOB, 1);

    let report = bridge
        .orchestrator
        .relay_withdrawal(tx, &CancellationToken::new())
        .await
        .unwrap();

    let attempt = &report.attempts[0];
    assert_eq!(attempt.status, RelayStatus::Failed);
    assert_eq!(
        attempt.last_error.as_deref(),
        Some(RelayError::BatchTimeout { index: 0, rounds: 3 }.to_string().as_str())
    );
    assert_eq!(bridge.l1_messenger.relay_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_submission_failure_is_retried() {
    let (bridge, ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    fund_l1(&ledger, ALICE, 10);
    bridge
        .l2_messenger
        .fail_next(RelayError::RpcUnavailable("connection reset".into()));
    bridge
        .l2_messenger
        .fail_next(RelayError::RpcUnavailable("connection reset".into()));

    let tx = deposit(&bridge, &ledger, ALICE, BOB, 10);
    let report = bridge
        .orchestrator
        .relay_deposit(tx, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.attempts[0].retry_count, 2);
    assert_eq!(bridge.l2_messenger.relay_count(), 1);
    assert_eq!(balance(&ledger.lock().unwrap().l2, BOB), U256::from(10));
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_is_bounded() {
    let (bridge, ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    for _ in 0..10 {
        bridge
            .l2_messenger
            .fail_next(RelayError::RpcUnavailable("connection reset".into()));
    }

    let tx = deposit(&bridge, &ledger, ALICE, BOB, 0);
    let report = bridge
        .orchestrator
        .relay_deposit(tx, &CancellationToken::new())
        .await
        .unwrap();

    let attempt = &report.attempts[0];
    assert_eq!(attempt.status, RelayStatus::Failed);
    assert_eq!(attempt.retry_count, 3);
    assert_eq!(bridge.l2_messenger.relay_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_commitment_wait() {
    let (bridge, ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    fund_l2(&ledger, ALICE, 1);
    let tx = withdraw(&bridge, &ledger, ALICE, BOB, 1);

    let cancel = CancellationToken::new();
    let orchestrator = bridge.orchestrator.clone();
    let task_cancel = cancel.clone();
    let relay =
        tokio::spawn(async move { orchestrator.relay_withdrawal(tx, &task_cancel).await });

    tokio::time::sleep(Duration::from_millis(25)).await;
    cancel.cancel();

    assert_eq!(relay.await.unwrap().unwrap_err(), RelayError::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_source_transaction_times_out() {
    let (bridge, _ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    let err = bridge
        .orchestrator
        .relay_deposit(B256::repeat_byte(0x77), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        RelayError::Timeout { elapsed, .. } => assert!(elapsed >= Duration::from_secs(120)),
        other => panic!("expected receipt timeout, got {other:?}"),
    }
    assert!(bridge.store.list_attempts(None).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_proof_node_hiccup_is_retried() {
    let (bridge, ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    fund_l2(&ledger, ALICE, 30);
    let tx = withdraw(&bridge, &ledger, ALICE, BOB, 30);
    bridge.commit_l2_blocks();
    bridge.l2.fail_next_proofs(1);

    let report = bridge
        .orchestrator
        .relay_withdrawal(tx, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.attempts[0].retry_count, 1);
    assert_eq!(bridge.l1_messenger.relay_count(), 1);
    assert_eq!(balance(&ledger.lock().unwrap().l1, BOB), U256::from(30));
}

#[tokio::test(start_paused = true)]
async fn test_proof_node_outage_exhausts_retries() {
    let (bridge, ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    fund_l2(&ledger, ALICE, 30);
    let tx = withdraw(&bridge, &ledger, ALICE, BOB, 30);
    bridge.commit_l2_blocks();
    bridge.l2.fail_next_proofs(10);

    let report = bridge
        .orchestrator
        .relay_withdrawal(tx, &CancellationToken::new())
        .await
        .unwrap();

    let attempt = &report.attempts[0];
    assert_eq!(attempt.status, RelayStatus::Failed);
    assert_eq!(attempt.retry_count, 3);
    assert_eq!(attempt.error_kind.as_deref(), Some("rpc_unavailable"));
    assert!(attempt.is_resumable());
    assert_eq!(bridge.l1_messenger.relay_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_receipt_lookup_survives_transient_errors() {
    let (bridge, ledger) = bridge_with_ledger(fast_poll(), fast_retry());
    fund_l1(&ledger, ALICE, 50);
    let tx = deposit(&bridge, &ledger, ALICE, BOB, 50);
    bridge.l1.fail_next_receipts(2);

    let report = bridge
        .orchestrator
        .relay_deposit(tx, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success(), "{report:?}");
    assert_eq!(balance(&ledger.lock().unwrap().l2, BOB), U256::from(50));
}

#[tokio::test(start_paused = true)]
async fn test_observed_deposit_is_left_to_the_destination() {
    let bridge = TestBridge::with_deposit_delivery(
        fast_poll(),
        fast_retry(),
        DeliveryMode::Observe {
            poll_interval: Duration::from_millis(10),
            max_rounds: 20,
        },
    );
    let (tx, message) = bridge.l1.send_message(
        L1_MESSENGER,
        L2_GATEWAY,
        L1_GATEWAY,
        Bytes::from_static(b"auto relayed"),
    );

    let orchestrator = bridge.orchestrator.clone();
    let relay = tokio::spawn(async move {
        orchestrator
            .relay_deposit(tx, &CancellationToken::new())
            .await
    });

    tokio::time::sleep(Duration::from_millis(45)).await;
    assert_eq!(bridge.l2_messenger.relay_count(), 0);

    // The L2 node relays deposits on its own
    bridge
        .l2_messenger
        .relay_message(&message, None)
        .await
        .unwrap();

    let report = relay.await.unwrap().unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.attempts[0].outcome, Some(RelayOutcome::AlreadyRelayed));
    assert_eq!(bridge.l2_messenger.relay_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_observed_deposit_that_never_lands_fails() {
    let bridge = TestBridge::with_deposit_delivery(
        fast_poll(),
        fast_retry(),
        DeliveryMode::Observe {
            poll_interval: Duration::from_millis(10),
            max_rounds: 3,
        },
    );
    let (tx, _) = bridge.l1.send_message(
        L1_MESSENGER,
        L2_GATEWAY,
        L1_GATEWAY,
        Bytes::from_static(b"stuck"),
    );

    let report = bridge
        .orchestrator
        .relay_deposit(tx, &CancellationToken::new())
        .await
        .unwrap();

    let attempt = &report.attempts[0];
    assert_eq!(attempt.status, RelayStatus::Failed);
    assert_eq!(attempt.error_kind.as_deref(), Some("timeout"));
    assert_eq!(bridge.l2_messenger.relay_count(), 0);
}
