mod common;

use alloy::primitives::{Address, U256};
use chain_orchestrator::gateway::GatewayError;
use chain_orchestrator::networks::{AssetId, FeeFields, NetworkAddress};
use chain_orchestrator::orchestrator::{
    ConfirmationTracker, OrchestratorError, ReasonCode, TxState,
};
use chain_orchestrator::signing::{DeviceResponse, SigningError};
use common::{eventually, settled, terminal, test_config, Harness, ONE_ETH};

const GWEI: u128 = 1_000_000_000;

fn eip1559(max_gwei: u128, tip_gwei: u128) -> FeeFields {
    FeeFields::Eip1559 {
        max_fee_per_gas: max_gwei * GWEI,
        max_priority_fee_per_gas: tip_gwei * GWEI,
    }
}

#[tokio::test]
async fn second_submission_gets_next_nonce() {
    let h = Harness::new().await;
    h.gateway.set_nonce(h.software.address, 5);

    let a = h.orchestrator.submit(h.transfer(h.software)).unwrap();
    assert!(matches!(settled(&a).await, TxState::Broadcast { nonce: 5, .. }));

    let b = h.orchestrator.submit(h.transfer(h.software)).unwrap();
    assert!(matches!(settled(&b).await, TxState::Broadcast { nonce: 6, .. }));

    let block = h.gateway.mine_block();
    assert_eq!(h.orchestrator.process_block(&block).await, 2);
    assert!(matches!(a.state(), TxState::Confirmed { block_height: 1, .. }));
    assert!(matches!(b.state(), TxState::Confirmed { .. }));
    assert_eq!(h.store.last_nonce(&h.software), Some(6));
}

#[tokio::test]
async fn concurrent_submissions_never_share_a_nonce() {
    let h = Harness::new().await;
    let handles: Vec<_> = (0..8)
        .map(|_| h.orchestrator.submit(h.transfer(h.software)).unwrap())
        .collect();

    let mut nonces = Vec::new();
    for handle in &handles {
        match settled(handle).await {
            TxState::Broadcast { nonce, .. } => nonces.push(nonce),
            other => panic!("unexpected state {:?}", other),
        }
    }
    nonces.sort_unstable();
    assert_eq!(nonces, (0..8).collect::<Vec<_>>());
    assert_eq!(h.orchestrator.nonces().active_reservations(), 0);
}

#[tokio::test]
async fn hardware_rejection_releases_nonce() {
    let h = Harness::new().await;
    h.gateway.set_nonce(h.hardware.address, 5);
    h.device
        .push_response(DeviceResponse::Reject("user declined".into()));

    let a = h.orchestrator.submit(h.transfer(h.hardware)).unwrap();
    match terminal(&a).await {
        TxState::Dropped { reason, message } => {
            assert_eq!(reason, ReasonCode::SignerRejected);
            assert!(message.contains("user declined"));
        }
        other => panic!("unexpected state {:?}", other),
    }

    let b = h.orchestrator.submit(h.transfer(h.hardware)).unwrap();
    assert!(matches!(settled(&b).await, TxState::Broadcast { nonce: 5, .. }));
    assert_eq!(h.device.request_count(), 2);
}

#[tokio::test]
async fn disconnected_device_is_unavailable() {
    let h = Harness::new().await;
    h.device.push_response(DeviceResponse::Disconnect);
    let a = h.orchestrator.submit(h.transfer(h.hardware)).unwrap();
    assert!(matches!(
        terminal(&a).await,
        TxState::Dropped {
            reason: ReasonCode::SignerUnavailable,
            ..
        }
    ));
}

#[tokio::test]
async fn same_draft_twice_yields_one_submission() {
    let h = Harness::new().await;
    let request = h.transfer(h.software);

    let a = h.orchestrator.submit(request.clone()).unwrap();
    let b = h.orchestrator.submit(request).unwrap();
    assert_eq!(a.id(), b.id());

    settled(&a).await;
    assert_eq!(b.state(), a.state());
    assert_eq!(h.gateway.broadcast_count(), 1);
    assert_eq!(h.orchestrator.activity().len(), 1);
}

#[tokio::test]
async fn unknown_signer_is_rejected_at_submit() {
    let h = Harness::new().await;
    let stranger = NetworkAddress::new(Address::repeat_byte(0x42), common::DEV_CHAIN);
    let err = h.orchestrator.submit(h.transfer(stranger)).unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Signing(SigningError::UnknownSigner(_))
    ));
}

#[tokio::test]
async fn unconnected_network_is_rejected_at_submit() {
    let h = Harness::new().await;
    let on_optimism = NetworkAddress::new(h.software.address, 10);
    let err = h.orchestrator.submit(h.transfer(on_optimism)).unwrap_err();
    assert!(matches!(err, OrchestratorError::NotConnected(_)));
}

#[tokio::test]
async fn broadcast_rejection_is_terminal_and_releases_nonce() {
    let h = Harness::new().await;
    h.gateway
        .push_broadcast_error(GatewayError::rejected("nonce too low"));

    let a = h.orchestrator.submit(h.transfer(h.software)).unwrap();
    assert_eq!(
        terminal(&a).await,
        TxState::BroadcastRejected {
            reason: "nonce too low".into()
        }
    );
    assert_eq!(h.gateway.broadcast_count(), 1);

    let b = h.orchestrator.submit(h.transfer(h.software)).unwrap();
    assert!(matches!(settled(&b).await, TxState::Broadcast { nonce: 0, .. }));
}

#[tokio::test]
async fn unreachable_broadcast_retries_then_drops() {
    let h = Harness::new().await;
    for _ in 0..5 {
        h.gateway
            .push_broadcast_error(GatewayError::Unreachable("connection refused".into()));
    }

    let a = h.orchestrator.submit(h.transfer(h.software)).unwrap();
    assert!(matches!(
        terminal(&a).await,
        TxState::Dropped {
            reason: ReasonCode::NetworkUnreachable,
            ..
        }
    ));
    assert_eq!(h.gateway.broadcast_count(), 5);
    assert_eq!(h.orchestrator.nonces().active_reservations(), 0);
}

#[tokio::test]
async fn transient_broadcast_failure_recovers() {
    let h = Harness::new().await;
    for _ in 0..2 {
        h.gateway
            .push_broadcast_error(GatewayError::Unreachable("timeout".into()));
    }

    let a = h.orchestrator.submit(h.transfer(h.software)).unwrap();
    assert!(matches!(
        settled(&a).await,
        TxState::Broadcast { attempts: 3, nonce: 0, .. }
    ));
}

#[tokio::test]
async fn replace_by_fee_pairs_original_and_replacement() {
    let h = Harness::new().await;
    let request = h.transfer(h.software).with_fees(eip1559(10, 1));
    let original = h.orchestrator.submit(request).unwrap();
    assert!(matches!(settled(&original).await, TxState::Broadcast { nonce: 0, .. }));

    let err = h
        .orchestrator
        .replace(original.id(), eip1559(10, 1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::ReplacementUnderpriced { bump_percent: 10 }
    ));

    let replacement = h
        .orchestrator
        .replace(original.id(), eip1559(12, 2))
        .await
        .unwrap();
    let hash = match settled(&replacement).await {
        TxState::Broadcast { hash, nonce: 0, .. } => hash,
        other => panic!("unexpected state {:?}", other),
    };
    assert_eq!(h.gateway.pending_hashes(), vec![hash]);

    let block = h.gateway.mine_block();
    h.orchestrator.process_block(&block).await;
    assert!(matches!(replacement.state(), TxState::Confirmed { .. }));
    assert_eq!(original.state(), TxState::Replaced { by: Some(hash) });

    let activity = h.orchestrator.activity();
    let summary = activity.iter().find(|s| s.id == replacement.id()).unwrap();
    assert_eq!(summary.replaces, Some(original.id()));
}

#[tokio::test]
async fn replace_requires_broadcast_state() {
    let h = Harness::new().await;
    h.gateway
        .push_broadcast_error(GatewayError::rejected("insufficient funds"));
    let a = h.orchestrator.submit(h.transfer(h.software)).unwrap();
    terminal(&a).await;

    let err = h
        .orchestrator
        .replace(a.id(), eip1559(100, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
}

#[tokio::test]
async fn cancel_aborts_pending_hardware_signature() {
    let h = Harness::new().await;
    h.device.push_response(DeviceResponse::Hang);

    let a = h.orchestrator.submit(h.transfer(h.hardware)).unwrap();
    let device = h.device.clone();
    eventually(move || device.request_count() == 1).await;
    a.cancel();

    assert!(matches!(
        terminal(&a).await,
        TxState::Dropped {
            reason: ReasonCode::SigningCancelled,
            ..
        }
    ));
    assert_eq!(h.orchestrator.nonces().active_reservations(), 0);

    let b = h.orchestrator.submit(h.transfer(h.hardware)).unwrap();
    assert!(matches!(settled(&b).await, TxState::Broadcast { nonce: 0, .. }));
}

#[tokio::test]
async fn cancel_during_enrichment_releases_nonce() {
    let h = Harness::new().await;
    h.gateway.set_nonce(h.software.address, 3);
    h.gateway.hold_gas_estimates(true);

    let a = h.orchestrator.submit(h.transfer(h.software)).unwrap();
    let orchestrator = h.orchestrator.clone();
    eventually(move || orchestrator.nonces().active_reservations() == 1).await;
    a.cancel();

    assert!(matches!(
        terminal(&a).await,
        TxState::Dropped {
            reason: ReasonCode::Cancelled,
            ..
        }
    ));
    assert_eq!(h.orchestrator.nonces().active_reservations(), 0);

    h.gateway.hold_gas_estimates(false);
    let b = h.orchestrator.submit(h.transfer(h.software)).unwrap();
    assert!(matches!(settled(&b).await, TxState::Broadcast { nonce: 3, .. }));
    assert_eq!(h.gateway.broadcast_count(), 1);
}

#[tokio::test]
async fn fee_cap_drops_expensive_quotes() {
    let mut config = test_config();
    config.fees.max_fee_per_gas_gwei = 1;
    let h = Harness::with_config(config).await;

    let a = h.orchestrator.submit(h.transfer(h.software)).unwrap();
    match terminal(&a).await {
        TxState::Dropped { reason, .. } => assert_eq!(reason, ReasonCode::FeeCapExceeded),
        other => panic!("unexpected state {:?}", other),
    }
    assert_eq!(h.gateway.broadcast_count(), 0);
    assert_eq!(h.orchestrator.nonces().active_reservations(), 0);
}

#[tokio::test]
async fn confirmation_refreshes_balances() {
    let h = Harness::new().await;
    let a = h.orchestrator.submit(h.transfer(h.software)).unwrap();
    settled(&a).await;

    let block = h.gateway.mine_block();
    h.orchestrator.process_block(&block).await;

    let sender = h.balances.current(&h.software, &AssetId::Native).unwrap();
    assert_eq!(sender.amount, U256::from(9 * ONE_ETH));
    assert_eq!(sender.block_height, block.height);
    let recipient = h.balances.current(&h.recipient(), &AssetId::Native).unwrap();
    assert_eq!(recipient.amount, U256::from(ONE_ETH));
}

#[tokio::test]
async fn tracker_confirms_new_blocks() {
    let h = Harness::new().await;
    let mut tracker = ConfirmationTracker::new(
        h.orchestrator.clone(),
        h.gateway.clone(),
        &h.config.tracker,
    );
    assert_eq!(tracker.poll_once().await.unwrap(), 0);
    assert_eq!(tracker.last_scanned(), Some(0));

    let a = h.orchestrator.submit(h.transfer(h.software)).unwrap();
    settled(&a).await;
    h.gateway.push_fee_block(vec![GWEI], 21_000);
    h.gateway.mine_block();

    assert_eq!(tracker.poll_once().await.unwrap(), 1);
    assert_eq!(tracker.last_scanned(), Some(2));
    assert!(matches!(a.state(), TxState::Confirmed { block_height: 2, .. }));
}

#[tokio::test]
async fn untracked_nonce_use_marks_replaced() {
    let h = Harness::new().await;
    let mut tracker = ConfirmationTracker::new(
        h.orchestrator.clone(),
        h.gateway.clone(),
        &h.config.tracker,
    )
    .starting_after(h.gateway.latest_height());

    let a = h.orchestrator.submit(h.transfer(h.software)).unwrap();
    settled(&a).await;

    // Another wallet spent nonce 0 for this account.
    h.gateway.set_nonce(h.software.address, 1);
    h.gateway.mine_block();

    assert_eq!(tracker.poll_once().await.unwrap(), 0);
    assert_eq!(a.state(), TxState::Replaced { by: None });
}
