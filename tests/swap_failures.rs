#![cfg(feature = "fake")]

mod support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};

use peerswap::chain::Chain;
use peerswap::config::MAX_AMOUNT_SAT;
use peerswap::fake::{
    ClaimPath, FakeLightning, FakeMessenger, FakeNetwork, FakeNode, InvoiceBook,
};
use peerswap::messages::{MessageType, SwapInRequest};
use peerswap::policy::StaticPolicy;
use peerswap::swap::SwapType;
use peerswap::swap::service::SwapService;
use peerswap::swap::services::SwapServices;
use peerswap::swap::state::SwapState;
use peerswap::swap::store::{MemoryRequestedSwapsStore, MemorySwapStore, RequestedSwap};
use peerswap::swap::swap_in_receiver::SwapInReceiverState;
use peerswap::swap::swap_in_sender::SwapInSenderState;
use peerswap::swap::swap_out_receiver::SwapOutReceiverState;
use peerswap::swap::swap_out_sender::SwapOutSenderState;
use peerswap::{SwapError, SwapServiceConfig};

use support::nodes::{
    WAIT_TIMEOUT, started_pair, stored_swap, swap_id, test_config, wait_for_state,
    wait_for_terminal,
};
use support::wait::wait_until;

const AMOUNT_SAT: u64 = 100_000;

#[tokio::test]
async fn send_failures_are_retried_in_place() -> Result<()> {
    let pair = started_pair(test_config()).await?;
    let (alice, bob) = (&pair.alice, &pair.bob);
    alice.messenger.fail_next_sends(2);

    let swap = alice
        .service
        .swap_out("bob", Chain::Liquid, "chan-1", "alice", AMOUNT_SAT)
        .await
        .context("start swap out")?;
    let id = swap_id(&swap).await;

    let alice_swap = wait_for_terminal(alice, &id).await?;
    wait_for_state(bob, &id, SwapState::ClaimedPreimage).await?;

    assert_eq!(alice_swap.current(), SwapState::ClaimedPreimage);
    assert_eq!(alice_swap.retries, 2);
    assert_eq!(alice_swap.failures, 0);

    Ok(())
}

#[tokio::test]
async fn retry_budget_exhaustion_fails_the_action() -> Result<()> {
    let pair = started_pair(test_config()).await?;
    let (alice, bob) = (&pair.alice, &pair.bob);
    alice.messenger.fail_next_sends(10);

    let swap = alice
        .service
        .swap_out("bob", Chain::Liquid, "chan-1", "alice", AMOUNT_SAT)
        .await
        .context("start swap out")?;
    let id = swap_id(&swap).await;

    let machine = swap.lock().await.clone();
    assert_eq!(machine.current(), SwapState::SwapCanceled);
    assert_eq!(
        machine.previous,
        SwapState::SwapOutSender(SwapOutSenderState::SendRequest)
    );
    assert_eq!(machine.retries, test_config().max_retries);
    assert_eq!(machine.failures, 1);
    assert!(
        machine
            .data
            .last_err
            .as_deref()
            .is_some_and(|e| e.contains("injected send failure"))
    );

    assert_eq!(stored_swap(alice, &id)?, Some(machine));
    assert!(stored_swap(bob, &id)?.is_none());
    assert!(alice.service.get_active_swap(&id).is_err());

    Ok(())
}

#[tokio::test]
async fn failure_cap_forces_cancel() -> Result<()> {
    let config = SwapServiceConfig {
        max_failures: 0,
        ..test_config()
    };
    let pair = started_pair(config).await?;
    let (alice, bob) = (&pair.alice, &pair.bob);
    alice.lightning.fail_payments_with_label_prefix(Some("fee_"));

    let swap = alice
        .service
        .swap_out("bob", Chain::Liquid, "chan-1", "alice", AMOUNT_SAT)
        .await
        .context("start swap out")?;
    let id = swap_id(&swap).await;

    let alice_swap = wait_for_terminal(alice, &id).await?;
    assert_eq!(alice_swap.current(), SwapState::SwapCanceled);
    // Canceled straight from the failing state, without telling the peer.
    assert_eq!(
        alice_swap.previous,
        SwapState::SwapOutSender(SwapOutSenderState::PayFeeInvoice)
    );
    assert_eq!(alice_swap.failures, 1);
    assert!(
        alice_swap
            .data
            .cancel_message
            .as_deref()
            .is_some_and(|m| m.contains("after 1 failures"))
    );

    let bob_swap = wait_for_state(
        bob,
        &id,
        SwapState::SwapOutReceiver(SwapOutReceiverState::AwaitFeeInvoicePayment),
    )
    .await?;
    assert!(bob_swap.data.cancel_message.is_none());

    // The receiver gives up on its own.
    bob.service
        .cancel_swap(&id, "fee not paid in time")
        .await
        .context("cancel on bob")?;
    let bob_swap = wait_for_terminal(bob, &id).await?;
    assert_eq!(bob_swap.current(), SwapState::SwapCanceled);
    assert_eq!(
        bob_swap.previous,
        SwapState::SwapOutReceiver(SwapOutReceiverState::SendCancel)
    );
    assert_eq!(
        bob_swap.data.cancel_message.as_deref(),
        Some("fee not paid in time")
    );

    let err = bob
        .service
        .cancel_swap(&id, "again")
        .await
        .err()
        .context("finished swap cannot be canceled")?;
    assert!(matches!(err, SwapError::SwapNotFound(_)));

    Ok(())
}

#[tokio::test]
async fn failure_cap_keeps_reclaiming_committed_funds() -> Result<()> {
    let config = SwapServiceConfig {
        max_failures: 0,
        max_retries: 0,
        claim_retry_interval: Duration::from_millis(20),
        ..test_config()
    };
    let pair = started_pair(config).await?;
    let (alice, bob) = (&pair.alice, &pair.bob);
    bob.lightning.fail_payments_with_label_prefix(Some("claim_"));
    alice.bitcoin.fail_next_claims(1);

    let swap = alice
        .service
        .swap_in("bob", Chain::Bitcoin, "chan-1", "alice", AMOUNT_SAT)
        .await
        .context("start swap in")?;
    let id = swap_id(&swap).await;

    // Nothing is at stake for the taker yet, so the cap cancels it.
    let bob_swap = wait_for_terminal(bob, &id).await?;
    assert_eq!(bob_swap.current(), SwapState::SwapCanceled);
    assert_eq!(
        bob_swap.previous,
        SwapState::SwapInReceiver(SwapInReceiverState::PayClaimInvoice)
    );

    wait_until("alice csv watch", WAIT_TIMEOUT, || {
        alice.bitcoin.has_csv_watch(&id)
    })
    .await?;
    alice.bitcoin.pass_csv(&id).await?;

    // The opening tx is out, so the maker keeps claiming past the cap.
    let alice_swap = wait_for_terminal(alice, &id).await?;
    assert_eq!(alice_swap.current(), SwapState::ClaimedCsv);
    assert_eq!(
        alice_swap.previous,
        SwapState::SwapInSender(SwapInSenderState::ClaimSwapCsv)
    );
    assert_eq!(alice_swap.failures, 1);
    assert!(alice_swap.data.cancel_message.is_none());
    assert_eq!(
        pair.network.bitcoin.claims(),
        vec![(id.clone(), ClaimPath::Csv)]
    );

    Ok(())
}

#[tokio::test]
async fn failed_claim_is_retried_without_restart() -> Result<()> {
    let config = SwapServiceConfig {
        claim_retry_interval: Duration::from_millis(20),
        ..test_config()
    };
    let pair = started_pair(config.clone()).await?;
    let (alice, bob) = (&pair.alice, &pair.bob);
    alice.liquid.set_auto_confirm(false);
    // One full attempt with in-place retries, then two parked attempts.
    bob.liquid.fail_next_claims(config.max_retries + 3);

    let swap = alice
        .service
        .swap_out("bob", Chain::Liquid, "chan-1", "alice", AMOUNT_SAT)
        .await
        .context("start swap out")?;
    let id = swap_id(&swap).await;

    wait_until("bob csv watch", WAIT_TIMEOUT, || bob.liquid.has_csv_watch(&id)).await?;
    bob.liquid.pass_csv(&id).await?;

    let bob_swap = wait_for_terminal(bob, &id).await?;
    assert_eq!(bob_swap.current(), SwapState::ClaimedCsv);
    assert_eq!(bob_swap.failures, 3);
    assert_eq!(bob_swap.retries, config.max_retries);
    assert_eq!(
        pair.network.liquid.claims(),
        vec![(id.clone(), ClaimPath::Csv)]
    );

    Ok(())
}

#[tokio::test]
async fn amounts_beyond_msat_range_are_refused() -> Result<()> {
    let pair = started_pair(test_config()).await?;
    let (alice, bob) = (&pair.alice, &pair.bob);
    let huge = u64::MAX / 10;

    let err = alice
        .service
        .swap_in("bob", Chain::Bitcoin, "chan-1", "alice", huge)
        .await
        .err()
        .context("oversized swap in must be rejected")?;
    assert!(matches!(err, SwapError::InvalidAmount(_)));
    let err = alice
        .service
        .swap_out("bob", Chain::Bitcoin, "chan-1", "alice", MAX_AMOUNT_SAT + 1)
        .await
        .err()
        .context("oversized swap out must be rejected")?;
    assert!(matches!(err, SwapError::InvalidAmount(_)));
    assert!(alice.service.list_swaps()?.is_empty());

    // A peer asking for the same is canceled, not trusted.
    let request = SwapInRequest {
        swap_id: "swap-huge".to_string(),
        protocol_version: test_config().protocol_version,
        chain: Chain::Bitcoin,
        channel_id: "chan-2".to_string(),
        amount_sat: huge,
        maker_pubkey_hash: "00".repeat(20),
    };
    let payload = serde_json::to_vec(&request).context("encode request")?;
    bob.service
        .on_message("alice", &MessageType::SwapInRequest.to_hex(), &payload)
        .await
        .context("deliver oversized request")?;

    let bob_swap = wait_for_terminal(bob, "swap-huge").await?;
    assert_eq!(bob_swap.current(), SwapState::SwapCanceled);
    assert!(
        bob_swap
            .data
            .cancel_message
            .as_deref()
            .is_some_and(|m| m.contains("invalid amount"))
    );
    assert_eq!(bob.lightning.payments(), 0);

    Ok(())
}

#[tokio::test]
async fn policy_rejection_is_recorded_as_requested_swap() -> Result<()> {
    let _ = peerswap::logging::init();
    let network = FakeNetwork::new();
    let alice = FakeNode::new("alice", &network, test_config());
    let bob = FakeNode::with_parts(
        "bob",
        &network,
        test_config(),
        Arc::new(MemorySwapStore::new()),
        Arc::new(MemoryRequestedSwapsStore::new()),
        Arc::new(StaticPolicy::allowlist(["carol"])),
    );
    alice.connect(&bob);
    alice.service.start().await?;
    bob.service.start().await?;

    let swap = alice
        .service
        .swap_out("bob", Chain::Liquid, "chan-1", "alice", AMOUNT_SAT)
        .await
        .context("start swap out")?;
    let id = swap_id(&swap).await;

    let alice_swap = wait_for_terminal(&alice, &id).await?;
    let bob_swap = wait_for_terminal(&bob, &id).await?;

    assert_eq!(bob_swap.current(), SwapState::SwapCanceled);
    assert_eq!(
        bob_swap.previous,
        SwapState::SwapOutReceiver(SwapOutReceiverState::SendCancel)
    );
    assert!(bob_swap.data.fee_invoice.is_none());
    assert_eq!(alice_swap.current(), SwapState::SwapCanceled);
    assert_eq!(
        alice_swap.data.cancel_message.as_deref(),
        Some("peer alice is not allowed to swap")
    );

    let requested = bob.service.requested_swaps()?;
    assert_eq!(
        requested.get("alice"),
        Some(&vec![RequestedSwap {
            chain: Chain::Liquid,
            amount_sat: AMOUNT_SAT,
            swap_type: SwapType::SwapOut,
        }])
    );

    Ok(())
}

#[tokio::test]
async fn invalid_local_requests_create_nothing() -> Result<()> {
    let _ = peerswap::logging::init();
    let network = FakeNetwork::new();
    let alice = FakeNode::with_parts(
        "alice",
        &network,
        test_config(),
        Arc::new(MemorySwapStore::new()),
        Arc::new(MemoryRequestedSwapsStore::new()),
        Arc::new(StaticPolicy::allowlist(["bob"])),
    );
    alice.service.start().await?;

    let err = alice
        .service
        .swap_out("bob", Chain::Liquid, "chan-1", "alice", 0)
        .await
        .err()
        .context("zero amount must be rejected")?;
    assert!(matches!(err, SwapError::InvalidAmount(_)));

    let err = alice
        .service
        .swap_in("carol", Chain::Liquid, "chan-1", "alice", AMOUNT_SAT)
        .await
        .err()
        .context("peer outside the allowlist must be rejected")?;
    assert!(matches!(err, SwapError::PeerNotAllowed(_)));

    assert!(alice.service.list_swaps()?.is_empty());

    let err = alice
        .service
        .on_payment_settled("invoice-from-elsewhere")
        .await
        .err()
        .context("foreign invoice label must be rejected")?;
    assert!(matches!(err, SwapError::UnknownInvoiceLabel(_)));

    let err = alice
        .service
        .on_tx_confirmed("unknown-swap")
        .await
        .err()
        .context("unknown swap must be rejected")?;
    assert!(matches!(err, SwapError::SwapNotFound(_)));

    Ok(())
}

#[tokio::test]
async fn start_requires_a_chain_backend() -> Result<()> {
    let messenger = FakeMessenger::new("alice");
    let lightning = FakeLightning::new(Arc::new(InvoiceBook::default()));
    let services = SwapServices::new(
        Arc::new(MemorySwapStore::new()),
        Arc::new(MemoryRequestedSwapsStore::new()),
        lightning,
        messenger,
        Arc::new(StaticPolicy::accept_all()),
    );
    let service = SwapService::new(services, test_config());

    let err = service
        .start()
        .await
        .err()
        .context("start without chains must fail")?;
    assert!(matches!(err, SwapError::NoChainEnabled));

    let err = service
        .swap_out("bob", Chain::Bitcoin, "chan-1", "alice", AMOUNT_SAT)
        .await
        .err()
        .context("swap on a disabled chain must be rejected")?;
    assert!(matches!(err, SwapError::ChainNotEnabled(Chain::Bitcoin)));

    Ok(())
}
