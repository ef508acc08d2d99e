#![cfg(feature = "fake")]

mod support;

use anyhow::{Context as _, Result};

use peerswap::chain::Chain;
use peerswap::fake::{ClaimPath, FAKE_OPENING_FEE_SAT};
use peerswap::swap::state::SwapState;
use peerswap::swap::swap_in_receiver::SwapInReceiverState;
use peerswap::swap::swap_in_sender::SwapInSenderState;
use peerswap::swap::{SwapRole, SwapType};

use support::nodes::{started_pair, swap_id, test_config, wait_for_terminal};

#[tokio::test]
async fn swap_in_claims_with_preimage_on_bitcoin() -> Result<()> {
    let pair = started_pair(test_config()).await?;
    let (alice, bob) = (&pair.alice, &pair.bob);

    let swap = alice
        .service
        .swap_in("bob", Chain::Bitcoin, "chan-1", "alice", 50_000)
        .await
        .context("start swap in")?;
    let id = swap_id(&swap).await;

    let alice_swap = wait_for_terminal(alice, &id).await?;
    let bob_swap = wait_for_terminal(bob, &id).await?;

    assert_eq!(alice_swap.swap_type, SwapType::SwapIn);
    assert_eq!(alice_swap.role, SwapRole::Sender);
    assert_eq!(alice_swap.current(), SwapState::ClaimedPreimage);
    assert_eq!(
        alice_swap.previous,
        SwapState::SwapInSender(SwapInSenderState::AwaitClaimInvoicePayment)
    );
    assert_eq!(alice_swap.data.opening_tx_fee, FAKE_OPENING_FEE_SAT);

    assert_eq!(bob_swap.role, SwapRole::Receiver);
    assert_eq!(bob_swap.current(), SwapState::ClaimedPreimage);
    assert_eq!(
        bob_swap.previous,
        SwapState::SwapInReceiver(SwapInReceiverState::ClaimSwapPreimage)
    );
    assert_eq!(bob_swap.data.claim_preimage, alice_swap.data.claim_preimage);
    assert_eq!(bob_swap.data.taker_pubkey_hash, alice_swap.data.taker_pubkey_hash);
    assert_eq!(bob_swap.data.initiator_node_id, "alice");

    // No fee invoice in a swap-in: the taker only pays the claim.
    assert!(alice_swap.data.fee_invoice.is_none());
    assert_eq!(bob.lightning.payments(), 1);
    assert_eq!(alice.lightning.payments(), 0);
    assert_eq!(
        pair.network.bitcoin.claims(),
        vec![(id.clone(), ClaimPath::Preimage)]
    );

    Ok(())
}

#[tokio::test]
async fn swap_in_claim_payment_failure_closes_cooperatively() -> Result<()> {
    let pair = started_pair(test_config()).await?;
    let (alice, bob) = (&pair.alice, &pair.bob);
    bob.lightning.fail_payments_with_label_prefix(Some("claim_"));

    let swap = alice
        .service
        .swap_in("bob", Chain::Liquid, "chan-1", "alice", 50_000)
        .await
        .context("start swap in")?;
    let id = swap_id(&swap).await;

    let alice_swap = wait_for_terminal(alice, &id).await?;
    let bob_swap = wait_for_terminal(bob, &id).await?;

    assert_eq!(bob_swap.current(), SwapState::ClaimedCoop);
    assert_eq!(alice_swap.current(), SwapState::ClaimedCoop);
    assert_eq!(
        alice_swap.previous,
        SwapState::SwapInSender(SwapInSenderState::ClaimSwapCoop)
    );
    assert_eq!(
        pair.network.liquid.claims(),
        vec![(id.clone(), ClaimPath::Coop)]
    );

    Ok(())
}

#[tokio::test]
async fn swap_in_broadcast_failure_cancels() -> Result<()> {
    let pair = started_pair(test_config()).await?;
    let (alice, bob) = (&pair.alice, &pair.bob);
    alice.liquid.set_fail_broadcast(true);

    let swap = alice
        .service
        .swap_in("bob", Chain::Liquid, "chan-1", "alice", 50_000)
        .await
        .context("start swap in")?;
    let id = swap_id(&swap).await;

    let alice_swap = wait_for_terminal(alice, &id).await?;
    let bob_swap = wait_for_terminal(bob, &id).await?;

    assert_eq!(alice_swap.current(), SwapState::SwapCanceled);
    assert_eq!(
        alice_swap.previous,
        SwapState::SwapInSender(SwapInSenderState::SendCancel)
    );
    assert!(alice_swap.data.opening_tx_id.is_none());
    assert_eq!(bob_swap.current(), SwapState::SwapCanceled);
    assert!(
        bob_swap
            .data
            .cancel_message
            .as_deref()
            .is_some_and(|m| m.contains("broadcast rejected"))
    );

    Ok(())
}
