//! Entry actions of the swap states.
//!
//! An action talks to the collaborators, records what it learned in the
//! swap data and returns the follow-up event. `Ok(None)` parks the machine
//! until an external event arrives.

use anyhow::{Context as _, Result};
use bitcoin::hashes::{Hash as _, hash160};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, rand};

use super::SwapData;
use super::services::SwapServices;
use super::state::EventType;
use super::store::RequestedSwap;
use crate::config::{MAX_AMOUNT_SAT, SwapServiceConfig};
use crate::lightning::invoice::{InvoiceLabel, new_preimage_hex, payment_hash_hex};
use crate::messages::{self, PeerMessage};

const DEFAULT_CANCEL_MESSAGE: &str = "swap canceled";
const DEFAULT_COOP_MESSAGE: &str = "cooperative close";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do; wait for the next external event.
    Await,
    SendSwapOutRequest,
    SendSwapInRequest,
    CheckSwapOutRequest,
    CheckSwapInRequest,
    PayFeeInvoice,
    BroadcastOpeningTx,
    SendTxBroadcastedMessage,
    AwaitTxConfirmation,
    AwaitCsv,
    PayClaimInvoice,
    ClaimSwapPreimage,
    SendCoopClose,
    ClaimSwapCoop,
    ClaimSwapCsv,
    SendCancel,
}

impl Action {
    /// Whether a failed run may be repeated in place.
    ///
    /// Payments and the broadcast move funds and are never re-entered.
    pub fn is_retryable(self) -> bool {
        match self {
            Action::SendSwapOutRequest
            | Action::SendSwapInRequest
            | Action::CheckSwapOutRequest
            | Action::CheckSwapInRequest
            | Action::SendTxBroadcastedMessage
            | Action::AwaitCsv
            | Action::ClaimSwapPreimage
            | Action::SendCoopClose
            | Action::ClaimSwapCoop
            | Action::ClaimSwapCsv
            | Action::SendCancel => true,
            Action::Await
            | Action::PayFeeInvoice
            | Action::BroadcastOpeningTx
            | Action::AwaitTxConfirmation
            | Action::PayClaimInvoice => false,
        }
    }

    pub async fn execute(
        self,
        services: &SwapServices,
        config: &SwapServiceConfig,
        data: &mut SwapData,
    ) -> Result<Option<EventType>> {
        match self {
            Action::Await => Ok(None),
            Action::SendSwapOutRequest => {
                let taker_pubkey_hash = ensure_keypair(data)?;
                data.taker_pubkey_hash = Some(taker_pubkey_hash.clone());
                let request = PeerMessage::SwapOutRequest(messages::SwapOutRequest {
                    swap_id: data.id.clone(),
                    protocol_version: config.protocol_version,
                    chain: data.chain,
                    channel_id: data.channel_id.clone(),
                    amount_sat: data.amount_sat,
                    taker_pubkey_hash,
                });
                send_to_peer(services, data, &request).await?;
                Ok(Some(EventType::ActionSucceeded))
            }
            Action::SendSwapInRequest => {
                let maker_pubkey_hash = ensure_keypair(data)?;
                data.maker_pubkey_hash = Some(maker_pubkey_hash.clone());
                let request = PeerMessage::SwapInRequest(messages::SwapInRequest {
                    swap_id: data.id.clone(),
                    protocol_version: config.protocol_version,
                    chain: data.chain,
                    channel_id: data.channel_id.clone(),
                    amount_sat: data.amount_sat,
                    maker_pubkey_hash,
                });
                send_to_peer(services, data, &request).await?;
                Ok(Some(EventType::ActionSucceeded))
            }
            Action::CheckSwapOutRequest => {
                if let Some(rejection) = check_request(services, data)? {
                    return Ok(Some(rejection));
                }
                let maker_pubkey_hash = ensure_keypair(data)?;
                data.maker_pubkey_hash = Some(maker_pubkey_hash.clone());

                ensure_opening_tx(services, data).await?;

                if data.fee_invoice.is_none() {
                    let preimage = data.fee_preimage.get_or_insert_with(new_preimage_hex).clone();
                    let invoice = services
                        .lightning
                        .create_invoice(
                            to_msat(data.opening_tx_fee)?,
                            &preimage,
                            &InvoiceLabel::Fee(data.id.clone()).to_string(),
                            config.invoice_expiry_secs,
                        )
                        .await
                        .context("create fee invoice")?;
                    data.fee_invoice = Some(invoice);
                }
                let fee_invoice = data.fee_invoice.clone().unwrap_or_default();

                let agreement = PeerMessage::SwapOutAgreement(messages::SwapOutAgreement {
                    swap_id: data.id.clone(),
                    maker_pubkey_hash,
                    fee_invoice,
                });
                send_to_peer(services, data, &agreement).await?;
                Ok(Some(EventType::ActionSucceeded))
            }
            Action::CheckSwapInRequest => {
                if let Some(rejection) = check_request(services, data)? {
                    return Ok(Some(rejection));
                }
                let taker_pubkey_hash = ensure_keypair(data)?;
                data.taker_pubkey_hash = Some(taker_pubkey_hash.clone());

                let agreement = PeerMessage::SwapInAgreement(messages::SwapInAgreement {
                    swap_id: data.id.clone(),
                    taker_pubkey_hash,
                });
                send_to_peer(services, data, &agreement).await?;
                Ok(Some(EventType::ActionSucceeded))
            }
            Action::PayFeeInvoice => {
                if data.fee_preimage.is_some() {
                    return Ok(Some(EventType::ActionSucceeded));
                }
                let invoice = data.fee_invoice.clone().context("swap has no fee invoice")?;
                let preimage = services
                    .lightning
                    .pay_invoice(&invoice)
                    .await
                    .context("pay fee invoice")?;
                data.fee_preimage = Some(preimage);
                Ok(Some(EventType::ActionSucceeded))
            }
            Action::BroadcastOpeningTx => {
                if data.claim_preimage.is_none() {
                    let preimage = new_preimage_hex();
                    data.claim_payment_hash = Some(payment_hash_hex(&preimage)?);
                    data.claim_preimage = Some(preimage);
                }
                ensure_opening_tx(services, data).await?;

                if data.claim_invoice.is_none() {
                    let preimage = data.claim_preimage.clone().unwrap_or_default();
                    let invoice = services
                        .lightning
                        .create_invoice(
                            to_msat(data.amount_sat)?,
                            &preimage,
                            &InvoiceLabel::Claim(data.id.clone()).to_string(),
                            config.invoice_expiry_secs,
                        )
                        .await
                        .context("create claim invoice")?;
                    data.claim_invoice = Some(invoice);
                }

                if data.opening_tx_id.is_none() {
                    let wallet = &services.chain(data.chain)?.wallet;
                    let tx = wallet
                        .broadcast_opening_tx(data)
                        .await
                        .context("broadcast opening tx")?;
                    tracing::info!(swap_id = %data.id, txid = %tx.txid, "opening tx broadcasted");
                    data.opening_tx_id = Some(tx.txid);
                    data.opening_tx_hex = Some(tx.hex);
                }
                Ok(Some(EventType::ActionSucceeded))
            }
            Action::SendTxBroadcastedMessage => {
                let message = PeerMessage::OpeningTxBroadcasted(messages::OpeningTxBroadcasted {
                    swap_id: data.id.clone(),
                    claim_invoice: data.claim_invoice.clone().context("swap has no claim invoice")?,
                    claim_payment_hash: data
                        .claim_payment_hash
                        .clone()
                        .context("swap has no claim payment hash")?,
                    tx_id: data.opening_tx_id.clone().context("swap has no opening tx")?,
                    tx_hex: data.opening_tx_hex.clone().unwrap_or_default(),
                    script_out: data.opening_tx_vout,
                });
                send_to_peer(services, data, &message).await?;
                Ok(Some(EventType::ActionSucceeded))
            }
            Action::AwaitTxConfirmation => {
                let backend = services.chain(data.chain)?;
                backend
                    .wallet
                    .validate_opening_tx(data)
                    .await
                    .context("validate opening tx")?;
                let txid = data.opening_tx_id.as_deref().context("swap has no opening tx")?;
                backend
                    .watcher
                    .add_confirmation_watch(&data.id, txid)
                    .context("watch opening tx confirmation")?;
                Ok(None)
            }
            Action::AwaitCsv => {
                let txid = data.opening_tx_id.as_deref().context("swap has no opening tx")?;
                services
                    .chain(data.chain)?
                    .watcher
                    .add_csv_watch(&data.id, txid)
                    .context("watch opening tx csv")?;
                Ok(None)
            }
            Action::PayClaimInvoice => {
                if data.claim_preimage.is_some() {
                    return Ok(Some(EventType::ActionSucceeded));
                }
                let invoice = data.claim_invoice.clone().context("swap has no claim invoice")?;
                let preimage = services
                    .lightning
                    .pay_invoice(&invoice)
                    .await
                    .context("pay claim invoice")?;
                if let Some(expected) = data.claim_payment_hash.as_deref() {
                    let got = payment_hash_hex(&preimage)?;
                    anyhow::ensure!(
                        got == expected,
                        "claim preimage does not match payment hash {expected}"
                    );
                }
                data.claim_preimage = Some(preimage);
                Ok(Some(EventType::ActionSucceeded))
            }
            Action::ClaimSwapPreimage => {
                let wallet = &services.chain(data.chain)?.wallet;
                let txid = wallet
                    .claim_with_preimage(data)
                    .await
                    .context("claim opening tx with preimage")?;
                tracing::info!(swap_id = %data.id, txid = %txid, "claimed with preimage");
                data.claim_tx_id = Some(txid);
                Ok(Some(EventType::ActionSucceeded))
            }
            Action::SendCoopClose => {
                anyhow::ensure!(!data.privkey_bytes.is_empty(), "swap has no private key");
                let message = PeerMessage::CoopClose(messages::CoopClose {
                    swap_id: data.id.clone(),
                    message: data
                        .cancel_message
                        .clone()
                        .or_else(|| data.last_err.clone())
                        .unwrap_or_else(|| DEFAULT_COOP_MESSAGE.to_string()),
                    privkey: hex::encode(&data.privkey_bytes),
                });
                send_to_peer(services, data, &message).await?;
                Ok(Some(EventType::ActionSucceeded))
            }
            Action::ClaimSwapCoop => {
                let wallet = &services.chain(data.chain)?.wallet;
                let txid = wallet
                    .claim_with_coop(data)
                    .await
                    .context("claim opening tx cooperatively")?;
                tracing::info!(swap_id = %data.id, txid = %txid, "claimed cooperatively");
                data.claim_tx_id = Some(txid);
                Ok(Some(EventType::ActionSucceeded))
            }
            Action::ClaimSwapCsv => {
                let wallet = &services.chain(data.chain)?.wallet;
                let txid = wallet
                    .claim_with_csv(data)
                    .await
                    .context("claim opening tx after csv")?;
                tracing::info!(swap_id = %data.id, txid = %txid, "claimed after csv");
                data.claim_tx_id = Some(txid);
                Ok(Some(EventType::ActionSucceeded))
            }
            Action::SendCancel => {
                let reason = data
                    .cancel_message
                    .clone()
                    .or_else(|| data.last_err.clone())
                    .unwrap_or_else(|| DEFAULT_CANCEL_MESSAGE.to_string());
                data.cancel_message = Some(reason.clone());
                let message = PeerMessage::Canceled(messages::Canceled {
                    swap_id: data.id.clone(),
                    message: reason,
                });
                send_to_peer(services, data, &message).await?;
                Ok(Some(EventType::ActionSucceeded))
            }
        }
    }
}

async fn send_to_peer(services: &SwapServices, data: &SwapData, message: &PeerMessage) -> Result<()> {
    messages::send(services.messenger.as_ref(), &data.peer_node_id, message)
        .await
        .with_context(|| format!("send {} to {}", message.message_type(), data.peer_node_id))
}

/// Validates an inbound request against the enabled chains and the policy.
///
/// A refusal is not an error worth retrying: it is recorded and turned
/// straight into `ActionFailed` so the swap cancels with a readable reason.
fn check_request(services: &SwapServices, data: &mut SwapData) -> Result<Option<EventType>> {
    if data.amount_sat == 0 || data.amount_sat > MAX_AMOUNT_SAT {
        data.last_err = Some(format!("invalid amount: {} sat", data.amount_sat));
        return Ok(Some(EventType::ActionFailed));
    }

    if let Err(err) = services.chain(data.chain) {
        data.last_err = Some(err.to_string());
        return Ok(Some(EventType::ActionFailed));
    }

    if !services
        .policy
        .accepts_swap(&data.peer_node_id, data.amount_sat)
    {
        services
            .requested_swaps
            .add(
                &data.peer_node_id,
                RequestedSwap {
                    chain: data.chain,
                    amount_sat: data.amount_sat,
                    swap_type: data.swap_type,
                },
            )
            .context("record requested swap")?;
        tracing::info!(
            swap_id = %data.id,
            peer_id = %data.peer_node_id,
            swap_type = %data.swap_type,
            amount_sat = data.amount_sat,
            "swap request rejected by policy"
        );
        data.last_err = Some(format!("peer {} is not allowed to swap", data.peer_node_id));
        return Ok(Some(EventType::ActionFailed));
    }

    Ok(None)
}

fn to_msat(amount_sat: u64) -> Result<u64> {
    amount_sat
        .checked_mul(1000)
        .with_context(|| format!("amount of {amount_sat} sat overflows msat"))
}

/// Builds the unsigned opening transaction once; its fee is what the
/// swap-out maker charges up front.
async fn ensure_opening_tx(services: &SwapServices, data: &mut SwapData) -> Result<()> {
    if data.opening_tx_unprepared_hex.is_some() {
        return Ok(());
    }
    let wallet = &services.chain(data.chain)?.wallet;
    let tx = wallet
        .create_opening_tx(data)
        .await
        .context("create opening tx")?;
    data.opening_tx_unprepared_hex = Some(tx.hex);
    data.opening_tx_fee = tx.fee_sat;
    data.opening_tx_vout = tx.vout;
    Ok(())
}

/// Generates the swap's ephemeral key on first use and returns the hex
/// hash160 of its compressed public key.
fn ensure_keypair(data: &mut SwapData) -> Result<String> {
    if data.privkey_bytes.is_empty() {
        let secret = SecretKey::new(&mut rand::thread_rng());
        data.privkey_bytes = secret.secret_bytes().to_vec();
    }
    let secret = SecretKey::from_slice(&data.privkey_bytes).context("decode swap private key")?;
    let pubkey = PublicKey::from_secret_key(&Secp256k1::new(), &secret);
    Ok(hex::encode(
        hash160::Hash::hash(&pubkey.serialize()).to_byte_array(),
    ))
}
