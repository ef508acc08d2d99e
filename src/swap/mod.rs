pub mod actions;
pub mod fsm;
pub mod poll;
pub mod service;
pub mod services;
pub mod state;
pub mod store;
pub mod swap_in_receiver;
pub mod swap_in_sender;
pub mod swap_out_receiver;
pub mod swap_out_sender;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::messages::PeerMessage;
use state::{EventPayload, SwapState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapType {
    SwapOut,
    SwapIn,
}

impl fmt::Display for SwapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapType::SwapOut => write!(f, "swap_out"),
            SwapType::SwapIn => write!(f, "swap_in"),
        }
    }
}

/// Sender initiated the swap; receiver answered its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapRole {
    Sender,
    Receiver,
}

impl fmt::Display for SwapRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapRole::Sender => write!(f, "sender"),
            SwapRole::Receiver => write!(f, "receiver"),
        }
    }
}

/// Negotiated parameters and protocol artifacts of one swap.
///
/// The maker builds the opening transaction (swap-out receiver, swap-in
/// sender); the taker claims it with the preimage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapData {
    pub id: String,
    pub swap_type: SwapType,
    pub role: SwapRole,
    pub chain: Chain,
    pub fsm_state: SwapState,
    pub created_at: u64,

    pub initiator_node_id: String,
    pub peer_node_id: String,
    pub channel_id: String,
    pub amount_sat: u64,

    pub privkey_bytes: Vec<u8>,
    pub maker_pubkey_hash: Option<String>,
    pub taker_pubkey_hash: Option<String>,
    pub counterparty_privkey: Option<String>,

    pub claim_preimage: Option<String>,
    pub claim_payment_hash: Option<String>,
    pub claim_invoice: Option<String>,
    pub fee_invoice: Option<String>,
    pub fee_preimage: Option<String>,

    pub opening_tx_id: Option<String>,
    pub opening_tx_hex: Option<String>,
    pub opening_tx_unprepared_hex: Option<String>,
    pub opening_tx_vout: u32,
    pub opening_tx_fee: u64,
    pub claim_tx_id: Option<String>,

    pub cancel_message: Option<String>,
    pub last_err: Option<String>,
}

impl SwapData {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        swap_type: SwapType,
        role: SwapRole,
        chain: Chain,
        channel_id: &str,
        initiator_node_id: &str,
        peer_node_id: &str,
        amount_sat: u64,
    ) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            id,
            swap_type,
            role,
            chain,
            fsm_state: SwapState::initial(swap_type, role),
            created_at,
            initiator_node_id: initiator_node_id.to_string(),
            peer_node_id: peer_node_id.to_string(),
            channel_id: channel_id.to_string(),
            amount_sat,
            privkey_bytes: Vec::new(),
            maker_pubkey_hash: None,
            taker_pubkey_hash: None,
            counterparty_privkey: None,
            claim_preimage: None,
            claim_payment_hash: None,
            claim_invoice: None,
            fee_invoice: None,
            fee_preimage: None,
            opening_tx_id: None,
            opening_tx_hex: None,
            opening_tx_unprepared_hex: None,
            opening_tx_vout: 0,
            opening_tx_fee: 0,
            claim_tx_id: None,
            cancel_message: None,
            last_err: None,
        }
    }

    pub fn is_maker(&self) -> bool {
        matches!(
            (self.swap_type, self.role),
            (SwapType::SwapOut, SwapRole::Receiver) | (SwapType::SwapIn, SwapRole::Sender)
        )
    }

    /// Whether this side has value at stake that only an on-chain claim
    /// recovers: the maker once its opening tx is out, the taker once it
    /// paid the claim invoice.
    pub fn funds_committed(&self) -> bool {
        if self.is_maker() {
            self.opening_tx_id.is_some()
        } else {
            self.claim_preimage.is_some()
        }
    }

    /// Copies the fields carried by an accepted event into the record.
    pub(crate) fn apply(&mut self, payload: EventPayload) {
        match payload {
            EventPayload::CancelReason(reason) => self.cancel_message = Some(reason),
            EventPayload::Message(message) => match message {
                PeerMessage::SwapOutAgreement(m) => {
                    self.maker_pubkey_hash = Some(m.maker_pubkey_hash);
                    self.fee_invoice = Some(m.fee_invoice);
                }
                PeerMessage::SwapInAgreement(m) => {
                    self.taker_pubkey_hash = Some(m.taker_pubkey_hash);
                }
                PeerMessage::OpeningTxBroadcasted(m) => {
                    self.claim_invoice = Some(m.claim_invoice);
                    self.claim_payment_hash = Some(m.claim_payment_hash);
                    self.opening_tx_id = Some(m.tx_id);
                    self.opening_tx_hex = Some(m.tx_hex);
                    self.opening_tx_vout = m.script_out;
                }
                PeerMessage::Canceled(m) => self.cancel_message = Some(m.message),
                PeerMessage::CoopClose(m) => {
                    self.counterparty_privkey = Some(m.privkey);
                    self.cancel_message = Some(m.message);
                }
                PeerMessage::SwapOutRequest(_)
                | PeerMessage::SwapInRequest(_)
                | PeerMessage::Poll(_)
                | PeerMessage::RequestPoll(_) => {}
            },
        }
    }
}
