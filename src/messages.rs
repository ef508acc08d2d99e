//! Peer protocol messages and the transport seam.
//!
//! Bodies are JSON; the message type travels next to the body as a numeric
//! id (and as lowercase hex on the receiving side, the way custom Lightning
//! messages are surfaced by node plugins).

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::error::SwapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    SwapInRequest = 0xa455,
    SwapOutRequest = 0xa457,
    SwapInAgreement = 0xa459,
    SwapOutAgreement = 0xa45b,
    OpeningTxBroadcasted = 0xa45d,
    Canceled = 0xa45f,
    CoopClose = 0xa461,
    Poll = 0xa463,
    RequestPoll = 0xa465,
}

impl MessageType {
    const ALL: [MessageType; 9] = [
        MessageType::SwapInRequest,
        MessageType::SwapOutRequest,
        MessageType::SwapInAgreement,
        MessageType::SwapOutAgreement,
        MessageType::OpeningTxBroadcasted,
        MessageType::Canceled,
        MessageType::CoopClose,
        MessageType::Poll,
        MessageType::RequestPoll,
    ];

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_u16() == value)
    }

    pub fn to_hex(self) -> String {
        format!("{:04x}", self.as_u16())
    }

    pub fn from_hex(s: &str) -> Result<Self, SwapError> {
        u16::from_str_radix(s.trim_start_matches("0x"), 16)
            .ok()
            .and_then(Self::from_u16)
            .ok_or_else(|| SwapError::UnknownMessageType(s.to_string()))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::SwapInRequest => "swap_in_request",
            MessageType::SwapOutRequest => "swap_out_request",
            MessageType::SwapInAgreement => "swap_in_agreement",
            MessageType::SwapOutAgreement => "swap_out_agreement",
            MessageType::OpeningTxBroadcasted => "opening_tx_broadcasted",
            MessageType::Canceled => "canceled",
            MessageType::CoopClose => "coop_close",
            MessageType::Poll => "poll",
            MessageType::RequestPoll => "request_poll",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOutRequest {
    pub swap_id: String,
    pub protocol_version: u64,
    pub chain: Chain,
    pub channel_id: String,
    pub amount_sat: u64,
    pub taker_pubkey_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOutAgreement {
    pub swap_id: String,
    pub maker_pubkey_hash: String,
    pub fee_invoice: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapInRequest {
    pub swap_id: String,
    pub protocol_version: u64,
    pub chain: Chain,
    pub channel_id: String,
    pub amount_sat: u64,
    pub maker_pubkey_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapInAgreement {
    pub swap_id: String,
    pub taker_pubkey_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningTxBroadcasted {
    pub swap_id: String,
    pub claim_invoice: String,
    pub claim_payment_hash: String,
    pub tx_id: String,
    pub tx_hex: String,
    pub script_out: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canceled {
    pub swap_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoopClose {
    pub swap_id: String,
    pub message: String,
    /// The taker's ephemeral key, letting the maker spend the opening
    /// output without the preimage.
    pub privkey: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub version: u64,
    pub assets: Vec<Chain>,
    pub peer_allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    SwapOutRequest(SwapOutRequest),
    SwapOutAgreement(SwapOutAgreement),
    SwapInRequest(SwapInRequest),
    SwapInAgreement(SwapInAgreement),
    OpeningTxBroadcasted(OpeningTxBroadcasted),
    Canceled(Canceled),
    CoopClose(CoopClose),
    Poll(Poll),
    RequestPoll(Poll),
}

impl PeerMessage {
    pub fn decode(msg_type: MessageType, payload: &[u8]) -> Result<Self, SwapError> {
        Ok(match msg_type {
            MessageType::SwapOutRequest => Self::SwapOutRequest(serde_json::from_slice(payload)?),
            MessageType::SwapOutAgreement => {
                Self::SwapOutAgreement(serde_json::from_slice(payload)?)
            }
            MessageType::SwapInRequest => Self::SwapInRequest(serde_json::from_slice(payload)?),
            MessageType::SwapInAgreement => Self::SwapInAgreement(serde_json::from_slice(payload)?),
            MessageType::OpeningTxBroadcasted => {
                Self::OpeningTxBroadcasted(serde_json::from_slice(payload)?)
            }
            MessageType::Canceled => Self::Canceled(serde_json::from_slice(payload)?),
            MessageType::CoopClose => Self::CoopClose(serde_json::from_slice(payload)?),
            MessageType::Poll => Self::Poll(serde_json::from_slice(payload)?),
            MessageType::RequestPoll => Self::RequestPoll(serde_json::from_slice(payload)?),
        })
    }

    pub fn encode(&self) -> Result<(MessageType, Vec<u8>), SwapError> {
        let payload = match self {
            Self::SwapOutRequest(m) => serde_json::to_vec(m)?,
            Self::SwapOutAgreement(m) => serde_json::to_vec(m)?,
            Self::SwapInRequest(m) => serde_json::to_vec(m)?,
            Self::SwapInAgreement(m) => serde_json::to_vec(m)?,
            Self::OpeningTxBroadcasted(m) => serde_json::to_vec(m)?,
            Self::Canceled(m) => serde_json::to_vec(m)?,
            Self::CoopClose(m) => serde_json::to_vec(m)?,
            Self::Poll(m) | Self::RequestPoll(m) => serde_json::to_vec(m)?,
        };
        Ok((self.message_type(), payload))
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::SwapOutRequest(_) => MessageType::SwapOutRequest,
            Self::SwapOutAgreement(_) => MessageType::SwapOutAgreement,
            Self::SwapInRequest(_) => MessageType::SwapInRequest,
            Self::SwapInAgreement(_) => MessageType::SwapInAgreement,
            Self::OpeningTxBroadcasted(_) => MessageType::OpeningTxBroadcasted,
            Self::Canceled(_) => MessageType::Canceled,
            Self::CoopClose(_) => MessageType::CoopClose,
            Self::Poll(_) => MessageType::Poll,
            Self::RequestPoll(_) => MessageType::RequestPoll,
        }
    }

    /// Swap the message belongs to; `None` for the swap-independent polls.
    pub fn swap_id(&self) -> Option<&str> {
        match self {
            Self::SwapOutRequest(m) => Some(&m.swap_id),
            Self::SwapOutAgreement(m) => Some(&m.swap_id),
            Self::SwapInRequest(m) => Some(&m.swap_id),
            Self::SwapInAgreement(m) => Some(&m.swap_id),
            Self::OpeningTxBroadcasted(m) => Some(&m.swap_id),
            Self::Canceled(m) => Some(&m.swap_id),
            Self::CoopClose(m) => Some(&m.swap_id),
            Self::Poll(_) | Self::RequestPoll(_) => None,
        }
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, peer_id: &str, payload: Vec<u8>, msg_type: u16) -> Result<()>;

    fn add_message_handler(&self, handler: Arc<dyn MessageHandler>);
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(
        &self,
        peer_id: &str,
        msg_type: &str,
        payload: &[u8],
    ) -> Result<(), SwapError>;
}

/// Encodes `message` and hands it to the transport.
pub async fn send(messenger: &dyn Messenger, peer_id: &str, message: &PeerMessage) -> Result<()> {
    let (msg_type, payload) = message.encode()?;
    tracing::debug!(peer_id, msg_type = %msg_type, "sending peer message");
    messenger
        .send_message(peer_id, payload, msg_type.as_u16())
        .await
}
