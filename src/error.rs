//! Errors returned by the swap engine.
//!
//! Collaborators report failures as `anyhow::Error`; inside a running swap
//! those become `ActionFailed` events and never surface here. What does
//! surface is either a rejection (nothing was created), a protocol problem
//! with an inbound message (logged and dropped), or a store failure.

use thiserror::Error;

use crate::chain::Chain;
use crate::swap::state::{EventType, SwapState};

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("already has an active swap on channel")]
    ActiveSwapOnChannel,

    #[error("swap already exists: {0}")]
    SwapAlreadyExists(String),

    #[error("swap not found: {0}")]
    SwapNotFound(String),

    #[error("peer {0} is not allowed to swap")]
    PeerNotAllowed(String),

    #[error("chain {0} is not enabled")]
    ChainNotEnabled(Chain),

    #[error("no chain backend enabled")]
    NoChainEnabled,

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("swap {swap_id}: unexpected event {event} in state {state}")]
    UnexpectedEvent {
        swap_id: String,
        state: SwapState,
        event: EventType,
    },

    #[error("swap {swap_id}: message from {got}, expected peer {expected}")]
    PeerMismatch {
        swap_id: String,
        expected: String,
        got: String,
    },

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    #[error("protocol version mismatch: ours {ours}, theirs {theirs}")]
    ProtocolVersionMismatch { ours: u64, theirs: u64 },

    #[error("unknown invoice label: {0}")]
    UnknownInvoiceLabel(String),

    #[error("messenger: {0:#}")]
    Messenger(anyhow::Error),

    #[error("swap store: {0:#}")]
    Store(anyhow::Error),
}
