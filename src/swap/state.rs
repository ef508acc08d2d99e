//! States and events of the swap state machine.
//!
//! Each (swap type, role) pair owns its own state enum; the four terminal
//! outcomes are shared. Transitions are exhaustive matches in the role
//! modules, so a machine can only ever move inside its own graph.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::actions::Action;
use super::swap_in_receiver::SwapInReceiverState;
use super::swap_in_sender::SwapInSenderState;
use super::swap_out_receiver::SwapOutReceiverState;
use super::swap_out_sender::SwapOutSenderState;
use super::{SwapRole, SwapType};
use crate::messages::PeerMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    SwapOutSender(SwapOutSenderState),
    SwapOutReceiver(SwapOutReceiverState),
    SwapInSender(SwapInSenderState),
    SwapInReceiver(SwapInReceiverState),
    ClaimedPreimage,
    ClaimedCoop,
    ClaimedCsv,
    SwapCanceled,
}

impl SwapState {
    pub fn initial(swap_type: SwapType, role: SwapRole) -> Self {
        match (swap_type, role) {
            (SwapType::SwapOut, SwapRole::Sender) => {
                SwapState::SwapOutSender(SwapOutSenderState::Init)
            }
            (SwapType::SwapOut, SwapRole::Receiver) => {
                SwapState::SwapOutReceiver(SwapOutReceiverState::Init)
            }
            (SwapType::SwapIn, SwapRole::Sender) => SwapState::SwapInSender(SwapInSenderState::Init),
            (SwapType::SwapIn, SwapRole::Receiver) => {
                SwapState::SwapInReceiver(SwapInReceiverState::Init)
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapState::ClaimedPreimage
                | SwapState::ClaimedCoop
                | SwapState::ClaimedCsv
                | SwapState::SwapCanceled
        )
    }

    /// Next state for `event`, or `None` if this state does not consume it.
    pub fn next(&self, event: EventType) -> Option<SwapState> {
        match self {
            SwapState::SwapOutSender(s) => s.next(event),
            SwapState::SwapOutReceiver(s) => s.next(event),
            SwapState::SwapInSender(s) => s.next(event),
            SwapState::SwapInReceiver(s) => s.next(event),
            SwapState::ClaimedPreimage
            | SwapState::ClaimedCoop
            | SwapState::ClaimedCsv
            | SwapState::SwapCanceled => None,
        }
    }

    pub fn accepts(&self, event: EventType) -> bool {
        self.next(event).is_some()
    }

    /// Entry action run every time the machine lands in this state.
    pub fn action(&self) -> Action {
        match self {
            SwapState::SwapOutSender(s) => s.action(),
            SwapState::SwapOutReceiver(s) => s.action(),
            SwapState::SwapInSender(s) => s.action(),
            SwapState::SwapInReceiver(s) => s.action(),
            SwapState::ClaimedPreimage
            | SwapState::ClaimedCoop
            | SwapState::ClaimedCsv
            | SwapState::SwapCanceled => Action::Await,
        }
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapState::SwapOutSender(s) => write!(f, "SwapOutSender::{s:?}"),
            SwapState::SwapOutReceiver(s) => write!(f, "SwapOutReceiver::{s:?}"),
            SwapState::SwapInSender(s) => write!(f, "SwapInSender::{s:?}"),
            SwapState::SwapInReceiver(s) => write!(f, "SwapInReceiver::{s:?}"),
            SwapState::ClaimedPreimage => write!(f, "ClaimedPreimage"),
            SwapState::ClaimedCoop => write!(f, "ClaimedCoop"),
            SwapState::ClaimedCsv => write!(f, "ClaimedCsv"),
            SwapState::SwapCanceled => write!(f, "SwapCanceled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Start,
    SwapOutRequestReceived,
    SwapOutAgreementReceived,
    SwapInRequestReceived,
    SwapInAgreementReceived,
    TxBroadcastedMessage,
    CoopCloseReceived,
    CancelReceived,
    FeeInvoicePaid,
    ClaimInvoicePaid,
    TxConfirmed,
    CsvPassed,
    ActionSucceeded,
    ActionFailed,
    LocalCancel,
    Resume,
}

impl EventType {
    /// Event a peer message turns into; polls are not swap events.
    pub fn from_message(message: &PeerMessage) -> Option<Self> {
        match message {
            PeerMessage::SwapOutRequest(_) => Some(EventType::SwapOutRequestReceived),
            PeerMessage::SwapOutAgreement(_) => Some(EventType::SwapOutAgreementReceived),
            PeerMessage::SwapInRequest(_) => Some(EventType::SwapInRequestReceived),
            PeerMessage::SwapInAgreement(_) => Some(EventType::SwapInAgreementReceived),
            PeerMessage::OpeningTxBroadcasted(_) => Some(EventType::TxBroadcastedMessage),
            PeerMessage::Canceled(_) => Some(EventType::CancelReceived),
            PeerMessage::CoopClose(_) => Some(EventType::CoopCloseReceived),
            PeerMessage::Poll(_) | PeerMessage::RequestPoll(_) => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Data delivered alongside an event, merged into the swap record once the
/// event is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Message(PeerMessage),
    CancelReason(String),
}
