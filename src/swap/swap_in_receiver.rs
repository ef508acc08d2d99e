//! Swap-in, answering side: the taker. Pays the claim invoice over the
//! channel once the opening transaction is confirmed.

use serde::{Deserialize, Serialize};

use super::actions::Action;
use super::state::{EventType, SwapState};

use self::SwapInReceiverState as S;
use super::state::EventType as E;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapInReceiverState {
    Init,
    CheckRequestAndSendAgreement,
    AwaitTxBroadcastedMessage,
    AwaitTxConfirmation,
    PayClaimInvoice,
    ClaimSwapPreimage,
    AwaitClaimRetry,
    SendCoopClose,
    SendCancel,
}

impl SwapInReceiverState {
    pub fn next(self, event: EventType) -> Option<SwapState> {
        let next = match (self, event) {
            (S::Init, E::SwapInRequestReceived) => S::CheckRequestAndSendAgreement,

            (S::CheckRequestAndSendAgreement, E::ActionSucceeded) => S::AwaitTxBroadcastedMessage,
            (S::CheckRequestAndSendAgreement, E::ActionFailed) => S::SendCancel,

            (S::AwaitTxBroadcastedMessage, E::TxBroadcastedMessage) => S::AwaitTxConfirmation,
            (S::AwaitTxBroadcastedMessage, E::LocalCancel) => S::SendCancel,
            (S::AwaitTxBroadcastedMessage, E::CancelReceived) => {
                return Some(SwapState::SwapCanceled);
            }

            (S::AwaitTxConfirmation, E::TxConfirmed) => S::PayClaimInvoice,
            (S::AwaitTxConfirmation, E::ActionFailed) => S::SendCancel,
            (S::AwaitTxConfirmation, E::LocalCancel) => S::SendCoopClose,
            (S::AwaitTxConfirmation, E::CancelReceived) => return Some(SwapState::SwapCanceled),

            (S::PayClaimInvoice, E::ActionSucceeded) => S::ClaimSwapPreimage,
            (S::PayClaimInvoice, E::ActionFailed) => S::SendCoopClose,

            (S::ClaimSwapPreimage, E::ActionSucceeded) => return Some(SwapState::ClaimedPreimage),
            (S::ClaimSwapPreimage, E::ActionFailed) => S::AwaitClaimRetry,

            (S::AwaitClaimRetry, E::Resume) => S::ClaimSwapPreimage,

            (S::SendCoopClose, E::ActionSucceeded) => return Some(SwapState::ClaimedCoop),
            (S::SendCoopClose, E::ActionFailed) => return Some(SwapState::SwapCanceled),

            (S::SendCancel, E::ActionSucceeded | E::ActionFailed) => {
                return Some(SwapState::SwapCanceled);
            }

            (
                S::Init
                | S::CheckRequestAndSendAgreement
                | S::AwaitTxBroadcastedMessage
                | S::AwaitTxConfirmation
                | S::PayClaimInvoice
                | S::ClaimSwapPreimage
                | S::AwaitClaimRetry
                | S::SendCoopClose
                | S::SendCancel,
                _,
            ) => return None,
        };
        Some(SwapState::SwapInReceiver(next))
    }

    pub fn action(self) -> Action {
        match self {
            S::Init | S::AwaitTxBroadcastedMessage | S::AwaitClaimRetry => Action::Await,
            S::CheckRequestAndSendAgreement => Action::CheckSwapInRequest,
            S::AwaitTxConfirmation => Action::AwaitTxConfirmation,
            S::PayClaimInvoice => Action::PayClaimInvoice,
            S::ClaimSwapPreimage => Action::ClaimSwapPreimage,
            S::SendCoopClose => Action::SendCoopClose,
            S::SendCancel => Action::SendCancel,
        }
    }
}
