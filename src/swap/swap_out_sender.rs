//! Swap-out, initiating side: pays the fee, waits for the maker's opening
//! transaction, then buys the preimage with the claim invoice.

use serde::{Deserialize, Serialize};

use super::actions::Action;
use super::state::{EventType, SwapState};

use self::SwapOutSenderState as S;
use super::state::EventType as E;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapOutSenderState {
    Init,
    SendRequest,
    AwaitAgreement,
    PayFeeInvoice,
    AwaitTxBroadcastedMessage,
    AwaitTxConfirmation,
    PayClaimInvoice,
    ClaimSwapPreimage,
    AwaitClaimRetry,
    SendCoopClose,
    SendCancel,
}

impl SwapOutSenderState {
    pub fn next(self, event: EventType) -> Option<SwapState> {
        let next = match (self, event) {
            (S::Init, E::Start) => S::SendRequest,

            (S::SendRequest, E::ActionSucceeded) => S::AwaitAgreement,
            (S::SendRequest, E::ActionFailed) => return Some(SwapState::SwapCanceled),

            (S::AwaitAgreement, E::SwapOutAgreementReceived) => S::PayFeeInvoice,
            (S::AwaitAgreement, E::LocalCancel) => S::SendCancel,
            (S::AwaitAgreement, E::CancelReceived) => return Some(SwapState::SwapCanceled),

            (S::PayFeeInvoice, E::ActionSucceeded) => S::AwaitTxBroadcastedMessage,
            (S::PayFeeInvoice, E::ActionFailed) => S::SendCancel,

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
                | S::SendRequest
                | S::AwaitAgreement
                | S::PayFeeInvoice
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
        Some(SwapState::SwapOutSender(next))
    }

    pub fn action(self) -> Action {
        match self {
            S::Init | S::AwaitAgreement | S::AwaitTxBroadcastedMessage | S::AwaitClaimRetry => {
                Action::Await
            }
            S::SendRequest => Action::SendSwapOutRequest,
            S::PayFeeInvoice => Action::PayFeeInvoice,
            S::AwaitTxConfirmation => Action::AwaitTxConfirmation,
            S::PayClaimInvoice => Action::PayClaimInvoice,
            S::ClaimSwapPreimage => Action::ClaimSwapPreimage,
            S::SendCoopClose => Action::SendCoopClose,
            S::SendCancel => Action::SendCancel,
        }
    }
}
