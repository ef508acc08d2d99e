//! Swap-in, initiating side: the maker. Moves on-chain funds into the
//! channel by locking them behind its own claim invoice.

use serde::{Deserialize, Serialize};

use super::actions::Action;
use super::state::{EventType, SwapState};

use self::SwapInSenderState as S;
use super::state::EventType as E;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapInSenderState {
    Init,
    SendRequest,
    AwaitAgreement,
    BroadcastOpeningTx,
    SendTxBroadcastedMessage,
    AwaitClaimInvoicePayment,
    ClaimSwapCoop,
    AwaitCsv,
    ClaimSwapCsv,
    AwaitClaimRetry,
    SendCancel,
}

impl SwapInSenderState {
    pub fn next(self, event: EventType) -> Option<SwapState> {
        let next = match (self, event) {
            (S::Init, E::Start) => S::SendRequest,

            (S::SendRequest, E::ActionSucceeded) => S::AwaitAgreement,
            (S::SendRequest, E::ActionFailed) => return Some(SwapState::SwapCanceled),

            (S::AwaitAgreement, E::SwapInAgreementReceived) => S::BroadcastOpeningTx,
            (S::AwaitAgreement, E::LocalCancel) => S::SendCancel,
            (S::AwaitAgreement, E::CancelReceived) => return Some(SwapState::SwapCanceled),

            (S::BroadcastOpeningTx, E::ActionSucceeded) => S::SendTxBroadcastedMessage,
            (S::BroadcastOpeningTx, E::ActionFailed) => S::SendCancel,

            (S::SendTxBroadcastedMessage, E::ActionSucceeded) => S::AwaitClaimInvoicePayment,
            (S::SendTxBroadcastedMessage, E::ActionFailed) => S::AwaitCsv,

            (S::AwaitClaimInvoicePayment, E::ClaimInvoicePaid) => {
                return Some(SwapState::ClaimedPreimage);
            }
            (S::AwaitClaimInvoicePayment, E::CoopCloseReceived) => S::ClaimSwapCoop,
            (S::AwaitClaimInvoicePayment, E::CsvPassed) => S::ClaimSwapCsv,
            (S::AwaitClaimInvoicePayment, E::CancelReceived) => S::AwaitCsv,

            (S::ClaimSwapCoop, E::ActionSucceeded) => return Some(SwapState::ClaimedCoop),
            (S::ClaimSwapCoop, E::ActionFailed) => S::AwaitCsv,

            (S::AwaitCsv, E::CsvPassed) => S::ClaimSwapCsv,
            (S::AwaitCsv, E::CoopCloseReceived) => S::ClaimSwapCoop,
            (S::AwaitCsv, E::ClaimInvoicePaid) => return Some(SwapState::ClaimedPreimage),

            (S::ClaimSwapCsv, E::ActionSucceeded) => return Some(SwapState::ClaimedCsv),
            (S::ClaimSwapCsv, E::ActionFailed) => S::AwaitClaimRetry,

            (S::AwaitClaimRetry, E::Resume) => S::ClaimSwapCsv,

            (S::SendCancel, E::ActionSucceeded | E::ActionFailed) => {
                return Some(SwapState::SwapCanceled);
            }

            (
                S::Init
                | S::SendRequest
                | S::AwaitAgreement
                | S::BroadcastOpeningTx
                | S::SendTxBroadcastedMessage
                | S::AwaitClaimInvoicePayment
                | S::ClaimSwapCoop
                | S::AwaitCsv
                | S::ClaimSwapCsv
                | S::AwaitClaimRetry
                | S::SendCancel,
                _,
            ) => return None,
        };
        Some(SwapState::SwapInSender(next))
    }

    pub fn action(self) -> Action {
        match self {
            S::Init | S::AwaitAgreement | S::AwaitClaimRetry => Action::Await,
            S::SendRequest => Action::SendSwapInRequest,
            S::BroadcastOpeningTx => Action::BroadcastOpeningTx,
            S::SendTxBroadcastedMessage => Action::SendTxBroadcastedMessage,
            S::AwaitClaimInvoicePayment | S::AwaitCsv => Action::AwaitCsv,
            S::ClaimSwapCoop => Action::ClaimSwapCoop,
            S::ClaimSwapCsv => Action::ClaimSwapCsv,
            S::SendCancel => Action::SendCancel,
        }
    }
}
