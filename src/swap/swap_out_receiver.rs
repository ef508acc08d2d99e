//! Swap-out, answering side: the maker. Charges the fee for the opening
//! transaction up front, then locks funds on chain behind the claim
//! invoice's payment hash.

use serde::{Deserialize, Serialize};

use super::actions::Action;
use super::state::{EventType, SwapState};

use self::SwapOutReceiverState as S;
use super::state::EventType as E;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapOutReceiverState {
    Init,
    CheckRequestAndSendAgreement,
    AwaitFeeInvoicePayment,
    BroadcastOpeningTx,
    SendTxBroadcastedMessage,
    AwaitClaimInvoicePayment,
    ClaimSwapCoop,
    AwaitCsv,
    ClaimSwapCsv,
    AwaitClaimRetry,
    SendCancel,
}

impl SwapOutReceiverState {
    pub fn next(self, event: EventType) -> Option<SwapState> {
        let next = match (self, event) {
            (S::Init, E::SwapOutRequestReceived) => S::CheckRequestAndSendAgreement,

            (S::CheckRequestAndSendAgreement, E::ActionSucceeded) => S::AwaitFeeInvoicePayment,
            (S::CheckRequestAndSendAgreement, E::ActionFailed) => S::SendCancel,

            (S::AwaitFeeInvoicePayment, E::FeeInvoicePaid) => S::BroadcastOpeningTx,
            (S::AwaitFeeInvoicePayment, E::LocalCancel) => S::SendCancel,
            (S::AwaitFeeInvoicePayment, E::CancelReceived) => {
                return Some(SwapState::SwapCanceled);
            }

            (S::BroadcastOpeningTx, E::ActionSucceeded) => S::SendTxBroadcastedMessage,
            (S::BroadcastOpeningTx, E::ActionFailed) => S::SendCancel,

            // Funds are on chain from here on: every failure ends in a reclaim.
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
                | S::CheckRequestAndSendAgreement
                | S::AwaitFeeInvoicePayment
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
        Some(SwapState::SwapOutReceiver(next))
    }

    pub fn action(self) -> Action {
        match self {
            S::Init | S::AwaitFeeInvoicePayment | S::AwaitClaimRetry => Action::Await,
            S::CheckRequestAndSendAgreement => Action::CheckSwapOutRequest,
            S::BroadcastOpeningTx => Action::BroadcastOpeningTx,
            S::SendTxBroadcastedMessage => Action::SendTxBroadcastedMessage,
            S::AwaitClaimInvoicePayment | S::AwaitCsv => Action::AwaitCsv,
            S::ClaimSwapCoop => Action::ClaimSwapCoop,
            S::ClaimSwapCsv => Action::ClaimSwapCsv,
            S::SendCancel => Action::SendCancel,
        }
    }
}
