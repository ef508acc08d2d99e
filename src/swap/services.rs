use std::sync::Arc;

use crate::chain::{Chain, ChainBackend};
use crate::error::SwapError;
use crate::lightning::LightningClient;
use crate::messages::Messenger;
use crate::policy::Policy;

use super::store::{RequestedSwapsStore, SwapStore};

/// Collaborators shared by every swap of a node. Passed into each
/// `send_event` call instead of being owned by the machines.
#[derive(Clone)]
pub struct SwapServices {
    pub store: Arc<dyn SwapStore>,
    pub requested_swaps: Arc<dyn RequestedSwapsStore>,
    pub lightning: Arc<dyn LightningClient>,
    pub messenger: Arc<dyn Messenger>,
    pub policy: Arc<dyn Policy>,
    pub bitcoin: Option<ChainBackend>,
    pub liquid: Option<ChainBackend>,
}

impl SwapServices {
    pub fn new(
        store: Arc<dyn SwapStore>,
        requested_swaps: Arc<dyn RequestedSwapsStore>,
        lightning: Arc<dyn LightningClient>,
        messenger: Arc<dyn Messenger>,
        policy: Arc<dyn Policy>,
    ) -> Self {
        Self {
            store,
            requested_swaps,
            lightning,
            messenger,
            policy,
            bitcoin: None,
            liquid: None,
        }
    }

    pub fn with_bitcoin(mut self, backend: ChainBackend) -> Self {
        self.bitcoin = Some(backend);
        self
    }

    pub fn with_liquid(mut self, backend: ChainBackend) -> Self {
        self.liquid = Some(backend);
        self
    }

    pub fn chain(&self, chain: Chain) -> Result<&ChainBackend, SwapError> {
        let backend = match chain {
            Chain::Bitcoin => self.bitcoin.as_ref(),
            Chain::Liquid => self.liquid.as_ref(),
        };
        backend.ok_or(SwapError::ChainNotEnabled(chain))
    }

    pub fn enabled_chains(&self) -> Vec<Chain> {
        [Chain::Bitcoin, Chain::Liquid]
            .into_iter()
            .filter(|chain| self.chain(*chain).is_ok())
            .collect()
    }

    pub(crate) fn backends(&self) -> impl Iterator<Item = &ChainBackend> {
        self.bitcoin.iter().chain(self.liquid.iter())
    }
}
