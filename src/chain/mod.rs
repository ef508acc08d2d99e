//! On-chain capabilities, one backend per supported chain.
//!
//! Script and transaction construction live behind [`OnchainWallet`]; the
//! engine only stores the artifacts it hands back.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SwapError;
use crate::swap::SwapData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    #[serde(rename = "btc")]
    Bitcoin,
    #[serde(rename = "l-btc")]
    Liquid,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Bitcoin => "btc",
            Chain::Liquid => "l-btc",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "btc" => Ok(Chain::Bitcoin),
            "l-btc" | "lbtc" => Ok(Chain::Liquid),
            other => anyhow::bail!("unknown chain: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpreparedOpeningTx {
    pub hex: String,
    pub fee_sat: u64,
    pub vout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastedTx {
    pub txid: String,
    pub hex: String,
}

#[async_trait]
pub trait OnchainWallet: Send + Sync {
    /// Builds (but does not broadcast) the opening transaction for `swap`.
    async fn create_opening_tx(&self, swap: &SwapData) -> Result<UnpreparedOpeningTx>;

    /// Signs and broadcasts the transaction built by `create_opening_tx`.
    async fn broadcast_opening_tx(&self, swap: &SwapData) -> Result<BroadcastedTx>;

    /// Checks that the counterparty's opening transaction pays the agreed
    /// script and amount.
    async fn validate_opening_tx(&self, swap: &SwapData) -> Result<()>;

    async fn claim_with_preimage(&self, swap: &SwapData) -> Result<String>;

    async fn claim_with_csv(&self, swap: &SwapData) -> Result<String>;

    async fn claim_with_coop(&self, swap: &SwapData) -> Result<String>;
}

pub trait ChainWatcher: Send + Sync {
    fn add_confirmation_watch(&self, swap_id: &str, txid: &str) -> Result<()>;

    fn add_csv_watch(&self, swap_id: &str, txid: &str) -> Result<()>;

    fn set_event_handler(&self, handler: Arc<dyn ChainEventHandler>);
}

#[async_trait]
pub trait ChainEventHandler: Send + Sync {
    async fn on_tx_confirmed(&self, swap_id: &str) -> Result<(), SwapError>;

    async fn on_csv_passed(&self, swap_id: &str) -> Result<(), SwapError>;
}

#[derive(Clone)]
pub struct ChainBackend {
    pub wallet: Arc<dyn OnchainWallet>,
    pub watcher: Arc<dyn ChainWatcher>,
}

impl ChainBackend {
    pub fn new(wallet: Arc<dyn OnchainWallet>, watcher: Arc<dyn ChainWatcher>) -> Self {
        Self { wallet, watcher }
    }
}
