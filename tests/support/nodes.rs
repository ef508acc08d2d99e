use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};

use peerswap::fake::{FakeNetwork, FakeNode};
use peerswap::policy::StaticPolicy;
use peerswap::swap::fsm::SwapStateMachine;
use peerswap::swap::service::{ActiveSwap, SwapService};
use peerswap::swap::state::SwapState;
use peerswap::swap::store::SqliteSwapStore;
use peerswap::{SwapError, SwapServiceConfig};

use super::wait::wait_for;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Pair {
    pub network: FakeNetwork,
    pub alice: FakeNode,
    pub bob: FakeNode,
}

pub fn test_config() -> SwapServiceConfig {
    SwapServiceConfig {
        action_timeout: Duration::from_secs(5),
        ..SwapServiceConfig::default()
    }
}

/// Two connected, started nodes sharing one fake network.
pub async fn started_pair(config: SwapServiceConfig) -> Result<Pair> {
    let _ = peerswap::logging::init();

    let network = FakeNetwork::new();
    let alice = FakeNode::new("alice", &network, config.clone());
    let bob = FakeNode::new("bob", &network, config);
    alice.connect(&bob);
    alice.service.start().await.context("start alice")?;
    bob.service.start().await.context("start bob")?;

    Ok(Pair {
        network,
        alice,
        bob,
    })
}

/// Unstarted node keeping its swaps in the SQLite file at `path`.
pub fn sqlite_node(
    node_id: &str,
    network: &FakeNetwork,
    config: SwapServiceConfig,
    path: &Path,
) -> Result<FakeNode> {
    let store = Arc::new(
        SqliteSwapStore::open(path.to_path_buf())
            .with_context(|| format!("open {node_id} store"))?,
    );
    Ok(FakeNode::with_parts(
        node_id,
        network,
        config,
        store.clone(),
        store,
        Arc::new(StaticPolicy::accept_all()),
    ))
}

pub async fn swap_id(swap: &ActiveSwap) -> String {
    swap.lock().await.id.clone()
}

/// Persisted swap of `node`, or `None` while the node has not heard of it.
pub fn stored_swap(node: &FakeNode, swap_id: &str) -> Result<Option<SwapStateMachine>> {
    stored(&node.service, swap_id)
}

fn stored(service: &SwapService, swap_id: &str) -> Result<Option<SwapStateMachine>> {
    match service.get_swap(swap_id) {
        Ok(swap) => Ok(Some(swap)),
        Err(SwapError::SwapNotFound(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub async fn wait_for_state(
    node: &FakeNode,
    swap_id: &str,
    expected: SwapState,
) -> Result<SwapStateMachine> {
    wait_for(
        &format!("{} swap {swap_id} to reach {expected}", node.node_id),
        WAIT_TIMEOUT,
        || {
            let service = node.service.clone();
            let swap_id = swap_id.to_string();
            async move {
                let swap = stored(&service, &swap_id)?;
                Ok(swap.filter(|swap| swap.current() == expected))
            }
        },
    )
    .await
}

pub async fn wait_for_terminal(node: &FakeNode, swap_id: &str) -> Result<SwapStateMachine> {
    wait_for(
        &format!("{} swap {swap_id} to finish", node.node_id),
        WAIT_TIMEOUT,
        || {
            let service = node.service.clone();
            let swap_id = swap_id.to_string();
            async move {
                let swap = stored(&service, &swap_id)?;
                Ok(swap.filter(|swap| swap.is_terminal()))
            }
        },
    )
    .await
}

/// Waits until `node` has dropped the swap from its active registry.
pub async fn wait_for_eviction(node: &FakeNode, swap_id: &str) -> Result<()> {
    wait_for(
        &format!("{} to evict swap {swap_id}", node.node_id),
        WAIT_TIMEOUT,
        || {
            let service = node.service.clone();
            let swap_id = swap_id.to_string();
            async move { Ok(service.get_active_swap(&swap_id).is_err().then_some(())) }
        },
    )
    .await
}
