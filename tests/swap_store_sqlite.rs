use anyhow::{Context as _, Result};

use peerswap::chain::Chain;
use peerswap::swap::fsm::SwapStateMachine;
use peerswap::swap::state::SwapState;
use peerswap::swap::store::{RequestedSwap, RequestedSwapsStore, SqliteSwapStore, SwapStore};
use peerswap::swap::swap_out_sender::SwapOutSenderState;
use peerswap::swap::{SwapData, SwapRole, SwapType};

fn sample_swap(swap_id: &str, swap_type: SwapType, created_at: u64) -> SwapStateMachine {
    let mut data = SwapData::new(
        swap_id.to_string(),
        swap_type,
        SwapRole::Sender,
        Chain::Liquid,
        &format!("chan:{swap_id}"),
        "alice",
        "bob",
        100_000,
    );
    data.created_at = created_at;
    SwapStateMachine::new(data)
}

#[test]
fn sqlite_store_create_get_update_list() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let path = dir.path().join("swaps.sqlite3");

    let store = SqliteSwapStore::open(path).context("open sqlite store")?;

    let a = sample_swap("swap-a", SwapType::SwapOut, 100);
    store.create(&a).context("create swap-a")?;
    let got = store
        .get("swap-a")
        .context("get swap-a")?
        .context("swap-a missing")?;
    assert_eq!(got, a);

    let mut a = got;
    a.previous = a.current();
    a.data.fsm_state = SwapState::SwapOutSender(SwapOutSenderState::SendRequest);
    a.data.fee_invoice = Some("lnfake1".to_string());
    a.retries = 2;
    store.update(&a).context("update swap-a")?;
    let got = store
        .get("swap-a")
        .context("get swap-a after update")?
        .context("swap-a missing after update")?;
    assert_eq!(got, a);

    // Listed by creation time, not by id.
    let c = sample_swap("swap-c", SwapType::SwapIn, 50);
    store.create(&c).context("create swap-c")?;
    let ids: Vec<_> = store
        .list()
        .context("list swaps")?
        .into_iter()
        .map(|swap| swap.id)
        .collect();
    assert_eq!(ids, vec!["swap-c", "swap-a"]);

    assert!(store.get("missing").context("get missing")?.is_none());

    let err = store.create(&c).unwrap_err();
    assert!(err.to_string().contains("insert swap swap-c"));

    let err = store
        .update(&sample_swap("missing", SwapType::SwapOut, 1))
        .unwrap_err();
    assert!(err.to_string().contains("swap not found"));

    Ok(())
}

#[test]
fn sqlite_store_survives_reopen() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let path = dir.path().join("nested").join("swaps.sqlite3");

    {
        let store = SqliteSwapStore::open(path.clone()).context("open sqlite store")?;
        assert_eq!(store.path(), path.as_path());
        store
            .create(&sample_swap("swap-a", SwapType::SwapIn, 1))
            .context("create swap-a")?;
        store
            .add(
                "carol",
                RequestedSwap {
                    chain: Chain::Bitcoin,
                    amount_sat: 10_000,
                    swap_type: SwapType::SwapOut,
                },
            )
            .context("add requested swap")?;
        store
            .add(
                "carol",
                RequestedSwap {
                    chain: Chain::Liquid,
                    amount_sat: 20_000,
                    swap_type: SwapType::SwapIn,
                },
            )
            .context("add second requested swap")?;
    }

    let store = SqliteSwapStore::open(path).context("reopen sqlite store")?;
    let got = store
        .get("swap-a")
        .context("get swap-a after reopen")?
        .context("swap-a missing after reopen")?;
    assert_eq!(got.swap_type, SwapType::SwapIn);
    assert_eq!(got.data.channel_id, "chan:swap-a");

    let requested = store.get_all().context("list requested swaps")?;
    assert_eq!(requested.len(), 1);
    let carol = requested.get("carol").context("carol missing")?;
    assert_eq!(carol.len(), 2);
    assert_eq!(carol[0].chain, Chain::Bitcoin);
    assert_eq!(carol[1].swap_type, SwapType::SwapIn);
    assert_eq!(carol[1].amount_sat, 20_000);

    Ok(())
}
