use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use clap::{Parser as _, ValueEnum};
use serde_json::json;

use peerswap::SwapServiceConfig;
use peerswap::chain::Chain;
use peerswap::fake::{FakeNetwork, FakeNode};
use peerswap::policy::StaticPolicy;
use peerswap::swap::SwapType;
use peerswap::swap::fsm::SwapStateMachine;
use peerswap::swap::store::SqliteSwapStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Both sides follow the protocol to the end.
    Happy,
    /// The taker cannot pay the fee invoice.
    FeeFail,
    /// The taker cannot pay the claim invoice and closes cooperatively.
    ClaimFail,
    /// The opening tx never confirms for the taker; the maker reclaims after CSV.
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    Out,
    In,
}

/// Runs one swap between two in-process nodes, `alice` (initiator) and
/// `bob`, and prints the outcome as JSON.
#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, value_enum, default_value_t = Kind::Out)]
    swap_type: Kind,

    #[arg(long, value_enum, default_value_t = Scenario::Happy)]
    scenario: Scenario,

    #[arg(long, default_value = "l-btc")]
    chain: Chain,

    #[arg(long, default_value_t = 100_000)]
    amount_sat: u64,

    #[arg(long, default_value = "sim-channel")]
    channel_id: String,

    /// SQLite file for alice's swap store; in-memory when omitted.
    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    #[arg(long, default_value_t = 10)]
    action_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    peerswap::logging::init().ok();
    let args = Args::parse();

    let config = SwapServiceConfig {
        max_retries: args.max_retries,
        action_timeout: Duration::from_secs(args.action_timeout_secs),
        ..SwapServiceConfig::default()
    };

    let network = FakeNetwork::new();
    let alice = match &args.db {
        Some(path) => {
            let store = Arc::new(SqliteSwapStore::open(path.clone()).context("open alice store")?);
            FakeNode::with_parts(
                "alice",
                &network,
                config.clone(),
                store.clone(),
                store,
                Arc::new(StaticPolicy::accept_all()),
            )
        }
        None => FakeNode::new("alice", &network, config.clone()),
    };
    let bob = FakeNode::new("bob", &network, config);
    alice.connect(&bob);
    alice.service.start().await.context("start alice")?;
    bob.service.start().await.context("start bob")?;

    let swap_type = match args.swap_type {
        Kind::Out => SwapType::SwapOut,
        Kind::In => SwapType::SwapIn,
    };
    let (maker, taker) = match swap_type {
        SwapType::SwapOut => (&bob, &alice),
        SwapType::SwapIn => (&alice, &bob),
    };
    match args.scenario {
        Scenario::Happy => {}
        Scenario::FeeFail => taker.lightning.fail_payments_with_label_prefix(Some("fee_")),
        Scenario::ClaimFail => taker
            .lightning
            .fail_payments_with_label_prefix(Some("claim_")),
        Scenario::Csv => taker.chain(args.chain).set_auto_confirm(false),
    }

    let swap = match swap_type {
        SwapType::SwapOut => {
            alice
                .service
                .swap_out("bob", args.chain, &args.channel_id, "alice", args.amount_sat)
                .await
        }
        SwapType::SwapIn => {
            alice
                .service
                .swap_in("bob", args.chain, &args.channel_id, "alice", args.amount_sat)
                .await
        }
    }
    .context("start swap")?;
    let swap_id = swap.lock().await.id.clone();

    let timeout = Duration::from_secs(args.timeout_secs);
    if args.scenario == Scenario::Csv {
        let chain = maker.chain(args.chain);
        wait_until(timeout, || chain.has_csv_watch(&swap_id))
            .await
            .context("wait for maker csv watch")?;
        chain.pass_csv(&swap_id).await.context("expire csv")?;
    }

    let done = |node: &FakeNode| {
        node.service
            .get_swap(&swap_id)
            .map(|m| m.is_terminal())
            .unwrap_or(false)
    };
    let maker_done = wait_until(timeout, || done(maker)).await;
    let taker_done = if args.scenario == Scenario::Csv {
        Ok(())
    } else {
        wait_until(timeout, || done(taker)).await
    };

    let out = json!({
      "swap_id": swap_id,
      "swap_type": swap_type.to_string(),
      "scenario": format!("{:?}", args.scenario),
      "chain": args.chain.as_str(),
      "amount_sat": args.amount_sat,
      "alice": node_json(&alice, &swap_id),
      "bob": node_json(&bob, &swap_id),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);

    maker_done.context("maker did not finish")?;
    taker_done.context("taker did not finish")?;
    Ok(())
}

fn node_json(node: &FakeNode, swap_id: &str) -> serde_json::Value {
    match node.service.get_swap(swap_id) {
        Ok(SwapStateMachine {
            data,
            retries,
            failures,
            ..
        }) => json!({
          "role": data.role.to_string(),
          "state": data.fsm_state.to_string(),
          "cancel_message": data.cancel_message,
          "last_err": data.last_err,
          "claim_tx_id": data.claim_tx_id,
          "retries": retries,
          "failures": failures,
        }),
        Err(err) => json!({ "error": err.to_string() }),
    }
}

async fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while !f() {
        anyhow::ensure!(Instant::now() < deadline, "timed out after {timeout:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}
