#![cfg(feature = "fake")]

use anyhow::{Context as _, Result};
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn run_sim(args: &[&str]) -> Result<Value> {
    let assert = Command::cargo_bin("swap_sim")
        .context("locate swap_sim binary")?
        .args(args)
        .env("RUST_LOG", "warn")
        .assert()
        .success();
    serde_json::from_slice(&assert.get_output().stdout).context("parse swap_sim output")
}

#[test]
fn happy_swap_out_claims_with_preimage() -> Result<()> {
    let out = run_sim(&[])?;

    assert_eq!(out["swap_type"], "swap_out");
    assert_eq!(out["chain"], "l-btc");
    assert_eq!(out["alice"]["role"], "sender");
    assert_eq!(out["alice"]["state"], "ClaimedPreimage");
    assert_eq!(out["bob"]["role"], "receiver");
    assert_eq!(out["bob"]["state"], "ClaimedPreimage");
    assert!(out["alice"]["claim_tx_id"].is_string());

    Ok(())
}

#[test]
fn swap_in_fee_scenario_on_bitcoin() -> Result<()> {
    // Swap-ins carry no fee invoice, so the injected failure never fires.
    let out = run_sim(&["--swap-type", "in", "--scenario", "fee-fail", "--chain", "btc"])?;

    assert_eq!(out["swap_type"], "swap_in");
    assert_eq!(out["alice"]["state"], "ClaimedPreimage");
    assert_eq!(out["bob"]["state"], "ClaimedPreimage");

    Ok(())
}

#[test]
fn fee_failure_cancels_both_sides() -> Result<()> {
    let out = run_sim(&["--scenario", "fee-fail", "--chain", "btc"])?;

    assert_eq!(out["alice"]["state"], "SwapCanceled");
    assert_eq!(out["bob"]["state"], "SwapCanceled");
    assert_eq!(out["alice"]["failures"], 1);
    let reason = out["bob"]["cancel_message"]
        .as_str()
        .context("bob has no cancel message")?;
    assert!(reason.contains("no route"));

    Ok(())
}

#[test]
fn claim_failure_closes_cooperatively() -> Result<()> {
    let out = run_sim(&["--swap-type", "in", "--scenario", "claim-fail"])?;

    assert_eq!(out["alice"]["state"], "ClaimedCoop");
    assert_eq!(out["bob"]["state"], "ClaimedCoop");

    Ok(())
}

#[test]
fn csv_scenario_reclaims_for_the_maker() -> Result<()> {
    let out = run_sim(&["--scenario", "csv"])?;

    assert_eq!(out["bob"]["state"], "ClaimedCsv");
    assert_eq!(out["alice"]["state"], "SwapOutSender::AwaitTxConfirmation");

    Ok(())
}

#[test]
fn sqlite_db_keeps_alice_history() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let db = dir.path().join("alice.sqlite3");
    let db = db.to_str().context("tempdir path is not utf-8")?;

    let out = run_sim(&["--db", db, "--channel-id", "chan-db"])?;
    assert_eq!(out["alice"]["state"], "ClaimedPreimage");
    assert!(dir.path().join("alice.sqlite3").exists());

    Ok(())
}

#[test]
fn unknown_chain_is_rejected() -> Result<()> {
    Command::cargo_bin("swap_sim")
        .context("locate swap_sim binary")?
        .args(["--chain", "doge"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("doge"));

    Ok(())
}
