//! In-memory collaborators for running several nodes in one process.
//!
//! Nodes share a [`FakeNetwork`]: an invoice book standing in for the
//! Lightning network and one ledger per chain. Every notification is
//! delivered from a spawned task, never from inside the call that caused it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use bitcoin::hashes::{Hash as _, sha256};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::chain::{
    BroadcastedTx, Chain, ChainBackend, ChainEventHandler, ChainWatcher, OnchainWallet,
    UnpreparedOpeningTx,
};
use crate::config::SwapServiceConfig;
use crate::error::SwapError;
use crate::lightning::{LightningClient, PaymentHandler};
use crate::messages::{MessageHandler, MessageType, Messenger};
use crate::policy::{Policy, StaticPolicy};
use crate::swap::SwapData;
use crate::swap::service::SwapService;
use crate::swap::services::SwapServices;
use crate::swap::store::{
    MemoryRequestedSwapsStore, MemorySwapStore, RequestedSwapsStore, SwapStore,
};

/// Fee every fake opening transaction pays.
pub const FAKE_OPENING_FEE_SAT: u64 = 500;

struct Inbound {
    from: String,
    msg_type: String,
    payload: Vec<u8>,
}

/// Peer transport. Messages to one node are delivered in send order.
pub struct FakeMessenger {
    node_id: String,
    inbox: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
    peers: Mutex<HashMap<String, Weak<FakeMessenger>>>,
    failing_sends: AtomicU32,
    sent: Mutex<Vec<(String, MessageType)>>,
}

impl FakeMessenger {
    pub fn new(node_id: &str) -> Arc<Self> {
        Arc::new(Self {
            node_id: node_id.to_string(),
            inbox: Mutex::new(None),
            peers: Mutex::new(HashMap::new()),
            failing_sends: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn connect(a: &Arc<Self>, b: &Arc<Self>) {
        a.peers
            .lock()
            .expect("messenger mutex poisoned")
            .insert(b.node_id.clone(), Arc::downgrade(b));
        b.peers
            .lock()
            .expect("messenger mutex poisoned")
            .insert(a.node_id.clone(), Arc::downgrade(a));
    }

    /// Makes the next `n` sends fail before reaching the peer.
    pub fn fail_next_sends(&self, n: u32) {
        self.failing_sends.store(n, Ordering::SeqCst);
    }

    /// Messages handed to the transport so far, as (peer, type).
    pub fn sent(&self) -> Vec<(String, MessageType)> {
        self.sent.lock().expect("messenger mutex poisoned").clone()
    }

    fn deliver(&self, message: Inbound) -> Result<()> {
        let inbox = self.inbox.lock().expect("messenger mutex poisoned");
        let inbox = inbox
            .as_ref()
            .with_context(|| format!("peer {} is not listening", self.node_id))?;
        inbox
            .send(message)
            .map_err(|_| anyhow::anyhow!("peer {} stopped listening", self.node_id))
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send_message(&self, peer_id: &str, payload: Vec<u8>, msg_type: u16) -> Result<()> {
        if self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("injected send failure to {peer_id}");
        }

        let peer = self
            .peers
            .lock()
            .expect("messenger mutex poisoned")
            .get(peer_id)
            .and_then(Weak::upgrade)
            .with_context(|| format!("peer {peer_id} not connected"))?;

        peer.deliver(Inbound {
            from: self.node_id.clone(),
            msg_type: format!("{msg_type:04x}"),
            payload,
        })?;

        if let Some(t) = MessageType::from_u16(msg_type) {
            self.sent
                .lock()
                .expect("messenger mutex poisoned")
                .push((peer_id.to_string(), t));
        }
        Ok(())
    }

    fn add_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Inbound>();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                // The handler logs what it drops.
                let _ = handler
                    .on_message(&message.from, &message.msg_type, &message.payload)
                    .await;
            }
        });
        *self.inbox.lock().expect("messenger mutex poisoned") = Some(tx);
    }
}

struct FakeInvoice {
    preimage: String,
    label: String,
    payee: Option<Arc<dyn PaymentHandler>>,
    paid: bool,
}

/// Invoices of all fake Lightning nodes, keyed by invoice string.
#[derive(Default)]
pub struct InvoiceBook {
    invoices: Mutex<HashMap<String, FakeInvoice>>,
}

pub struct FakeLightning {
    book: Arc<InvoiceBook>,
    handler: Mutex<Option<Arc<dyn PaymentHandler>>>,
    failing_label_prefix: Mutex<Option<String>>,
    payments: AtomicU32,
}

impl FakeLightning {
    pub fn new(book: Arc<InvoiceBook>) -> Arc<Self> {
        Arc::new(Self {
            book,
            handler: Mutex::new(None),
            failing_label_prefix: Mutex::new(None),
            payments: AtomicU32::new(0),
        })
    }

    /// Fails every payment of an invoice whose label starts with `prefix`
    /// (`fee_`, `claim_`).
    pub fn fail_payments_with_label_prefix(&self, prefix: Option<&str>) {
        *self
            .failing_label_prefix
            .lock()
            .expect("lightning mutex poisoned") = prefix.map(str::to_string);
    }

    /// Successful payments made by this node.
    pub fn payments(&self) -> u32 {
        self.payments.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LightningClient for FakeLightning {
    async fn create_invoice(
        &self,
        amount_msat: u64,
        preimage_hex: &str,
        label: &str,
        _expiry_secs: u32,
    ) -> Result<String> {
        let invoice = format!("lnfake{amount_msat}n1{}", Uuid::new_v4().simple());
        let payee = self
            .handler
            .lock()
            .expect("lightning mutex poisoned")
            .clone();
        self.book
            .invoices
            .lock()
            .expect("invoice book mutex poisoned")
            .insert(
                invoice.clone(),
                FakeInvoice {
                    preimage: preimage_hex.to_string(),
                    label: label.to_string(),
                    payee,
                    paid: false,
                },
            );
        Ok(invoice)
    }

    async fn pay_invoice(&self, invoice: &str) -> Result<String> {
        let failing = self
            .failing_label_prefix
            .lock()
            .expect("lightning mutex poisoned")
            .clone();

        let (preimage, label, payee) = {
            let mut invoices = self.book.invoices.lock().expect("invoice book mutex poisoned");
            let entry = invoices
                .get_mut(invoice)
                .with_context(|| format!("unknown invoice {invoice}"))?;
            if let Some(prefix) = failing
                && entry.label.starts_with(&prefix)
            {
                anyhow::bail!("payment of {} failed: no route", entry.label);
            }
            anyhow::ensure!(!entry.paid, "invoice {} already paid", entry.label);
            entry.paid = true;
            (entry.preimage.clone(), entry.label.clone(), entry.payee.clone())
        };

        self.payments.fetch_add(1, Ordering::SeqCst);
        if let Some(payee) = payee {
            tokio::spawn(async move {
                let _ = payee.on_payment_settled(&label).await;
            });
        }
        Ok(preimage)
    }

    fn add_payment_handler(&self, handler: Arc<dyn PaymentHandler>) {
        *self.handler.lock().expect("lightning mutex poisoned") = Some(handler);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPath {
    Preimage,
    Coop,
    Csv,
}

struct LedgerTx {
    swap_id: String,
    amount_sat: u64,
}

/// Transactions seen by one fake chain.
#[derive(Default)]
pub struct FakeLedger {
    txs: Mutex<HashMap<String, LedgerTx>>,
    claims: Mutex<Vec<(String, ClaimPath)>>,
}

impl FakeLedger {
    pub fn claims(&self) -> Vec<(String, ClaimPath)> {
        self.claims.lock().expect("ledger mutex poisoned").clone()
    }
}

/// Wallet and watcher of one node on one chain.
pub struct FakeChain {
    chain: Chain,
    ledger: Arc<FakeLedger>,
    handler: Mutex<Option<Arc<dyn ChainEventHandler>>>,
    auto_confirm: AtomicBool,
    fail_broadcast: AtomicBool,
    failing_claims: AtomicU32,
    confirmation_watches: Mutex<HashSet<String>>,
    csv_watches: Mutex<HashSet<String>>,
}

impl FakeChain {
    pub fn new(chain: Chain, ledger: Arc<FakeLedger>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            ledger,
            handler: Mutex::new(None),
            auto_confirm: AtomicBool::new(true),
            fail_broadcast: AtomicBool::new(false),
            failing_claims: AtomicU32::new(0),
            confirmation_watches: Mutex::new(HashSet::new()),
            csv_watches: Mutex::new(HashSet::new()),
        })
    }

    /// With auto-confirm on, a confirmation watch fires right away.
    pub fn set_auto_confirm(&self, on: bool) {
        self.auto_confirm.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_broadcast(&self, on: bool) {
        self.fail_broadcast.store(on, Ordering::SeqCst);
    }

    pub fn fail_next_claims(&self, n: u32) {
        self.failing_claims.store(n, Ordering::SeqCst);
    }

    pub fn has_csv_watch(&self, swap_id: &str) -> bool {
        self.csv_watches
            .lock()
            .expect("watch mutex poisoned")
            .contains(swap_id)
    }

    pub fn has_confirmation_watch(&self, swap_id: &str) -> bool {
        self.confirmation_watches
            .lock()
            .expect("watch mutex poisoned")
            .contains(swap_id)
    }

    /// Reports the swap's opening transaction as confirmed.
    pub async fn confirm(&self, swap_id: &str) -> Result<(), SwapError> {
        match self.handler() {
            Some(handler) => handler.on_tx_confirmed(swap_id).await,
            None => Ok(()),
        }
    }

    /// Reports the swap's CSV timeout as expired.
    pub async fn pass_csv(&self, swap_id: &str) -> Result<(), SwapError> {
        match self.handler() {
            Some(handler) => handler.on_csv_passed(swap_id).await,
            None => Ok(()),
        }
    }

    fn handler(&self) -> Option<Arc<dyn ChainEventHandler>> {
        self.handler.lock().expect("watch mutex poisoned").clone()
    }

    fn claim(&self, swap: &SwapData, path: ClaimPath) -> Result<String> {
        if self
            .failing_claims
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("{} claim broadcast rejected", self.chain);
        }
        let txid = swap
            .opening_tx_id
            .as_deref()
            .context("swap has no opening tx")?;
        anyhow::ensure!(
            self.ledger
                .txs
                .lock()
                .expect("ledger mutex poisoned")
                .contains_key(txid),
            "opening tx {txid} not found on {}",
            self.chain
        );
        self.ledger
            .claims
            .lock()
            .expect("ledger mutex poisoned")
            .push((swap.id.clone(), path));
        Ok(Uuid::new_v4().simple().to_string())
    }
}

#[async_trait]
impl OnchainWallet for FakeChain {
    async fn create_opening_tx(&self, swap: &SwapData) -> Result<UnpreparedOpeningTx> {
        Ok(UnpreparedOpeningTx {
            hex: hex::encode(format!("{}:{}:{}", self.chain, swap.id, swap.amount_sat)),
            fee_sat: FAKE_OPENING_FEE_SAT,
            vout: 0,
        })
    }

    async fn broadcast_opening_tx(&self, swap: &SwapData) -> Result<BroadcastedTx> {
        anyhow::ensure!(
            !self.fail_broadcast.load(Ordering::SeqCst),
            "{} broadcast rejected",
            self.chain
        );
        let hex = swap
            .opening_tx_unprepared_hex
            .clone()
            .context("swap has no unprepared opening tx")?;
        let txid = hex::encode(sha256::Hash::hash(hex.as_bytes()).to_byte_array());
        self.ledger.txs.lock().expect("ledger mutex poisoned").insert(
            txid.clone(),
            LedgerTx {
                swap_id: swap.id.clone(),
                amount_sat: swap.amount_sat,
            },
        );
        Ok(BroadcastedTx { txid, hex })
    }

    async fn validate_opening_tx(&self, swap: &SwapData) -> Result<()> {
        let txid = swap
            .opening_tx_id
            .as_deref()
            .context("swap has no opening tx")?;
        let txs = self.ledger.txs.lock().expect("ledger mutex poisoned");
        let tx = txs
            .get(txid)
            .with_context(|| format!("opening tx {txid} not found on {}", self.chain))?;
        anyhow::ensure!(tx.swap_id == swap.id, "opening tx {txid} belongs to another swap");
        anyhow::ensure!(
            tx.amount_sat == swap.amount_sat,
            "opening tx pays {} sat, expected {}",
            tx.amount_sat,
            swap.amount_sat
        );
        Ok(())
    }

    async fn claim_with_preimage(&self, swap: &SwapData) -> Result<String> {
        anyhow::ensure!(swap.claim_preimage.is_some(), "swap has no claim preimage");
        self.claim(swap, ClaimPath::Preimage)
    }

    async fn claim_with_csv(&self, swap: &SwapData) -> Result<String> {
        self.claim(swap, ClaimPath::Csv)
    }

    async fn claim_with_coop(&self, swap: &SwapData) -> Result<String> {
        anyhow::ensure!(
            swap.counterparty_privkey.is_some(),
            "swap has no counterparty key"
        );
        self.claim(swap, ClaimPath::Coop)
    }
}

impl ChainWatcher for FakeChain {
    fn add_confirmation_watch(&self, swap_id: &str, _txid: &str) -> Result<()> {
        self.confirmation_watches
            .lock()
            .expect("watch mutex poisoned")
            .insert(swap_id.to_string());
        if self.auto_confirm.load(Ordering::SeqCst)
            && let Some(handler) = self.handler()
        {
            let swap_id = swap_id.to_string();
            tokio::spawn(async move {
                let _ = handler.on_tx_confirmed(&swap_id).await;
            });
        }
        Ok(())
    }

    fn add_csv_watch(&self, swap_id: &str, _txid: &str) -> Result<()> {
        self.csv_watches
            .lock()
            .expect("watch mutex poisoned")
            .insert(swap_id.to_string());
        Ok(())
    }

    fn set_event_handler(&self, handler: Arc<dyn ChainEventHandler>) {
        *self.handler.lock().expect("watch mutex poisoned") = Some(handler);
    }
}

/// Shared state every fake node of one test network sees.
#[derive(Default)]
pub struct FakeNetwork {
    pub invoices: Arc<InvoiceBook>,
    pub bitcoin: Arc<FakeLedger>,
    pub liquid: Arc<FakeLedger>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(&self, chain: Chain) -> &Arc<FakeLedger> {
        match chain {
            Chain::Bitcoin => &self.bitcoin,
            Chain::Liquid => &self.liquid,
        }
    }
}

/// A swap service wired to fake collaborators, both chains enabled.
pub struct FakeNode {
    pub node_id: String,
    pub service: SwapService,
    pub messenger: Arc<FakeMessenger>,
    pub lightning: Arc<FakeLightning>,
    pub bitcoin: Arc<FakeChain>,
    pub liquid: Arc<FakeChain>,
}

impl FakeNode {
    pub fn new(node_id: &str, network: &FakeNetwork, config: SwapServiceConfig) -> Self {
        Self::with_parts(
            node_id,
            network,
            config,
            Arc::new(MemorySwapStore::new()),
            Arc::new(MemoryRequestedSwapsStore::new()),
            Arc::new(StaticPolicy::accept_all()),
        )
    }

    pub fn with_parts(
        node_id: &str,
        network: &FakeNetwork,
        config: SwapServiceConfig,
        store: Arc<dyn SwapStore>,
        requested_swaps: Arc<dyn RequestedSwapsStore>,
        policy: Arc<dyn Policy>,
    ) -> Self {
        let messenger = FakeMessenger::new(node_id);
        let lightning = FakeLightning::new(network.invoices.clone());
        let bitcoin = FakeChain::new(Chain::Bitcoin, network.bitcoin.clone());
        let liquid = FakeChain::new(Chain::Liquid, network.liquid.clone());

        let services = SwapServices::new(
            store,
            requested_swaps,
            lightning.clone(),
            messenger.clone(),
            policy,
        )
        .with_bitcoin(ChainBackend::new(bitcoin.clone(), bitcoin.clone()))
        .with_liquid(ChainBackend::new(liquid.clone(), liquid.clone()));

        Self {
            node_id: node_id.to_string(),
            service: SwapService::new(services, config),
            messenger,
            lightning,
            bitcoin,
            liquid,
        }
    }

    pub fn chain(&self, chain: Chain) -> &Arc<FakeChain> {
        match chain {
            Chain::Bitcoin => &self.bitcoin,
            Chain::Liquid => &self.liquid,
        }
    }

    pub fn connect(&self, other: &FakeNode) {
        FakeMessenger::connect(&self.messenger, &other.messenger);
    }
}
