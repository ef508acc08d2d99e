//! Node-level entry point: owns the registry of active swaps and routes
//! user calls, peer messages, payment and chain notifications to them.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use uuid::Uuid;

use super::fsm::SwapStateMachine;
use super::poll::{PeerInfo, PollRegistry};
use super::services::SwapServices;
use super::state::{EventPayload, EventType};
use super::store::RequestedSwap;
use super::{SwapData, SwapRole, SwapType};
use crate::chain::{Chain, ChainEventHandler};
use crate::config::{MAX_AMOUNT_SAT, SwapServiceConfig};
use crate::error::SwapError;
use crate::lightning::PaymentHandler;
use crate::lightning::invoice::InvoiceLabel;
use crate::messages::{self, MessageHandler, MessageType, PeerMessage, Poll};

/// Handle to a registered swap. Holding its lock serializes events for
/// that swap.
pub type ActiveSwap = Arc<tokio::sync::Mutex<SwapStateMachine>>;

struct Entry {
    channel_id: String,
    peer_id: String,
    swap: ActiveSwap,
}

/// Active swaps by id and by channel. Both maps change together, only here.
#[derive(Default)]
struct Registry {
    by_id: HashMap<String, Entry>,
    by_channel: HashMap<String, String>,
}

impl Registry {
    fn insert(
        &mut self,
        id: &str,
        channel_id: &str,
        peer_id: &str,
        swap: ActiveSwap,
    ) -> Result<(), SwapError> {
        if self.by_id.contains_key(id) {
            return Err(SwapError::SwapAlreadyExists(id.to_string()));
        }
        if self.by_channel.contains_key(channel_id) {
            return Err(SwapError::ActiveSwapOnChannel);
        }
        self.by_channel
            .insert(channel_id.to_string(), id.to_string());
        self.by_id.insert(
            id.to_string(),
            Entry {
                channel_id: channel_id.to_string(),
                peer_id: peer_id.to_string(),
                swap,
            },
        );
        Ok(())
    }

    fn remove(&mut self, id: &str) {
        if let Some(entry) = self.by_id.remove(id)
            && self.by_channel.get(&entry.channel_id).map(String::as_str) == Some(id)
        {
            self.by_channel.remove(&entry.channel_id);
        }
    }

    fn get(&self, id: &str) -> Option<&Entry> {
        self.by_id.get(id)
    }

    fn channel_busy(&self, channel_id: &str) -> bool {
        self.by_channel.contains_key(channel_id)
    }
}

struct Inner {
    services: SwapServices,
    config: SwapServiceConfig,
    registry: Mutex<Registry>,
    polls: PollRegistry,
    started: AtomicBool,
}

#[derive(Clone)]
pub struct SwapService {
    inner: Arc<Inner>,
}

impl SwapService {
    pub fn new(services: SwapServices, config: SwapServiceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                services,
                config,
                registry: Mutex::new(Registry::default()),
                polls: PollRegistry::default(),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn services(&self) -> &SwapServices {
        &self.inner.services
    }

    pub fn config(&self) -> &SwapServiceConfig {
        &self.inner.config
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.registry.lock().expect("registry mutex poisoned")
    }

    /// Subscribes to the collaborators and resumes unfinished swaps.
    /// Calling it again is a no-op.
    pub async fn start(&self) -> Result<(), SwapError> {
        if self.services().enabled_chains().is_empty() {
            return Err(SwapError::NoChainEnabled);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let callbacks = Arc::new(Callbacks(Arc::downgrade(&self.inner)));
        self.services()
            .messenger
            .add_message_handler(callbacks.clone());
        self.services()
            .lightning
            .add_payment_handler(callbacks.clone());
        for backend in self.services().backends() {
            backend.watcher.set_event_handler(callbacks.clone());
        }

        tracing::info!(
            chains = ?self.services().enabled_chains(),
            protocol_version = self.config().protocol_version,
            "swap service started"
        );
        self.recover_swaps().await
    }

    /// Registers every unfinished swap found in the store and puts it back
    /// to work from the state it was persisted in.
    async fn recover_swaps(&self) -> Result<(), SwapError> {
        let records = self.services().store.list().map_err(SwapError::Store)?;
        for machine in records.into_iter().filter(|m| !m.is_terminal()) {
            let swap_id = machine.id.clone();
            let state = machine.current();
            let swap = match self.add_active_swap(machine) {
                Ok(swap) => swap,
                Err(err) => {
                    tracing::warn!(swap_id = %swap_id, error = %err, "cannot recover swap");
                    continue;
                }
            };
            tracing::info!(swap_id = %swap_id, state = %state, "recovering swap");

            let mut machine = swap.lock().await;
            let failures = machine.failures;
            let result = machine.recover(self.services(), self.config()).await;
            self.settle(&machine, failures);
            drop(machine);

            if let Err(err) = result {
                tracing::warn!(swap_id = %swap_id, error = %err, "recovered swap failed to resume");
            }
        }
        Ok(())
    }

    /// Starts a swap-out: we pay a Lightning invoice and receive on-chain.
    pub async fn swap_out(
        &self,
        peer_id: &str,
        chain: Chain,
        channel_id: &str,
        initiator_node_id: &str,
        amount_sat: u64,
    ) -> Result<ActiveSwap, SwapError> {
        self.start_swap(
            SwapType::SwapOut,
            peer_id,
            chain,
            channel_id,
            initiator_node_id,
            amount_sat,
        )
        .await
    }

    /// Starts a swap-in: we lock funds on chain and get paid over Lightning.
    pub async fn swap_in(
        &self,
        peer_id: &str,
        chain: Chain,
        channel_id: &str,
        initiator_node_id: &str,
        amount_sat: u64,
    ) -> Result<ActiveSwap, SwapError> {
        self.start_swap(
            SwapType::SwapIn,
            peer_id,
            chain,
            channel_id,
            initiator_node_id,
            amount_sat,
        )
        .await
    }

    async fn start_swap(
        &self,
        swap_type: SwapType,
        peer_id: &str,
        chain: Chain,
        channel_id: &str,
        initiator_node_id: &str,
        amount_sat: u64,
    ) -> Result<ActiveSwap, SwapError> {
        if amount_sat == 0 {
            return Err(SwapError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }
        if amount_sat > MAX_AMOUNT_SAT {
            return Err(SwapError::InvalidAmount(format!(
                "amount must not exceed {MAX_AMOUNT_SAT} sat"
            )));
        }
        if self.registry().channel_busy(channel_id) {
            return Err(SwapError::ActiveSwapOnChannel);
        }
        self.services().chain(chain)?;
        if !self.services().policy.accepts_swap(peer_id, amount_sat) {
            return Err(SwapError::PeerNotAllowed(peer_id.to_string()));
        }

        let data = SwapData::new(
            Uuid::new_v4().to_string(),
            swap_type,
            SwapRole::Sender,
            chain,
            channel_id,
            initiator_node_id,
            peer_id,
            amount_sat,
        );
        let machine = SwapStateMachine::new(data);
        let swap_id = machine.id.clone();
        let swap = self.create_swap(machine)?;

        tracing::info!(
            swap_id = %swap_id,
            swap_type = %swap_type,
            peer_id,
            chain = %chain,
            channel_id,
            amount_sat,
            "starting swap"
        );
        self.dispatch(&swap, EventType::Start, None).await?;
        Ok(swap)
    }

    /// Registers and persists a brand-new machine.
    fn create_swap(&self, machine: SwapStateMachine) -> Result<ActiveSwap, SwapError> {
        let swap = self.add_active_swap(machine.clone())?;
        if let Err(err) = self.services().store.create(&machine) {
            self.registry().remove(&machine.id);
            return Err(SwapError::Store(err));
        }
        Ok(swap)
    }

    /// Adds a machine to the registry, enforcing one active swap per channel.
    pub fn add_active_swap(&self, machine: SwapStateMachine) -> Result<ActiveSwap, SwapError> {
        let id = machine.id.clone();
        let channel_id = machine.data.channel_id.clone();
        let peer_id = machine.data.peer_node_id.clone();
        let swap = Arc::new(tokio::sync::Mutex::new(machine));
        self.registry()
            .insert(&id, &channel_id, &peer_id, swap.clone())?;
        Ok(swap)
    }

    pub fn get_active_swap(&self, swap_id: &str) -> Result<ActiveSwap, SwapError> {
        self.registry()
            .get(swap_id)
            .map(|entry| entry.swap.clone())
            .ok_or_else(|| SwapError::SwapNotFound(swap_id.to_string()))
    }

    /// Persisted record of a swap, active or finished.
    pub fn get_swap(&self, swap_id: &str) -> Result<SwapStateMachine, SwapError> {
        self.services()
            .store
            .get(swap_id)
            .map_err(SwapError::Store)?
            .ok_or_else(|| SwapError::SwapNotFound(swap_id.to_string()))
    }

    pub fn list_swaps(&self) -> Result<Vec<SwapStateMachine>, SwapError> {
        self.services().store.list().map_err(SwapError::Store)
    }

    pub fn requested_swaps(&self) -> Result<BTreeMap<String, Vec<RequestedSwap>>, SwapError> {
        self.services()
            .requested_swaps
            .get_all()
            .map_err(SwapError::Store)
    }

    /// Asks the counterparty to abandon the swap. Before the opening
    /// transaction this cancels; afterwards the taker hands over its key.
    pub async fn cancel_swap(&self, swap_id: &str, reason: &str) -> Result<(), SwapError> {
        let swap = self.get_active_swap(swap_id)?;
        self.dispatch(
            &swap,
            EventType::LocalCancel,
            Some(EventPayload::CancelReason(reason.to_string())),
        )
        .await
    }

    pub fn peers(&self) -> BTreeMap<String, PeerInfo> {
        self.inner.polls.all()
    }

    pub async fn poll_peer(&self, peer_id: &str) -> Result<(), SwapError> {
        let poll = self.own_poll(peer_id);
        self.send(peer_id, &PeerMessage::Poll(poll)).await
    }

    /// Sends our poll and asks the peer to answer with its own.
    pub async fn request_poll(&self, peer_id: &str) -> Result<(), SwapError> {
        let poll = self.own_poll(peer_id);
        self.send(peer_id, &PeerMessage::RequestPoll(poll)).await
    }

    fn own_poll(&self, peer_id: &str) -> Poll {
        Poll {
            version: self.config().protocol_version,
            assets: self.services().enabled_chains(),
            peer_allowed: self.services().policy.is_peer_allowed(peer_id),
        }
    }

    async fn send(&self, peer_id: &str, message: &PeerMessage) -> Result<(), SwapError> {
        messages::send(self.services().messenger.as_ref(), peer_id, message)
            .await
            .map_err(SwapError::Messenger)
    }

    /// Delivers `event` to a swap and evicts it once it is finished.
    async fn dispatch(
        &self,
        swap: &ActiveSwap,
        event: EventType,
        payload: Option<EventPayload>,
    ) -> Result<(), SwapError> {
        let mut machine = swap.lock().await;
        let failures = machine.failures;
        let result = machine
            .send_event(self.services(), self.config(), event, payload)
            .await;
        self.settle(&machine, failures);
        result
    }

    /// Evicts a finished swap. A swap that just parked after a failed claim
    /// gets its next attempt scheduled.
    fn settle(&self, machine: &SwapStateMachine, failures_before: u32) {
        if machine.is_terminal() {
            self.registry().remove(&machine.id);
        } else if machine.failures > failures_before && machine.accepts(EventType::Resume) {
            self.schedule_claim_retry(&machine.id, machine.failures);
        }
    }

    fn schedule_claim_retry(&self, swap_id: &str, failures: u32) {
        let delay = self.config().claim_retry_delay(failures);
        tracing::info!(swap_id, retry_in = ?delay, "claim failed, retry scheduled");

        let inner = Arc::downgrade(&self.inner);
        let swap_id = swap_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let service = SwapService { inner };
            if let Err(err) = service.retry_claim(&swap_id).await {
                tracing::warn!(swap_id = %swap_id, error = %err, "scheduled claim retry failed");
            }
        });
    }

    async fn retry_claim(&self, swap_id: &str) -> Result<(), SwapError> {
        // Finished or claimed some other way in the meantime.
        let Ok(swap) = self.get_active_swap(swap_id) else {
            return Ok(());
        };
        if !swap.lock().await.accepts(EventType::Resume) {
            return Ok(());
        }
        self.dispatch(&swap, EventType::Resume, None).await
    }

    /// Handles a custom message from `peer_id`; `msg_type` is the hex id.
    pub async fn on_message(
        &self,
        peer_id: &str,
        msg_type: &str,
        payload: &[u8],
    ) -> Result<(), SwapError> {
        let msg_type = MessageType::from_hex(msg_type)?;
        let message = PeerMessage::decode(msg_type, payload)?;
        tracing::debug!(peer_id, msg_type = %msg_type, "received peer message");

        match message {
            PeerMessage::Poll(poll) => {
                self.inner.polls.record(peer_id, &poll);
                Ok(())
            }
            PeerMessage::RequestPoll(poll) => {
                self.inner.polls.record(peer_id, &poll);
                self.poll_peer(peer_id).await
            }
            PeerMessage::SwapOutRequest(ref request) => {
                let mut data = SwapData::new(
                    request.swap_id.clone(),
                    SwapType::SwapOut,
                    SwapRole::Receiver,
                    request.chain,
                    &request.channel_id,
                    peer_id,
                    peer_id,
                    request.amount_sat,
                );
                data.taker_pubkey_hash = Some(request.taker_pubkey_hash.clone());
                self.on_request(request.protocol_version, data, message).await
            }
            PeerMessage::SwapInRequest(ref request) => {
                let mut data = SwapData::new(
                    request.swap_id.clone(),
                    SwapType::SwapIn,
                    SwapRole::Receiver,
                    request.chain,
                    &request.channel_id,
                    peer_id,
                    peer_id,
                    request.amount_sat,
                );
                data.maker_pubkey_hash = Some(request.maker_pubkey_hash.clone());
                self.on_request(request.protocol_version, data, message).await
            }
            message => self.on_swap_message(peer_id, message).await,
        }
    }

    /// Creates the receiving side of a swap from a peer's request.
    ///
    /// Requests that cannot get a machine (wrong protocol version, busy
    /// channel) are answered with `canceled` straight away. A repeated
    /// request for a known swap is dropped without a reply.
    async fn on_request(
        &self,
        protocol_version: u64,
        data: SwapData,
        message: PeerMessage,
    ) -> Result<(), SwapError> {
        let swap_id = data.id.clone();
        let peer_id = data.peer_node_id.clone();

        if self.registry().get(&swap_id).is_some()
            || self
                .services()
                .store
                .get(&swap_id)
                .map_err(SwapError::Store)?
                .is_some()
        {
            return Err(SwapError::SwapAlreadyExists(swap_id));
        }

        if protocol_version != self.config().protocol_version {
            let err = SwapError::ProtocolVersionMismatch {
                ours: self.config().protocol_version,
                theirs: protocol_version,
            };
            self.reply_canceled(&peer_id, &swap_id, &err.to_string())
                .await;
            return Err(err);
        }

        if self.registry().channel_busy(&data.channel_id) {
            let err = SwapError::ActiveSwapOnChannel;
            self.reply_canceled(&peer_id, &swap_id, &err.to_string())
                .await;
            return Err(err);
        }

        let event = EventType::from_message(&message)
            .ok_or_else(|| SwapError::UnknownMessageType(message.message_type().to_string()))?;
        let swap = self.create_swap(SwapStateMachine::new(data))?;
        tracing::info!(
            swap_id = %swap_id,
            peer_id = %peer_id,
            msg_type = %message.message_type(),
            "swap requested by peer"
        );
        self.dispatch(&swap, event, Some(EventPayload::Message(message)))
            .await
    }

    async fn reply_canceled(&self, peer_id: &str, swap_id: &str, reason: &str) {
        let message = PeerMessage::Canceled(messages::Canceled {
            swap_id: swap_id.to_string(),
            message: reason.to_string(),
        });
        if let Err(err) = self.send(peer_id, &message).await {
            tracing::warn!(swap_id, peer_id, error = %err, "cannot send cancel reply");
        }
    }

    async fn on_swap_message(&self, peer_id: &str, message: PeerMessage) -> Result<(), SwapError> {
        let Some(event) = EventType::from_message(&message) else {
            return Ok(());
        };
        let swap_id = message.swap_id().unwrap_or_default().to_string();

        let swap = {
            let registry = self.registry();
            let entry = registry
                .get(&swap_id)
                .ok_or_else(|| SwapError::SwapNotFound(swap_id.clone()))?;
            if entry.peer_id != peer_id {
                return Err(SwapError::PeerMismatch {
                    swap_id,
                    expected: entry.peer_id.clone(),
                    got: peer_id.to_string(),
                });
            }
            entry.swap.clone()
        };

        self.dispatch(&swap, event, Some(EventPayload::Message(message)))
            .await
    }

    /// Maps a settled invoice back to its swap by label.
    pub async fn on_payment_settled(&self, label: &str) -> Result<(), SwapError> {
        let parsed = InvoiceLabel::parse(label)
            .ok_or_else(|| SwapError::UnknownInvoiceLabel(label.to_string()))?;
        let event = match parsed {
            InvoiceLabel::Fee(_) => EventType::FeeInvoicePaid,
            InvoiceLabel::Claim(_) => EventType::ClaimInvoicePaid,
        };
        let swap = self.get_active_swap(parsed.swap_id())?;
        self.dispatch(&swap, event, None).await
    }

    pub async fn on_tx_confirmed(&self, swap_id: &str) -> Result<(), SwapError> {
        let swap = self.get_active_swap(swap_id)?;
        self.dispatch(&swap, EventType::TxConfirmed, None).await
    }

    pub async fn on_csv_passed(&self, swap_id: &str) -> Result<(), SwapError> {
        let swap = self.get_active_swap(swap_id)?;
        self.dispatch(&swap, EventType::CsvPassed, None).await
    }
}

/// Callback target handed to the collaborators. Holds the service weakly so
/// registering it does not keep the service alive.
struct Callbacks(Weak<Inner>);

impl Callbacks {
    fn service(&self) -> Option<SwapService> {
        self.0.upgrade().map(|inner| SwapService { inner })
    }
}

fn log_dropped(result: &Result<(), SwapError>, source: &str) {
    if let Err(err) = result {
        tracing::warn!(source, error = %err, "dropped swap notification");
    }
}

#[async_trait]
impl MessageHandler for Callbacks {
    async fn on_message(
        &self,
        peer_id: &str,
        msg_type: &str,
        payload: &[u8],
    ) -> Result<(), SwapError> {
        let Some(service) = self.service() else {
            return Ok(());
        };
        let result = service.on_message(peer_id, msg_type, payload).await;
        log_dropped(&result, "peer message");
        result
    }
}

#[async_trait]
impl PaymentHandler for Callbacks {
    async fn on_payment_settled(&self, label: &str) -> Result<(), SwapError> {
        let Some(service) = self.service() else {
            return Ok(());
        };
        let result = service.on_payment_settled(label).await;
        log_dropped(&result, "payment");
        result
    }
}

#[async_trait]
impl ChainEventHandler for Callbacks {
    async fn on_tx_confirmed(&self, swap_id: &str) -> Result<(), SwapError> {
        let Some(service) = self.service() else {
            return Ok(());
        };
        let result = service.on_tx_confirmed(swap_id).await;
        log_dropped(&result, "tx confirmation");
        result
    }

    async fn on_csv_passed(&self, swap_id: &str) -> Result<(), SwapError> {
        let Some(service) = self.service() else {
            return Ok(());
        };
        let result = service.on_csv_passed(swap_id).await;
        log_dropped(&result, "csv");
        result
    }
}
