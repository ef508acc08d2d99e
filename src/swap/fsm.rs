use serde::{Deserialize, Serialize};

use super::SwapData;
use super::SwapRole;
use super::SwapType;
use super::services::SwapServices;
use super::state::{EventPayload, EventType, SwapState};
use crate::config::SwapServiceConfig;
use crate::error::SwapError;

/// One swap: its record plus the bookkeeping of the driver loop.
///
/// The current state lives in `data.fsm_state`, so what is persisted and
/// what the machine acts on are the same field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapStateMachine {
    pub id: String,
    pub swap_type: SwapType,
    pub role: SwapRole,
    pub previous: SwapState,
    pub data: SwapData,
    /// In-place re-entries of retryable actions; never reset.
    pub retries: u32,
    /// `ActionFailed` events processed.
    pub failures: u32,
}

impl SwapStateMachine {
    pub fn new(data: SwapData) -> Self {
        Self {
            id: data.id.clone(),
            swap_type: data.swap_type,
            role: data.role,
            previous: data.fsm_state,
            data,
            retries: 0,
            failures: 0,
        }
    }

    pub fn current(&self) -> SwapState {
        self.data.fsm_state
    }

    pub fn accepts(&self, event: EventType) -> bool {
        self.current().accepts(event)
    }

    pub fn is_terminal(&self) -> bool {
        self.current().is_terminal()
    }

    /// Applies `event` and keeps running state actions until one of them
    /// parks the machine or a terminal state is reached.
    ///
    /// An event the current state does not map is rejected without touching
    /// the machine.
    pub async fn send_event(
        &mut self,
        services: &SwapServices,
        config: &SwapServiceConfig,
        event: EventType,
        payload: Option<EventPayload>,
    ) -> Result<(), SwapError> {
        self.drive(services, config, event, payload, false).await
    }

    /// Puts a machine loaded from the store back to work after a restart.
    ///
    /// A machine still in its initial state replays its entry event, a
    /// parked claim is resumed, and any other state re-runs its action.
    /// Actions guard on what they already recorded, so a re-run does not
    /// repeat a payment or broadcast that completed before the restart.
    pub async fn recover(
        &mut self,
        services: &SwapServices,
        config: &SwapServiceConfig,
    ) -> Result<(), SwapError> {
        if let Some(event) = self.entry_event() {
            return self.send_event(services, config, event, None).await;
        }
        if self.accepts(EventType::Resume) {
            return self
                .send_event(services, config, EventType::Resume, None)
                .await;
        }
        match self.run_action(services, config).await {
            Some(event) => self.drive(services, config, event, None, true).await,
            None => Ok(()),
        }
    }

    fn entry_event(&self) -> Option<EventType> {
        if self.current() != SwapState::initial(self.swap_type, self.role) {
            return None;
        }
        Some(match (self.swap_type, self.role) {
            (_, SwapRole::Sender) => EventType::Start,
            (SwapType::SwapOut, SwapRole::Receiver) => EventType::SwapOutRequestReceived,
            (SwapType::SwapIn, SwapRole::Receiver) => EventType::SwapInRequestReceived,
        })
    }

    async fn drive(
        &mut self,
        services: &SwapServices,
        config: &SwapServiceConfig,
        mut event: EventType,
        mut payload: Option<EventPayload>,
        mut follow_up: bool,
    ) -> Result<(), SwapError> {
        loop {
            let current = self.current();
            let Some(mut next) = current.next(event) else {
                if follow_up {
                    // An action failed in a state with no failure edge; keep
                    // waiting for the external event that state expects.
                    tracing::warn!(
                        swap_id = %self.id,
                        state = %current,
                        event = %event,
                        last_err = self.data.last_err.as_deref().unwrap_or_default(),
                        "swap action failed, waiting"
                    );
                    return services.store.update(self).map_err(SwapError::Store);
                }
                return Err(SwapError::UnexpectedEvent {
                    swap_id: self.id.clone(),
                    state: current,
                    event,
                });
            };

            let snapshot = (self.previous, self.data.clone(), self.failures);

            if event == EventType::ActionFailed {
                self.failures += 1;
                if self.failures > config.max_failures && !next.is_terminal() {
                    if self.data.funds_committed() {
                        // Canceling now would abandon funds on chain; the
                        // failure edge already leads to a claim.
                        tracing::warn!(
                            swap_id = %self.id,
                            state = %current,
                            failures = self.failures,
                            "failure cap reached with funds committed, not canceling"
                        );
                    } else {
                        next = SwapState::SwapCanceled;
                        self.data.cancel_message.get_or_insert_with(|| {
                            format!("swap canceled after {} failures", self.failures)
                        });
                    }
                }
            }
            if let Some(payload) = payload.take() {
                self.data.apply(payload);
            }
            self.previous = current;
            self.data.fsm_state = next;

            if let Err(err) = services.store.update(self) {
                (self.previous, self.data, self.failures) = snapshot;
                return Err(SwapError::Store(err));
            }

            tracing::info!(
                swap_id = %self.id,
                from = %current,
                to = %next,
                event = %event,
                "swap state transition"
            );

            if next.is_terminal() {
                tracing::info!(
                    swap_id = %self.id,
                    swap_type = %self.swap_type,
                    role = %self.role,
                    outcome = %next,
                    cancel_message = self.data.cancel_message.as_deref().unwrap_or_default(),
                    "swap finished"
                );
                return Ok(());
            }

            match self.run_action(services, config).await {
                Some(follow) => {
                    event = follow;
                    follow_up = true;
                }
                None => return Ok(()),
            }
        }
    }

    /// Runs the current state's action, retrying in place while the retry
    /// budget lasts. Exhausted failures become `ActionFailed`.
    async fn run_action(
        &mut self,
        services: &SwapServices,
        config: &SwapServiceConfig,
    ) -> Option<EventType> {
        let action = self.current().action();
        loop {
            let result = tokio::time::timeout(
                config.action_timeout,
                action.execute(services, config, &mut self.data),
            )
            .await
            .unwrap_or_else(|_| {
                Err(anyhow::anyhow!(
                    "{action:?} timed out after {:?}",
                    config.action_timeout
                ))
            });

            let err = match result {
                Ok(next) => return next,
                Err(err) => format!("{err:#}"),
            };

            if action.is_retryable() && self.retries < config.max_retries {
                self.retries += 1;
                tracing::warn!(
                    swap_id = %self.id,
                    action = ?action,
                    retries = self.retries,
                    error = %err,
                    "swap action failed, retrying"
                );
                continue;
            }

            tracing::warn!(
                swap_id = %self.id,
                action = ?action,
                error = %err,
                "swap action failed"
            );
            self.data.last_err = Some(err);
            return Some(EventType::ActionFailed);
        }
    }
}
