use std::time::Duration;

/// Version of the peer protocol spoken by this engine. Requests carrying a
/// different version are refused.
pub const PROTOCOL_VERSION: u64 = 1;

/// Largest swap amount whose msat value still fits in a `u64`.
pub const MAX_AMOUNT_SAT: u64 = u64::MAX / 1000;

/// Parked claims back off up to `claim_retry_interval * 2^MAX_CLAIM_BACKOFF_SHIFT`.
const MAX_CLAIM_BACKOFF_SHIFT: u32 = 6;

#[derive(Debug, Clone)]
pub struct SwapServiceConfig {
    /// Per-swap budget of in-place re-entries of a retryable action.
    pub max_retries: u32,
    /// `ActionFailed` events a swap may process before it is forced to
    /// cancel. Swaps with funds already on chain are never forced.
    pub max_failures: u32,
    /// Upper bound on a single state action, including its collaborator I/O.
    pub action_timeout: Duration,
    /// First delay before a failed on-chain claim is attempted again.
    pub claim_retry_interval: Duration,
    pub invoice_expiry_secs: u32,
    pub protocol_version: u64,
}

impl Default for SwapServiceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_failures: 5,
            action_timeout: Duration::from_secs(30),
            claim_retry_interval: Duration::from_secs(30),
            invoice_expiry_secs: 3600,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

impl SwapServiceConfig {
    /// Delay before the next claim attempt of a swap that has already
    /// failed `failures` times. Doubles per failure, then stays flat.
    pub fn claim_retry_delay(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(MAX_CLAIM_BACKOFF_SHIFT);
        self.claim_retry_interval.saturating_mul(1 << shift)
    }
}
