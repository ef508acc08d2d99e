//! Lightning capability consumed by the swap engine.
//!
//! Node adapters implement [`LightningClient`]; the engine correlates
//! settled invoices back to swaps via [`invoice::InvoiceLabel`].

pub mod invoice;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::SwapError;

#[async_trait]
pub trait LightningClient: Send + Sync {
    /// Creates an invoice locked to `preimage_hex` and tagged with `label`.
    async fn create_invoice(
        &self,
        amount_msat: u64,
        preimage_hex: &str,
        label: &str,
        expiry_secs: u32,
    ) -> Result<String>;

    /// Pays `invoice` and returns the hex preimage revealed by settlement.
    async fn pay_invoice(&self, invoice: &str) -> Result<String>;

    /// Registers the receiver of settled-invoice notifications.
    fn add_payment_handler(&self, handler: Arc<dyn PaymentHandler>);
}

#[async_trait]
pub trait PaymentHandler: Send + Sync {
    async fn on_payment_settled(&self, label: &str) -> Result<(), SwapError>;
}
