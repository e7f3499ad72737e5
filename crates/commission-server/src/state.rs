//! Application State

use std::sync::Arc;

use commission_core::MemoryLedgerStore;
use commission_payments::{SettlementWorker, StripeClient, WebhookProcessor};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Ledger of agents, sales, commissions and payouts
    pub store: Arc<MemoryLedgerStore>,

    /// Stripe client (optional - None if not configured)
    pub stripe: Option<Arc<StripeClient>>,

    /// seQura IPN secret (optional - None disables the seQura webhook)
    pub sequra_webhook_secret: Option<Arc<str>>,

    /// seQura settlement poller (optional - None if the merchant API is not configured)
    pub settlement: Option<Arc<SettlementWorker<MemoryLedgerStore>>>,
}

impl AppState {
    pub fn webhook_processor(&self) -> WebhookProcessor<MemoryLedgerStore> {
        WebhookProcessor::new(self.store.clone())
    }
}
