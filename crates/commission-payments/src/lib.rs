//! # commission-payments
//!
//! Payment gateway integration for commission-desk.
//!
//! ## Gateways
//!
//! ### 1. Stripe Checkout (single payment)
//!
//! Admins generate a hosted Checkout Session for a payment link. The link id
//! rides in the session metadata; `checkout.session.completed` records the
//! sale and `charge.refunded` cascades the refund to its commissions.
//!
//! ```text
//! ┌──────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ Payment link │────▶│  Stripe Hosted  │────▶│ Webhook → ledger │
//! │ (pack, team) │     │  Checkout Page  │     │ sale + split     │
//! └──────────────┘     └─────────────────┘     └──────────────────┘
//! ```
//!
//! ### 2. seQura (financed, three disbursements)
//!
//! Signed IPNs report order approval and cancellation. The merchant pays out
//! in three milestones (70/15/15); the [`SettlementWorker`] polls the
//! settlement API and credits the sale as each milestone lands.
//!
//! ```text
//! ┌──────────┐  IPN   ┌─────────────┐  poll  ┌────────────────────┐
//! │  seQura  │───────▶│ Sale        │◀───────│ SettlementWorker   │
//! │  order   │        │ collecting  │        │ 70% → 85% → 100%   │
//! └──────────┘        └─────────────┘        └────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use commission_payments::{parse_stripe_event, verify_stripe_event, WebhookProcessor};
//!
//! let processor = WebhookProcessor::new(store.clone());
//!
//! let event = verify_stripe_event(&payload, &signature, stripe.webhook_secret())?;
//! let outcome = processor.handle(parse_stripe_event(&event)?)?;
//! ```

mod checkout;
mod error;
pub mod sequra;
mod settlement;
mod webhook;

pub use checkout::{from_cents, to_cents, CheckoutRequest, CheckoutSession, StripeClient};
pub use error::{PaymentError, Result};
pub use sequra::{HttpSettlementClient, MockSettlementClient, OrderSettlement, OrderState, SettlementClient};
pub use settlement::{SettlementSummary, SettlementWorker};
pub use webhook::{
    parse_stripe_event, verify_stripe_event, CompletedPayment, GatewayEvent, WebhookOutcome, WebhookProcessor,
};
