//! Gateway Webhook Handling
//!
//! Gateway-specific parsers (Stripe here, seQura in [`crate::sequra`]) turn
//! raw notifications into a provider-agnostic [`GatewayEvent`]. The
//! [`WebhookProcessor`] applies those events to the ledger.
//!
//! Processing is idempotent: replayed event ids, already-recorded sales and
//! already-refunded sales are acknowledged without touching the ledger.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use stripe::{Charge, CheckoutSession, CheckoutSessionPaymentStatus, Event, EventObject, EventType, Webhook};

use commission_core::{
    split_commissions, Actor, Gateway, LedgerError, LedgerStore, RefundOrigin, RefundOutcome, Sale, Student,
};

use crate::checkout::{from_cents, PAYMENT_LINK_METADATA_KEY};
use crate::error::{PaymentError, Result};

/// A completed payment reported by a gateway
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedPayment {
    pub gateway: Gateway,
    pub event_id: Option<String>,
    /// Gateway reference the sale is keyed on
    pub external_ref: String,
    pub payment_link_id: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    /// Charged amount; falls back to the link price when absent
    pub amount: Option<Decimal>,
}

/// Parsed gateway event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Payment completed - record the sale and split commissions
    PaymentCompleted(CompletedPayment),

    /// Payment refunded or order cancelled - cascade to commissions
    Refunded {
        gateway: Gateway,
        event_id: Option<String>,
        external_ref: String,
    },

    /// Unhandled event type
    Other { event_type: String },
}

impl GatewayEvent {
    fn replay_key(&self) -> Option<(Gateway, &str)> {
        match self {
            GatewayEvent::PaymentCompleted(p) => p.event_id.as_deref().map(|id| (p.gateway, id)),
            GatewayEvent::Refunded { gateway, event_id, .. } => event_id.as_deref().map(|id| (*gateway, id)),
            GatewayEvent::Other { .. } => None,
        }
    }
}

/// What processing an event did to the ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    SaleRecorded { sale_id: String, commissions: usize },
    Duplicate,
    Refunded { sale_id: String, commissions_affected: usize },
    AlreadyRefunded { sale_id: String },
    Ignored { reason: String },
}

impl WebhookOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        WebhookOutcome::Ignored { reason: reason.into() }
    }
}

/// Applies gateway events to the ledger
pub struct WebhookProcessor<S: LedgerStore> {
    store: Arc<S>,
}

impl<S: LedgerStore> WebhookProcessor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Process a parsed gateway event
    pub fn handle(&self, event: GatewayEvent) -> Result<WebhookOutcome> {
        if let Some((gateway, event_id)) = event.replay_key() {
            if self.store.seen_event(gateway.as_str(), event_id)? {
                tracing::debug!(gateway = %gateway, event_id = %event_id, "Replayed webhook event");
                return Ok(WebhookOutcome::Duplicate);
            }
        }

        let outcome = match &event {
            GatewayEvent::PaymentCompleted(payment) => self.record_payment(payment)?,
            GatewayEvent::Refunded { gateway, external_ref, .. } => self.refund(*gateway, external_ref)?,
            GatewayEvent::Other { event_type } => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event");
                WebhookOutcome::ignored(format!("unhandled event {event_type}"))
            }
        };

        if let Some((gateway, event_id)) = event.replay_key() {
            self.store.record_event(gateway.as_str(), event_id)?;
        }

        Ok(outcome)
    }

    fn record_payment(&self, payment: &CompletedPayment) -> Result<WebhookOutcome> {
        if self.store.find_sale(payment.gateway, &payment.external_ref)?.is_some() {
            tracing::info!(
                gateway = %payment.gateway,
                external_ref = %payment.external_ref,
                "Sale already recorded"
            );
            return Ok(WebhookOutcome::Duplicate);
        }

        let Some(link_id) = payment.payment_link_id.as_deref() else {
            tracing::warn!(external_ref = %payment.external_ref, "Payment without payment link id");
            return Ok(WebhookOutcome::ignored("no payment link id"));
        };

        let Some(link) = self.store.get_payment_link(link_id)? else {
            tracing::warn!(payment_link_id = %link_id, "Payment for unknown payment link");
            return Ok(WebhookOutcome::ignored("unknown payment link"));
        };

        if link.gateway != payment.gateway {
            tracing::warn!(
                payment_link_id = %link_id,
                link_gateway = %link.gateway,
                event_gateway = %payment.gateway,
                "Payment arrived through a different gateway than the link"
            );
            return Ok(WebhookOutcome::ignored("gateway mismatch"));
        }
        if !link.active {
            tracing::warn!(payment_link_id = %link_id, "Payment on inactive link, recording anyway");
        }

        let pack = self
            .store
            .get_pack(&link.pack_id)?
            .ok_or_else(|| LedgerError::not_found("pack", &link.pack_id))?;

        let email = payment
            .customer_email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| PaymentError::WebhookParse("payment without customer email".into()))?;
        let name = payment.customer_name.clone().unwrap_or_default();
        let student = self.store.find_or_create_student(Student::new(name, email))?;

        let amount = payment.amount.unwrap_or(link.price);
        let sale = Sale::new(
            &student.id,
            &pack.id,
            payment.gateway,
            &payment.external_ref,
            amount,
            link.team.clone(),
        )
        .with_payment_link(&link.id);
        let commissions = split_commissions(&sale, &pack.rates);

        match self.store.record_sale(&sale, &commissions) {
            Ok(()) => Ok(WebhookOutcome::SaleRecorded {
                sale_id: sale.id,
                commissions: commissions.len(),
            }),
            // Lost a race with a concurrent delivery of the same payment
            Err(LedgerError::Conflict(_)) => Ok(WebhookOutcome::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    fn refund(&self, gateway: Gateway, external_ref: &str) -> Result<WebhookOutcome> {
        let Some(sale) = self.store.find_sale(gateway, external_ref)? else {
            tracing::warn!(gateway = %gateway, external_ref = %external_ref, "Refund for unknown sale");
            return Ok(WebhookOutcome::ignored("unknown sale"));
        };

        let outcome = match self.store.refund_sale(&sale.id, RefundOrigin::Gateway, &Actor::system())? {
            RefundOutcome::Refunded { sale_id, commissions_affected } => WebhookOutcome::Refunded {
                sale_id,
                commissions_affected,
            },
            RefundOutcome::AlreadyRefunded { sale_id } => WebhookOutcome::AlreadyRefunded { sale_id },
        };
        Ok(outcome)
    }
}

/// Verify a Stripe webhook signature and parse the event
pub fn verify_stripe_event(payload: &str, signature: &str, secret: &str) -> Result<Event> {
    Webhook::construct_event(payload, signature, secret).map_err(|e| PaymentError::WebhookSignature(e.to_string()))
}

/// Parse a Stripe event into our event type
pub fn parse_stripe_event(event: &Event) -> Result<GatewayEvent> {
    let event_id = Some(event.id.to_string());

    match event.type_ {
        EventType::CheckoutSessionCompleted => {
            let EventObject::CheckoutSession(session) = &event.data.object else {
                return Err(PaymentError::WebhookParse("Invalid checkout session data".into()));
            };
            Ok(completed_checkout(session, event_id))
        }

        EventType::ChargeRefunded => {
            let EventObject::Charge(charge) = &event.data.object else {
                return Err(PaymentError::WebhookParse("Invalid charge data".into()));
            };
            Ok(refunded_charge(charge, event_id))
        }

        _ => Ok(GatewayEvent::Other {
            event_type: format!("{:?}", event.type_),
        }),
    }
}

fn completed_checkout(session: &CheckoutSession, event_id: Option<String>) -> GatewayEvent {
    if session.payment_status != CheckoutSessionPaymentStatus::Paid {
        return GatewayEvent::Other {
            event_type: "checkout.session.completed (unpaid)".into(),
        };
    }

    let external_ref = session
        .payment_intent
        .as_ref()
        .map_or_else(|| session.id.to_string(), |pi| pi.id().to_string());

    let details = session.customer_details.as_ref();
    let customer_email = session
        .customer_email
        .clone()
        .or_else(|| details.and_then(|d| d.email.clone()));

    GatewayEvent::PaymentCompleted(CompletedPayment {
        gateway: Gateway::Stripe,
        event_id,
        external_ref,
        payment_link_id: session
            .metadata
            .as_ref()
            .and_then(|m| m.get(PAYMENT_LINK_METADATA_KEY))
            .cloned(),
        customer_email,
        customer_name: details.and_then(|d| d.name.clone()),
        amount: session.amount_total.map(from_cents),
    })
}

/// Only a full refund cancels the sale; partial refunds are left to an admin
fn refunded_charge(charge: &Charge, event_id: Option<String>) -> GatewayEvent {
    let external_ref = charge
        .payment_intent
        .as_ref()
        .map_or_else(|| charge.id.to_string(), |pi| pi.id().to_string());

    if !charge.refunded {
        tracing::info!(
            external_ref = %external_ref,
            amount_cents = charge.amount,
            refunded_cents = charge.amount_refunded,
            "Partial Stripe refund, sale left untouched"
        );
        return GatewayEvent::Other {
            event_type: "charge.refunded (partial)".into(),
        };
    }

    GatewayEvent::Refunded {
        gateway: Gateway::Stripe,
        event_id,
        external_ref,
    }
}
