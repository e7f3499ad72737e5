//! Stripe Checkout Integration
//!
//! Creates hosted Checkout Sessions for payment links. The link id travels
//! in the session metadata so the completion webhook can attribute the sale.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use stripe::{
    CheckoutSession as StripeCheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, Currency,
};

use commission_core::{Pack, PaymentLink};

use crate::error::{PaymentError, Result};

/// Metadata key carrying the payment link id
pub const PAYMENT_LINK_METADATA_KEY: &str = "payment_link_id";

/// Stripe client wrapper
pub struct StripeClient {
    client: Client,
    webhook_secret: String,
}

impl StripeClient {
    /// Create a new Stripe client
    pub fn new(secret_key: &str, webhook_secret: &str) -> Self {
        Self {
            client: Client::new(secret_key),
            webhook_secret: webhook_secret.to_string(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| PaymentError::Config("STRIPE_SECRET_KEY not set".into()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| PaymentError::Config("STRIPE_WEBHOOK_SECRET not set".into()))?;

        Ok(Self::new(&secret_key, &webhook_secret))
    }

    /// Get the webhook secret
    pub fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }

    /// Create a one-off hosted Checkout Session for a payment link
    pub async fn create_checkout_session(&self, request: CheckoutRequest<'_>) -> Result<CheckoutSession> {
        let link = request.payment_link;
        let unit_amount = to_cents(link.price)?;

        let mut params = CreateCheckoutSession::new();
        params.customer_email = request.customer_email;
        params.success_url = Some(request.success_url);
        params.cancel_url = Some(request.cancel_url);
        params.mode = Some(CheckoutSessionMode::Payment);

        let mut metadata = std::collections::HashMap::new();
        metadata.insert(PAYMENT_LINK_METADATA_KEY.to_string(), link.id.clone());
        metadata.insert("pack_id".to_string(), request.pack.id.clone());
        params.metadata = Some(metadata);

        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            quantity: Some(1),
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: currency(&request.pack.currency)?,
                unit_amount: Some(unit_amount),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: request.pack.name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        let session = StripeCheckoutSession::create(&self.client, params)
            .await
            .map_err(|e| PaymentError::Stripe(e.to_string()))?;

        let checkout_url = session
            .url
            .ok_or_else(|| PaymentError::Stripe("No checkout URL returned".into()))?;

        tracing::info!(
            session_id = %session.id,
            payment_link_id = %link.id,
            amount_cents = unit_amount,
            "Created Stripe checkout session"
        );

        Ok(CheckoutSession {
            id: session.id.to_string(),
            checkout_url,
            payment_link_id: link.id.clone(),
        })
    }
}

/// Request to create a checkout session
pub struct CheckoutRequest<'a> {
    pub payment_link: &'a PaymentLink,
    pub pack: &'a Pack,
    /// Prefilled customer email, if known
    pub customer_email: Option<&'a str>,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

/// Result of creating a checkout session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Stripe session ID
    pub id: String,

    /// URL to redirect the student to
    pub checkout_url: String,

    pub payment_link_id: String,
}

/// Convert a decimal amount to integer minor units
pub fn to_cents(amount: Decimal) -> Result<i64> {
    if amount <= Decimal::ZERO {
        return Err(PaymentError::Config(format!("cannot charge non-positive amount {amount}")));
    }
    (amount * dec!(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| PaymentError::Config(format!("amount {amount} out of range")))
}

/// Convert integer minor units to a decimal amount
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn currency(code: &str) -> Result<Currency> {
    match code.to_lowercase().as_str() {
        "eur" => Ok(Currency::EUR),
        "usd" => Ok(Currency::USD),
        "gbp" => Ok(Currency::GBP),
        other => Err(PaymentError::Config(format!("unsupported currency '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cents_conversion() {
        assert_eq!(to_cents(dec!(1997)).unwrap(), 199_700);
        assert_eq!(to_cents(dec!(49.995)).unwrap(), 5000);
        // Half cents round away from zero, not to even
        assert_eq!(to_cents(dec!(0.125)).unwrap(), 13);
        assert_eq!(to_cents(dec!(0.145)).unwrap(), 15);
        assert_eq!(from_cents(299_700), dec!(2997));
        assert!(to_cents(Decimal::ZERO).is_err());
    }

    #[test]
    fn test_unknown_currency_rejected() {
        assert_eq!(currency("USD").unwrap(), Currency::USD);
        assert_eq!(currency("eur").unwrap(), Currency::EUR);
        assert!(matches!(currency("xyz"), Err(PaymentError::Config(_))));
    }

    #[test]
    fn test_every_pack_currency_maps_to_stripe() {
        for code in commission_core::SUPPORTED_CURRENCIES {
            assert!(currency(code).is_ok(), "{code}");
        }
    }
}
