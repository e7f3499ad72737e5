//! seQura Integration
//!
//! Two halves:
//!
//! - **IPN webhooks**: JSON notifications signed with HMAC-SHA256 (hex, in the
//!   `x-sequra-signature` header) for order approval, cancellation and refund.
//! - **Settlement API**: the merchant API reports how many of the three
//!   disbursement milestones of an order have been paid out. The
//!   [`crate::settlement::SettlementWorker`] polls it.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use commission_core::{Gateway, Milestone};

use crate::error::{PaymentError, Result};
use crate::webhook::{CompletedPayment, GatewayEvent};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the IPN signature
pub const SIGNATURE_HEADER: &str = "x-sequra-signature";

/// Customer block of an IPN
#[derive(Clone, Debug, Deserialize)]
pub struct SequraCustomer {
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// Instant payment notification body
#[derive(Clone, Debug, Deserialize)]
pub struct SequraNotification {
    /// approved, cancelled, refunded, ...
    pub event: String,
    #[serde(default)]
    pub event_id: Option<String>,
    pub order_ref: String,
    #[serde(default)]
    pub payment_link_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub customer: Option<SequraCustomer>,
}

/// Verify the hex HMAC-SHA256 signature of an IPN body
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> Result<()> {
    let expected = hex::decode(signature.trim())
        .map_err(|_| PaymentError::WebhookSignature("signature is not hex".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Config(format!("invalid seQura secret: {e}")))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| PaymentError::WebhookSignature("signature mismatch".into()))
}

/// Sign an IPN body (used by tests and local tooling)
pub fn sign(body: &[u8], secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Config(format!("invalid seQura secret: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify and parse an IPN into a gateway event
pub fn parse_notification(body: &[u8], signature: &str, secret: &str) -> Result<GatewayEvent> {
    verify_signature(body, signature, secret)?;

    let notification: SequraNotification =
        serde_json::from_slice(body).map_err(|e| PaymentError::WebhookParse(e.to_string()))?;

    if notification.order_ref.trim().is_empty() {
        return Err(PaymentError::WebhookParse("missing order_ref".into()));
    }

    let event = match notification.event.as_str() {
        "approved" => {
            let customer = notification.customer.unwrap_or(SequraCustomer {
                email: None,
                full_name: None,
            });
            GatewayEvent::PaymentCompleted(CompletedPayment {
                gateway: Gateway::Sequra,
                event_id: notification.event_id,
                external_ref: notification.order_ref,
                payment_link_id: notification.payment_link_id,
                customer_email: customer.email,
                customer_name: customer.full_name,
                amount: notification.amount,
            })
        }
        "cancelled" | "refunded" => GatewayEvent::Refunded {
            gateway: Gateway::Sequra,
            event_id: notification.event_id,
            external_ref: notification.order_ref,
        },
        other => GatewayEvent::Other {
            event_type: format!("sequra.{other}"),
        },
    };

    Ok(event)
}

/// Lifecycle state of a financed order on seQura's side
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Confirmed,
    Cancelled,
}

/// Settlement progress of one order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSettlement {
    pub order_ref: String,
    pub state: OrderState,
    /// Number of milestones disbursed so far (0 to 3)
    pub disbursed_milestones: u8,
}

impl OrderSettlement {
    pub fn confirmed(order_ref: impl Into<String>, disbursed_milestones: u8) -> Self {
        Self {
            order_ref: order_ref.into(),
            state: OrderState::Confirmed,
            disbursed_milestones,
        }
    }

    pub fn cancelled(order_ref: impl Into<String>) -> Self {
        Self {
            order_ref: order_ref.into(),
            state: OrderState::Cancelled,
            disbursed_milestones: 0,
        }
    }

    /// Milestones reached, in order
    pub fn reached(&self) -> Vec<Milestone> {
        (1..=self.disbursed_milestones.min(3))
            .filter_map(Milestone::from_index)
            .collect()
    }
}

/// Settlement source (Strategy pattern)
///
/// The HTTP client talks to the merchant API; the mock serves tests and dev.
#[async_trait]
pub trait SettlementClient: Send + Sync {
    /// Current settlement progress of an order
    async fn order_settlement(&self, order_ref: &str) -> Result<OrderSettlement>;

    /// Client name
    fn name(&self) -> &str;
}

/// Upper bound on one merchant API call, connect included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// seQura merchant API client
pub struct HttpSettlementClient {
    http: reqwest::Client,
    base_url: String,
    merchant: String,
    user: String,
    password: String,
}

impl HttpSettlementClient {
    pub fn new(
        base_url: impl Into<String>,
        merchant: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            merchant: merchant.into(),
            user: user.into(),
            password: password.into(),
        })
    }

    /// Replace the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| PaymentError::Config(format!("{name} not set")))
        };

        Self::new(
            var("SEQURA_API_URL")?,
            var("SEQURA_MERCHANT")?,
            var("SEQURA_USER")?,
            var("SEQURA_PASSWORD")?,
        )
    }
}

#[async_trait]
impl SettlementClient for HttpSettlementClient {
    async fn order_settlement(&self, order_ref: &str) -> Result<OrderSettlement> {
        let url = format!(
            "{}/merchants/{}/orders/{}/settlement",
            self.base_url, self.merchant, order_ref
        );

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PaymentError::Sequra(format!(
                "settlement lookup for {order_ref} returned {}",
                response.status()
            )));
        }

        Ok(response.json::<OrderSettlement>().await?)
    }

    fn name(&self) -> &str {
        "seQura"
    }
}

/// Mock settlement client with scripted order states
#[derive(Default)]
pub struct MockSettlementClient {
    orders: RwLock<HashMap<String, OrderSettlement>>,
}

impl MockSettlementClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the settlement state returned for an order
    pub async fn set(&self, settlement: OrderSettlement) {
        self.orders
            .write()
            .await
            .insert(settlement.order_ref.clone(), settlement);
    }
}

#[async_trait]
impl SettlementClient for MockSettlementClient {
    async fn order_settlement(&self, order_ref: &str) -> Result<OrderSettlement> {
        self.orders
            .read()
            .await
            .get(order_ref)
            .cloned()
            .ok_or_else(|| PaymentError::Sequra(format!("unknown order {order_ref}")))
    }

    fn name(&self) -> &str {
        "MockSettlement"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SECRET: &str = "sq_secret";

    fn signed(body: &str) -> (Vec<u8>, String) {
        let bytes = body.as_bytes().to_vec();
        let signature = sign(&bytes, SECRET).unwrap();
        (bytes, signature)
    }

    #[test]
    fn test_approved_notification() {
        let (body, signature) = signed(
            r#"{"event":"approved","event_id":"ipn-1","order_ref":"SQ-77","payment_link_id":"link-1",
                "amount":"1800.00","customer":{"email":"ana@example.com","full_name":"Ana"}}"#,
        );

        let event = parse_notification(&body, &signature, SECRET).unwrap();

        let GatewayEvent::PaymentCompleted(payment) = event else {
            panic!("expected payment, got {event:?}");
        };
        assert_eq!(payment.gateway, Gateway::Sequra);
        assert_eq!(payment.external_ref, "SQ-77");
        assert_eq!(payment.amount, Some(dec!(1800)));
        assert_eq!(payment.customer_email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn test_cancelled_notification_is_refund() {
        let (body, signature) = signed(r#"{"event":"cancelled","order_ref":"SQ-77"}"#);
        let event = parse_notification(&body, &signature, SECRET).unwrap();
        assert!(matches!(event, GatewayEvent::Refunded { gateway: Gateway::Sequra, .. }));
    }

    #[test]
    fn test_unknown_event_is_other() {
        let (body, signature) = signed(r#"{"event":"on_hold","order_ref":"SQ-77"}"#);
        let event = parse_notification(&body, &signature, SECRET).unwrap();
        assert_eq!(event, GatewayEvent::Other { event_type: "sequra.on_hold".into() });
    }

    #[test]
    fn test_tampered_body_rejected() {
        let (_, signature) = signed(r#"{"event":"approved","order_ref":"SQ-77"}"#);
        let tampered = br#"{"event":"approved","order_ref":"SQ-78"}"#;
        assert!(matches!(
            parse_notification(tampered, &signature, SECRET),
            Err(PaymentError::WebhookSignature(_))
        ));
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        let (body, _) = signed(r#"{"event":"approved","order_ref":"SQ-77"}"#);
        assert!(matches!(
            verify_signature(&body, "not-hex!", SECRET),
            Err(PaymentError::WebhookSignature(_))
        ));
    }

    #[test]
    fn test_reached_milestones() {
        assert!(OrderSettlement::confirmed("a", 0).reached().is_empty());
        assert_eq!(
            OrderSettlement::confirmed("a", 2).reached(),
            vec![Milestone::First, Milestone::Second]
        );
        assert_eq!(OrderSettlement::confirmed("a", 9).reached().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_client() {
        let client = MockSettlementClient::new();
        client.set(OrderSettlement::confirmed("SQ-1", 1)).await;

        let settlement = client.order_settlement("SQ-1").await.unwrap();
        assert_eq!(settlement.disbursed_milestones, 1);
        assert!(client.order_settlement("SQ-2").await.is_err());
    }

    #[tokio::test]
    async fn test_unresponsive_merchant_api_times_out() {
        // Accepts the connection and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = HttpSettlementClient::new(format!("http://{addr}/"), "m", "u", "p")
            .unwrap()
            .with_timeout(Duration::from_millis(200))
            .unwrap();
        assert_eq!(client.base_url, format!("http://{addr}"));

        let err = client.order_settlement("SQ-1").await.unwrap_err();
        match err {
            PaymentError::Network(e) => assert!(e.is_timeout(), "{e}"),
            other => panic!("expected a network timeout, got {other:?}"),
        }
    }
}
