//! HTTP Handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use commission_core::{
    split_commissions, Actor, Agent, Commission, CommissionRates, Gateway, LedgerError, LedgerStore, Pack,
    PaymentLink, Payout, PayoutStatement, RefundOrigin, RefundOutcome, Sale, SalesTeam, Student, Transition,
};
use commission_payments::{
    parse_stripe_event, sequra, verify_stripe_event, CheckoutRequest as StripeCheckoutRequest, PaymentError,
    SettlementSummary, WebhookOutcome,
};

use crate::state::AppState;

/// Header carrying the caller's agent id, set by the auth proxy
pub const AGENT_HEADER: &str = "x-agent-id";

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;
type Created<T> = Result<(StatusCode, Json<T>), ApiError>;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub stripe_configured: bool,
    pub sequra_webhooks_configured: bool,
    pub settlement_configured: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreatePackRequest {
    pub name: String,
    pub price: Decimal,
    pub rates: CommissionRates,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentLinkRequest {
    pub pack_id: String,
    pub gateway: Gateway,
    #[serde(default)]
    pub team: SalesTeam,
    /// Overrides the pack price
    #[serde(default)]
    pub price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    #[serde(default)]
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct IncidenceRequest {
    pub note: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminNoteRequest {
    #[serde(default)]
    pub admin_note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModifyRequest {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub admin_note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManualSaleRequest {
    pub pack_id: String,
    #[serde(default)]
    pub team: SalesTeam,
    pub student_name: String,
    pub student_email: String,
    /// Bank transfer reference
    pub reference: String,
    /// Defaults to the pack price
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct ManualSaleResponse {
    pub sale: Sale,
    pub commissions: Vec<Commission>,
}

#[derive(Debug, Serialize)]
pub struct PayoutResponse {
    pub statement: PayoutStatement,
    pub payouts: Vec<Payout>,
}

// ============================================================================
// Errors & Caller Identity
// ============================================================================

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

fn ledger_error(e: LedgerError) -> ApiError {
    let (status, code) = match &e {
        LedgerError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        LedgerError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        LedgerError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
        LedgerError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
        LedgerError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        LedgerError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
    };

    if status.is_server_error() {
        tracing::error!("Ledger error: {}", e);
    } else {
        tracing::debug!("Request rejected: {}", e);
    }

    api_error(status, code, e.user_message())
}

fn payment_error(e: PaymentError) -> ApiError {
    let e = match e {
        PaymentError::Ledger(inner) => return ledger_error(inner),
        other => other,
    };

    let (status, code) = match &e {
        PaymentError::WebhookSignature(_) => (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE"),
        PaymentError::WebhookParse(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
        PaymentError::Config(_) => (StatusCode::SERVICE_UNAVAILABLE, "PAYMENTS_DISABLED"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "GATEWAY_ERROR"),
    };

    if status.is_server_error() {
        tracing::error!("Payment error: {}", e);
    } else {
        tracing::warn!("Payment request rejected: {}", e);
    }

    api_error(status, code, e.user_message())
}

fn payments_disabled(gateway: &str) -> ApiError {
    api_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "PAYMENTS_DISABLED",
        format!("{gateway} is not configured"),
    )
}

/// Resolve the calling agent from the auth header
fn actor(state: &AppState, headers: &HeaderMap) -> Result<Actor, ApiError> {
    let agent_id = headers
        .get(AGENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "Missing x-agent-id header"))?;

    let agent = state
        .store
        .get_agent(agent_id)
        .map_err(ledger_error)?
        .filter(|a| a.active)
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "UNKNOWN_AGENT", "Unknown or inactive agent"))?;

    Ok(Actor::from_agent(&agent))
}

fn admin(state: &AppState, headers: &HeaderMap) -> Result<Actor, ApiError> {
    let actor = actor(state, headers)?;
    actor.require_admin().map_err(ledger_error)?;
    Ok(actor)
}

fn transition(state: &AppState, headers: &HeaderMap, id: &str, change: &Transition) -> ApiResult<Commission> {
    let actor = actor(state, headers)?;
    let commission = state
        .store
        .apply_transition(id, change, &actor)
        .map_err(ledger_error)?;
    Ok(Json(commission))
}

// ============================================================================
// Health
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        stripe_configured: state.stripe.is_some(),
        sequra_webhooks_configured: state.sequra_webhook_secret.is_some(),
        settlement_configured: state.settlement.is_some(),
    })
}

// ============================================================================
// Gateway Webhooks
// ============================================================================

/// Stripe webhook handler
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<WebhookOutcome> {
    let stripe = state.stripe.as_ref().ok_or_else(|| payments_disabled("Stripe"))?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "MISSING_SIGNATURE", "Missing Stripe signature"))?;

    let event = verify_stripe_event(&body, signature, stripe.webhook_secret()).map_err(payment_error)?;
    let gateway_event = parse_stripe_event(&event).map_err(payment_error)?;

    let outcome = state.webhook_processor().handle(gateway_event).map_err(payment_error)?;
    tracing::info!(outcome = ?outcome, "Stripe webhook processed");

    Ok(Json(outcome))
}

/// seQura IPN handler
pub async fn sequra_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookOutcome> {
    let secret = state
        .sequra_webhook_secret
        .as_deref()
        .ok_or_else(|| payments_disabled("seQura"))?;

    let signature = headers
        .get(sequra::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "MISSING_SIGNATURE", "Missing seQura signature"))?;

    let gateway_event = sequra::parse_notification(&body, signature, secret).map_err(payment_error)?;

    let outcome = state.webhook_processor().handle(gateway_event).map_err(payment_error)?;
    tracing::info!(outcome = ?outcome, "seQura webhook processed");

    Ok(Json(outcome))
}

// ============================================================================
// Catalogue (admin)
// ============================================================================

/// Register a sales agent
pub async fn create_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateAgentRequest>,
) -> Created<Agent> {
    admin(&state, &headers)?;

    if payload.name.trim().is_empty() || payload.email.trim().is_empty() {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            "Agent name and email are required",
        ));
    }

    let agent = if payload.is_admin {
        Agent::admin(payload.name, payload.email)
    } else {
        Agent::new(payload.name, payload.email)
    };
    state.store.save_agent(&agent).map_err(ledger_error)?;

    tracing::info!(agent_id = %agent.id, is_admin = agent.is_admin, "Created agent");
    Ok((StatusCode::CREATED, Json(agent)))
}

/// Create a pack with its commission rates
pub async fn create_pack(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePackRequest>,
) -> Created<Pack> {
    admin(&state, &headers)?;

    let mut pack = Pack::new(payload.name, payload.price, payload.rates);
    if let Some(currency) = payload.currency {
        pack.currency = currency.to_lowercase();
    }
    state.store.save_pack(&pack).map_err(ledger_error)?;

    tracing::info!(pack_id = %pack.id, price = %pack.price, "Created pack");
    Ok((StatusCode::CREATED, Json(pack)))
}

/// Create a payment link attributing a pack's sales to a team
pub async fn create_payment_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentLinkRequest>,
) -> Created<PaymentLink> {
    admin(&state, &headers)?;

    let pack = state
        .store
        .get_pack(&payload.pack_id)
        .map_err(ledger_error)?
        .ok_or_else(|| ledger_error(LedgerError::not_found("pack", &payload.pack_id)))?;

    let mut link = PaymentLink::new(&pack, payload.gateway, payload.team);
    if let Some(price) = payload.price {
        link = link.with_price(price);
    }
    state.store.save_payment_link(&link).map_err(ledger_error)?;

    tracing::info!(payment_link_id = %link.id, gateway = %link.gateway, "Created payment link");
    Ok((StatusCode::CREATED, Json(link)))
}

/// Create a Stripe checkout session for a payment link
pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<CreateCheckoutRequest>,
) -> ApiResult<CheckoutResponse> {
    admin(&state, &headers)?;
    let stripe = state.stripe.as_ref().ok_or_else(|| payments_disabled("Stripe"))?;

    let mut link = state
        .store
        .get_payment_link(&id)
        .map_err(ledger_error)?
        .ok_or_else(|| ledger_error(LedgerError::not_found("payment link", &id)))?;

    if link.gateway != Gateway::Stripe {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "WRONG_GATEWAY",
            format!("Payment link is for {}, not Stripe", link.gateway),
        ));
    }
    if !link.active {
        return Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, "LINK_INACTIVE", "Payment link is inactive"));
    }

    let pack = state
        .store
        .get_pack(&link.pack_id)
        .map_err(ledger_error)?
        .ok_or_else(|| ledger_error(LedgerError::not_found("pack", &link.pack_id)))?;

    let session = stripe
        .create_checkout_session(StripeCheckoutRequest {
            payment_link: &link,
            pack: &pack,
            customer_email: payload.customer_email.as_deref(),
            success_url: &payload.success_url,
            cancel_url: &payload.cancel_url,
        })
        .await
        .map_err(payment_error)?;

    link.checkout_url = Some(session.checkout_url.clone());
    state.store.save_payment_link(&link).map_err(ledger_error)?;

    Ok(Json(CheckoutResponse {
        checkout_url: session.checkout_url,
        session_id: session.id,
    }))
}

// ============================================================================
// Commission Lifecycle
// ============================================================================

/// The caller's own commissions
pub async fn list_commissions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<Commission>> {
    let actor = actor(&state, &headers)?;
    let commissions = state
        .store
        .commissions_for_agent(&actor.agent_id)
        .map_err(ledger_error)?;
    Ok(Json(commissions))
}

/// Owning agent accepts a commission
pub async fn validate_commission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Commission> {
    transition(&state, &headers, &id, &Transition::Validate)
}

/// Owning agent disputes a commission
pub async fn report_incidence(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<IncidenceRequest>,
) -> ApiResult<Commission> {
    transition(&state, &headers, &id, &Transition::ReportIncidence { note: payload.note })
}

pub async fn resolve_commission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<AdminNoteRequest>,
) -> ApiResult<Commission> {
    transition(&state, &headers, &id, &Transition::Resolve { admin_note: payload.admin_note })
}

/// Admin corrects the agent or amount of a disputed commission and accepts it
pub async fn modify_commission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<ModifyRequest>,
) -> ApiResult<Commission> {
    let modify = Transition::ModifyAndAccept {
        agent_id: payload.agent_id,
        amount: payload.amount,
        admin_note: payload.admin_note,
    };
    transition(&state, &headers, &id, &modify)
}

pub async fn reject_commission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<AdminNoteRequest>,
) -> ApiResult<Commission> {
    transition(&state, &headers, &id, &Transition::Reject { admin_note: payload.admin_note })
}

pub async fn mark_paid(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Commission> {
    transition(&state, &headers, &id, &Transition::MarkPaid)
}

// ============================================================================
// Sales
// ============================================================================

/// Record a bank transfer sale by hand
pub async fn record_manual_sale(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ManualSaleRequest>,
) -> Created<ManualSaleResponse> {
    admin(&state, &headers)?;

    let pack = state
        .store
        .get_pack(&payload.pack_id)
        .map_err(ledger_error)?
        .ok_or_else(|| ledger_error(LedgerError::not_found("pack", &payload.pack_id)))?;

    for agent_id in payload.team.agent_ids() {
        let active = state
            .store
            .get_agent(agent_id)
            .map_err(ledger_error)?
            .is_some_and(|a| a.active);
        if !active {
            return Err(ledger_error(LedgerError::Validation(format!(
                "agent {agent_id} is unknown or inactive"
            ))));
        }
    }

    let student = state
        .store
        .find_or_create_student(Student::new(payload.student_name, payload.student_email))
        .map_err(ledger_error)?;

    let sale = Sale::new(
        &student.id,
        &pack.id,
        Gateway::Transfer,
        payload.reference,
        payload.amount.unwrap_or(pack.price),
        payload.team,
    );
    let commissions = split_commissions(&sale, &pack.rates);
    state.store.record_sale(&sale, &commissions).map_err(ledger_error)?;

    Ok((StatusCode::CREATED, Json(ManualSaleResponse { sale, commissions })))
}

/// Admin refund: cancels every commission of the sale
pub async fn refund_sale(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<RefundOutcome> {
    let actor = actor(&state, &headers)?;
    let outcome = state
        .store
        .refund_sale(&id, RefundOrigin::Admin, &actor)
        .map_err(ledger_error)?;
    Ok(Json(outcome))
}

// ============================================================================
// Payouts & Settlement
// ============================================================================

/// Payout statement and history for an agent (admin or the agent)
pub async fn payout_statement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> ApiResult<PayoutResponse> {
    let actor = actor(&state, &headers)?;
    if !actor.is_admin && actor.agent_id != agent_id {
        return Err(ledger_error(LedgerError::Forbidden(
            "agents can only view their own payouts".into(),
        )));
    }

    if state.store.get_agent(&agent_id).map_err(ledger_error)?.is_none() {
        return Err(ledger_error(LedgerError::not_found("agent", &agent_id)));
    }

    let statement = state.store.payout_statement(&agent_id).map_err(ledger_error)?;
    let payouts = state.store.payouts_for_agent(&agent_id).map_err(ledger_error)?;

    Ok(Json(PayoutResponse { statement, payouts }))
}

/// Pay every payable commission of an agent
pub async fn settle_payout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> Created<Payout> {
    let actor = actor(&state, &headers)?;
    let payout = state.store.settle_payout(&agent_id, &actor).map_err(ledger_error)?;
    Ok((StatusCode::CREATED, Json(payout)))
}

/// Run a seQura settlement pass now
pub async fn run_settlements(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<SettlementSummary> {
    admin(&state, &headers)?;
    let worker = state.settlement.as_ref().ok_or_else(|| payments_disabled("seQura settlement"))?;

    let summary = worker.run_once().await.map_err(payment_error)?;
    Ok(Json(summary))
}
