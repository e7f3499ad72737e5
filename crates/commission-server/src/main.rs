//! commission-desk HTTP Server
//!
//! Axum-based server for the commission ledger: gateway webhooks, commission
//! validation and incidences, refunds, payouts and seQura settlement.
//!
//! Callers are identified by the `x-agent-id` header set by the upstream
//! auth proxy.

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use axum::{routing::{get, post}, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commission_core::{Agent, LedgerStore, MemoryLedgerStore};
use commission_payments::{HttpSettlementClient, SettlementWorker, StripeClient};

use crate::config::Config;
use crate::handlers::{
    create_agent, create_checkout, create_pack, create_payment_link, health_check, list_commissions,
    mark_paid, modify_commission, payout_statement, record_manual_sale, refund_sale, reject_commission,
    report_incidence, resolve_commission, run_settlements, sequra_webhook, settle_payout, stripe_webhook,
    validate_commission,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    let config = Config::from_env();

    let store = Arc::new(MemoryLedgerStore::new());
    if let Some(email) = &config.bootstrap_admin_email {
        bootstrap_admin(&store, email)?;
    }

    // Initialize payments
    let stripe = StripeClient::from_env().ok();
    if stripe.is_some() {
        tracing::info!("✓ Stripe configured");
    } else {
        tracing::warn!("⚠ Stripe not configured - Stripe checkout and webhooks disabled");
        tracing::warn!("  Set STRIPE_SECRET_KEY and STRIPE_WEBHOOK_SECRET in .env");
    }

    if config.sequra_webhook_secret.is_some() {
        tracing::info!("✓ seQura webhooks configured");
    } else {
        tracing::warn!("⚠ SEQURA_WEBHOOK_SECRET not set - seQura webhooks disabled");
    }

    let settlement = match HttpSettlementClient::from_env() {
        Ok(client) => {
            let worker = Arc::new(SettlementWorker::new(
                store.clone(),
                Arc::new(client),
                config.settlement_interval,
            ));
            worker.clone().spawn();
            Some(worker)
        }
        Err(e) => {
            tracing::warn!("⚠ seQura settlement polling disabled: {}", e);
            None
        }
    };

    // Build application state
    let state = AppState {
        store,
        stripe: stripe.map(Arc::new),
        sequra_webhook_secret: config.sequra_webhook_secret.as_deref().map(Arc::from),
        settlement,
    };

    let app = app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 commission-desk running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                          - Health check");
    tracing::info!("  POST /webhook/stripe                  - Stripe events");
    tracing::info!("  POST /webhook/sequra                  - seQura IPN");
    tracing::info!("  GET  /api/commissions                 - Own commissions");
    tracing::info!("  POST /api/commissions/{{id}}/<action>   - Commission lifecycle");
    tracing::info!("  GET  /api/payouts/{{agent_id}}          - Payout statement");
    tracing::info!("  POST /api/settlements/run             - Poll seQura now");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router
fn app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))

        // Gateway webhooks
        .route("/webhook/stripe", post(stripe_webhook))
        .route("/webhook/sequra", post(sequra_webhook))

        // Catalogue
        .route("/api/agents", post(create_agent))
        .route("/api/packs", post(create_pack))
        .route("/api/payment-links", post(create_payment_link))
        .route("/api/payment-links/{id}/checkout", post(create_checkout))

        // Commission lifecycle
        .route("/api/commissions", get(list_commissions))
        .route("/api/commissions/{id}/validate", post(validate_commission))
        .route("/api/commissions/{id}/incidence", post(report_incidence))
        .route("/api/commissions/{id}/resolve", post(resolve_commission))
        .route("/api/commissions/{id}/modify", post(modify_commission))
        .route("/api/commissions/{id}/reject", post(reject_commission))
        .route("/api/commissions/{id}/pay", post(mark_paid))

        // Sales
        .route("/api/sales/manual", post(record_manual_sale))
        .route("/api/sales/{id}/refund", post(refund_sale))

        // Payouts & settlement
        .route("/api/payouts/{agent_id}", get(payout_statement))
        .route("/api/payouts/{agent_id}/settle", post(settle_payout))
        .route("/api/settlements/run", post(run_settlements))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Create the first admin agent if no agent owns the email yet
fn bootstrap_admin(store: &MemoryLedgerStore, email: &str) -> anyhow::Result<()> {
    if let Some(existing) = store.find_agent_by_email(email)? {
        tracing::info!(agent_id = %existing.id, "Bootstrap admin already present");
        return Ok(());
    }

    let admin = Agent::admin("Admin", email);
    store.save_agent(&admin)?;
    tracing::info!(agent_id = %admin.id, email = %admin.email, "Created bootstrap admin");
    Ok(())
}
