//! seQura Settlement Reconciliation
//!
//! Polls the settlement source for every installment sale still collecting
//! and credits the milestones it reports. A cancelled order is treated as a
//! gateway refund.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use commission_core::{Actor, LedgerStore, RefundOrigin, RefundOutcome, Sale};

use crate::error::Result;
use crate::sequra::{OrderState, SettlementClient};

/// Result of one reconciliation pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SettlementSummary {
    /// Open installment sales looked at
    pub checked: usize,
    /// Sales that received at least one milestone credit
    pub credited_sales: usize,
    pub credited_amount: Decimal,
    /// Sales refunded because the order was cancelled
    pub refunded: usize,
    /// Sales whose lookup or update failed this pass
    pub failed: usize,
}

/// Periodic settlement poller
pub struct SettlementWorker<S: LedgerStore> {
    store: Arc<S>,
    client: Arc<dyn SettlementClient>,
    interval: Duration,
}

impl<S: LedgerStore + 'static> SettlementWorker<S> {
    pub fn new(store: Arc<S>, client: Arc<dyn SettlementClient>, interval: Duration) -> Self {
        Self { store, client, interval }
    }

    /// Reconcile every open installment sale once.
    ///
    /// Failures on one sale are logged and counted; the pass continues.
    pub async fn run_once(&self) -> Result<SettlementSummary> {
        let sales = self.store.open_installment_sales()?;
        let mut summary = SettlementSummary {
            checked: sales.len(),
            ..SettlementSummary::default()
        };

        for sale in &sales {
            match self.reconcile(sale).await {
                Ok(Reconciled::Credited(amount)) => {
                    summary.credited_sales += 1;
                    summary.credited_amount += amount;
                }
                Ok(Reconciled::Refunded) => summary.refunded += 1,
                Ok(Reconciled::Unchanged) => {}
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        sale_id = %sale.id,
                        external_ref = %sale.external_ref,
                        client = self.client.name(),
                        error = %e,
                        "Settlement reconciliation failed"
                    );
                }
            }
        }

        tracing::info!(
            checked = summary.checked,
            credited_sales = summary.credited_sales,
            credited_amount = %summary.credited_amount,
            refunded = summary.refunded,
            failed = summary.failed,
            "Settlement pass complete"
        );

        Ok(summary)
    }

    async fn reconcile(&self, sale: &Sale) -> Result<Reconciled> {
        let settlement = self.client.order_settlement(&sale.external_ref).await?;

        if settlement.state == OrderState::Cancelled {
            let outcome = self
                .store
                .refund_sale(&sale.id, RefundOrigin::Gateway, &Actor::system())?;
            return Ok(match outcome {
                RefundOutcome::Refunded { .. } => Reconciled::Refunded,
                RefundOutcome::AlreadyRefunded { .. } => Reconciled::Unchanged,
            });
        }

        let credits = self.store.credit_milestones(&sale.id, &settlement.reached())?;
        if credits.is_empty() {
            return Ok(Reconciled::Unchanged);
        }
        Ok(Reconciled::Credited(credits.iter().map(|c| c.amount).sum()))
    }

    /// Run passes forever on the configured interval
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                interval_secs = self.interval.as_secs(),
                client = self.client.name(),
                "Settlement worker started"
            );

            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    tracing::error!(error = %e, "Settlement pass aborted");
                }
            }
        })
    }
}

enum Reconciled {
    Credited(Decimal),
    Refunded,
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequra::{MockSettlementClient, OrderSettlement};
    use commission_core::{
        split_commissions, Agent, CommissionRates, CommissionStatus, Gateway, MemoryLedgerStore, Pack,
        SaleStatus, SalesTeam, Student,
    };
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<MemoryLedgerStore>,
        client: Arc<MockSettlementClient>,
        sale: Sale,
    }

    fn fixture(gateway: Gateway, external_ref: &str) -> Fixture {
        let store = Arc::new(MemoryLedgerStore::new());
        let closer = Agent::new("Closer", "closer@example.com");
        store.save_agent(&closer).unwrap();

        let pack = Pack::new("Bootcamp", dec!(1000), CommissionRates::new(dec!(0), dec!(10), dec!(0)));
        store.save_pack(&pack).unwrap();
        let student = store.find_or_create_student(Student::new("Ana", "ana@example.com")).unwrap();

        let team = SalesTeam {
            coach_id: None,
            closer_id: Some(closer.id.clone()),
            setter_id: None,
        };
        let sale = Sale::new(&student.id, &pack.id, gateway, external_ref, dec!(1000), team);
        let commissions = split_commissions(&sale, &pack.rates);
        store.record_sale(&sale, &commissions).unwrap();

        Fixture {
            store,
            client: Arc::new(MockSettlementClient::new()),
            sale,
        }
    }

    impl Fixture {
        fn worker(&self) -> SettlementWorker<MemoryLedgerStore> {
            SettlementWorker::new(self.store.clone(), self.client.clone(), Duration::from_secs(60))
        }
    }

    #[tokio::test]
    async fn test_credits_reached_milestones() {
        let f = fixture(Gateway::Sequra, "SQ-1");
        f.client.set(OrderSettlement::confirmed("SQ-1", 2)).await;

        let summary = f.worker().run_once().await.unwrap();

        assert_eq!(summary.checked, 1);
        assert_eq!(summary.credited_sales, 1);
        assert_eq!(summary.credited_amount, dec!(850));

        let sale = f.store.get_sale(&f.sale.id).unwrap().unwrap();
        assert_eq!(sale.amount_collected, dec!(850));
        assert_eq!(sale.status, SaleStatus::Collecting);
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent_until_progress() {
        let f = fixture(Gateway::Sequra, "SQ-1");
        f.client.set(OrderSettlement::confirmed("SQ-1", 1)).await;
        let worker = f.worker();

        worker.run_once().await.unwrap();
        let again = worker.run_once().await.unwrap();
        assert_eq!(again.credited_sales, 0);

        f.client.set(OrderSettlement::confirmed("SQ-1", 3)).await;
        let last = worker.run_once().await.unwrap();
        assert_eq!(last.credited_amount, dec!(300));

        let sale = f.store.get_sale(&f.sale.id).unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Collected);
        assert_eq!(sale.amount_collected, dec!(1000));

        // Collected sales drop out of the poll
        assert_eq!(worker.run_once().await.unwrap().checked, 0);
    }

    #[tokio::test]
    async fn test_cancelled_order_refunds_sale() {
        let f = fixture(Gateway::Sequra, "SQ-9");
        f.client.set(OrderSettlement::cancelled("SQ-9")).await;

        let summary = f.worker().run_once().await.unwrap();
        assert_eq!(summary.refunded, 1);

        let sale = f.store.get_sale(&f.sale.id).unwrap().unwrap();
        assert!(sale.is_refunded());
        let commissions = f.store.commissions_for_sale(&f.sale.id).unwrap();
        assert!(commissions.iter().all(|c| c.status == CommissionStatus::Incidence));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_counted_not_fatal() {
        let f = fixture(Gateway::Sequra, "SQ-unknown");

        let summary = f.worker().run_once().await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_single_payment_sales_are_not_polled() {
        let f = fixture(Gateway::Stripe, "pi_1");
        let summary = f.worker().run_once().await.unwrap();
        assert_eq!(summary, SettlementSummary::default());
    }
}
