//! Payout Reconciliation
//!
//! Summarises what an agent is owed and decides which validated commissions
//! can be paid now. A validated commission is payable once its sale has been
//! fully collected; on installment sales still collecting it waits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::commission::{Commission, CommissionStatus};
use crate::model::{new_id, Sale, SaleStatus};

/// A completed payout run for one agent
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payout {
    pub id: String,
    pub agent_id: String,
    pub total: Decimal,
    pub commission_ids: Vec<String>,
    pub paid_by: String,
    pub paid_at: DateTime<Utc>,
}

impl Payout {
    pub fn new(agent_id: impl Into<String>, paid_by: impl Into<String>, commissions: &[Commission]) -> Self {
        Self {
            id: new_id(),
            agent_id: agent_id.into(),
            total: commissions.iter().map(|c| c.amount).sum(),
            commission_ids: commissions.iter().map(|c| c.id.clone()).collect(),
            paid_by: paid_by.into(),
            paid_at: Utc::now(),
        }
    }
}

/// Where a validated commission stands for payment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Payability {
    Payable,
    AwaitingCollection,
    NotValidated,
}

/// Decide whether a commission can be paid given its sale
pub fn payability(commission: &Commission, sale: Option<&Sale>) -> Payability {
    if commission.status != CommissionStatus::Validated {
        return Payability::NotValidated;
    }

    match sale.map(|s| s.status) {
        Some(SaleStatus::Collected) => Payability::Payable,
        _ => Payability::AwaitingCollection,
    }
}

/// Totals by status plus the commissions payable now
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PayoutStatement {
    pub agent_id: String,
    pub pending: Decimal,
    pub incidence: Decimal,
    pub validated: Decimal,
    pub paid: Decimal,
    pub payable: Decimal,
    pub awaiting_collection: Decimal,
    pub payable_commissions: Vec<Commission>,
}

impl PayoutStatement {
    /// Build a statement from an agent's commissions and the sales they belong to
    pub fn build(agent_id: impl Into<String>, commissions: &[Commission], sales: &HashMap<String, Sale>) -> Self {
        let mut statement = Self {
            agent_id: agent_id.into(),
            ..Self::default()
        };

        for commission in commissions {
            match commission.status {
                CommissionStatus::Pending => statement.pending += commission.amount,
                CommissionStatus::Incidence => statement.incidence += commission.amount,
                CommissionStatus::Validated => statement.validated += commission.amount,
                CommissionStatus::Paid => statement.paid += commission.amount,
                CommissionStatus::Cancelled => {}
            }

            match payability(commission, sales.get(&commission.sale_id)) {
                Payability::Payable => {
                    statement.payable += commission.amount;
                    statement.payable_commissions.push(commission.clone());
                }
                Payability::AwaitingCollection => statement.awaiting_collection += commission.amount,
                Payability::NotValidated => {}
            }
        }

        statement
    }
}
