//! seQura Installment Milestones
//!
//! seQura disburses a financed sale in three milestones: 70 % when the order
//! is confirmed, then 15 % and 15 %. Each milestone is credited at most once,
//! gated by its own flag, so repeated settlement polls never double-count.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::model::{Sale, SaleStatus};
use crate::split::round_money;

/// One of the three seQura disbursements
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Milestone {
    First,
    Second,
    Third,
}

impl Milestone {
    pub const ALL: [Milestone; 3] = [Milestone::First, Milestone::Second, Milestone::Third];

    /// Share of the sale total, in percent
    pub fn share(&self) -> Decimal {
        match self {
            Milestone::First => dec!(70),
            Milestone::Second => dec!(15),
            Milestone::Third => dec!(15),
        }
    }

    /// Milestone from its 1-based position
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            1 => Some(Milestone::First),
            2 => Some(Milestone::Second),
            3 => Some(Milestone::Third),
            _ => None,
        }
    }
}

/// Per-milestone credit flags of a sale
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequraMilestones {
    pub first: bool,
    pub second: bool,
    pub third: bool,
}

impl SequraMilestones {
    pub fn is_credited(&self, milestone: Milestone) -> bool {
        match milestone {
            Milestone::First => self.first,
            Milestone::Second => self.second,
            Milestone::Third => self.third,
        }
    }

    fn mark(&mut self, milestone: Milestone) {
        match milestone {
            Milestone::First => self.first = true,
            Milestone::Second => self.second = true,
            Milestone::Third => self.third = true,
        }
    }

    pub fn all_credited(&self) -> bool {
        self.first && self.second && self.third
    }
}

/// Money credited to a sale for one milestone
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneCredit {
    pub milestone: Milestone,
    pub amount: Decimal,
}

/// Credit every milestone up to the highest one reached.
///
/// Disbursements are sequential, so reaching the third milestone implies the
/// first two. Already-credited milestones are skipped. The last milestone
/// takes whatever remains so the collected total matches the sale exactly.
pub fn credit_milestones(sale: &mut Sale, reached: &[Milestone]) -> Result<Vec<MilestoneCredit>> {
    if !sale.gateway.is_installment() {
        return Err(LedgerError::Validation(format!(
            "sale {} is not an installment sale ({})",
            sale.id, sale.gateway
        )));
    }
    if sale.is_refunded() {
        return Err(LedgerError::Validation(format!(
            "sale {} is refunded and cannot collect",
            sale.id
        )));
    }

    let Some(highest) = reached.iter().max().copied() else {
        return Ok(Vec::new());
    };

    let mut credits = Vec::new();
    for milestone in Milestone::ALL.into_iter().filter(|m| *m <= highest) {
        if sale.milestones.is_credited(milestone) {
            continue;
        }

        let amount = if milestone == Milestone::Third {
            sale.outstanding()
        } else {
            round_money(sale.amount_total * milestone.share() / dec!(100)).min(sale.outstanding())
        };

        sale.amount_collected += amount;
        sale.milestones.mark(milestone);
        credits.push(MilestoneCredit { milestone, amount });
    }

    if sale.milestones.all_credited() {
        sale.status = SaleStatus::Collected;
    }

    if !credits.is_empty() {
        tracing::info!(
            sale_id = %sale.id,
            credited = credits.len(),
            amount_collected = %sale.amount_collected,
            amount_total = %sale.amount_total,
            "Credited seQura milestones"
        );
    }

    Ok(credits)
}
