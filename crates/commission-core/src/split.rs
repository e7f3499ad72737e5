//! Commission Split
//!
//! Turns a recorded sale into one pending commission per credited role.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::commission::Commission;
use crate::model::{CommissionRates, Role, Sale};

/// Round a money amount to cents, midpoint away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Commission owed for a role at `rate` percent of `total`
pub fn commission_amount(total: Decimal, rate: Decimal) -> Decimal {
    round_money(total * rate / dec!(100))
}

/// Build the pending commissions for a sale.
///
/// Roles without an assigned agent or with a zero rate earn nothing.
/// Amounts are computed on the full sale total, also for installment sales.
pub fn split_commissions(sale: &Sale, rates: &CommissionRates) -> Vec<Commission> {
    Role::ALL
        .into_iter()
        .filter_map(|role| {
            let agent_id = sale.team.agent_for(role)?;
            let rate = rates.for_role(role);
            if rate <= Decimal::ZERO {
                return None;
            }

            let amount = commission_amount(sale.amount_total, rate);
            (amount > Decimal::ZERO).then(|| Commission::new(&sale.id, agent_id, role, amount))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commission::CommissionStatus;
    use crate::model::{Gateway, SalesTeam};

    fn team() -> SalesTeam {
        SalesTeam {
            coach_id: Some("coach".into()),
            closer_id: Some("closer".into()),
            setter_id: None,
        }
    }

    #[test]
    fn test_split_per_role() {
        let sale = Sale::new("st", "pk", Gateway::Stripe, "pi_1", dec!(2997), team());
        let rates = CommissionRates::new(dec!(10), dec!(8), dec!(3));

        let commissions = split_commissions(&sale, &rates);

        assert_eq!(commissions.len(), 2);
        let coach = commissions.iter().find(|c| c.role == Role::Coach).unwrap();
        let closer = commissions.iter().find(|c| c.role == Role::Closer).unwrap();
        assert_eq!(coach.amount, dec!(299.70));
        assert_eq!(closer.amount, dec!(239.76));
        assert!(commissions.iter().all(|c| c.status == CommissionStatus::Pending));
        assert!(commissions.iter().all(|c| c.sale_id == sale.id));
    }

    #[test]
    fn test_zero_rate_earns_nothing() {
        let sale = Sale::new("st", "pk", Gateway::Stripe, "pi_1", dec!(1000), team());
        let rates = CommissionRates::new(dec!(0), dec!(5), dec!(5));

        let commissions = split_commissions(&sale, &rates);

        assert_eq!(commissions.len(), 1);
        assert_eq!(commissions[0].agent_id, "closer");
    }

    #[test]
    fn test_rounding_midpoint_away_from_zero() {
        assert_eq!(commission_amount(dec!(0.25), dec!(10)), dec!(0.03));
        assert_eq!(commission_amount(dec!(333.33), dec!(7.5)), dec!(25.00));
    }
}
