//! Domain Models
//!
//! Agents, students, packs, payment links and sales.
//! Uses `rust_decimal` for all monetary values.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::installment::SequraMilestones;

/// Generate a new random identifier
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Sales role that earns a commission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Coach,
    Closer,
    Setter,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Coach, Role::Closer, Role::Setter];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Coach => "coach",
            Role::Closer => "closer",
            Role::Setter => "setter",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment gateway a sale came through
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    Stripe,
    Sequra,
    /// Manual bank transfer recorded by an admin
    Transfer,
}

impl Gateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gateway::Stripe => "stripe",
            Gateway::Sequra => "sequra",
            Gateway::Transfer => "transfer",
        }
    }

    /// Whether the gateway settles in installments
    pub fn is_installment(&self) -> bool {
        matches!(self, Gateway::Sequra)
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sales team member who can earn commissions
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Admins can resolve incidences and pay out commissions
    pub is_admin: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            email: email.into().trim().to_lowercase(),
            is_admin: false,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn admin(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::new(name, email)
        }
    }
}

/// The authenticated caller of an operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub agent_id: String,
    pub is_admin: bool,
}

impl Actor {
    pub fn from_agent(agent: &Agent) -> Self {
        Self {
            agent_id: agent.id.clone(),
            is_admin: agent.is_admin,
        }
    }

    /// Actor used for changes driven by gateway events
    pub fn system() -> Self {
        Self {
            agent_id: "system".into(),
            is_admin: false,
        }
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(LedgerError::Forbidden("admin rights required".into()))
        }
    }
}

/// A student who bought a pack
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn new(full_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            full_name: full_name.into(),
            email: email.into().trim().to_lowercase(),
            phone: None,
            created_at: Utc::now(),
        }
    }
}

/// Per-role commission rates, in percent of the sale total
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRates {
    pub coach: Decimal,
    pub closer: Decimal,
    pub setter: Decimal,
}

impl CommissionRates {
    pub fn new(coach: Decimal, closer: Decimal, setter: Decimal) -> Self {
        Self { coach, closer, setter }
    }

    pub fn for_role(&self, role: Role) -> Decimal {
        match role {
            Role::Coach => self.coach,
            Role::Closer => self.closer,
            Role::Setter => self.setter,
        }
    }

    /// Each rate must lie in [0, 100] and together they cannot exceed 100
    pub fn validate(&self) -> Result<()> {
        for role in Role::ALL {
            let rate = self.for_role(role);
            if rate < Decimal::ZERO || rate > dec!(100) {
                return Err(LedgerError::Validation(format!(
                    "{role} rate must be between 0 and 100, got {rate}"
                )));
            }
        }

        let total = self.coach + self.closer + self.setter;
        if total > dec!(100) {
            return Err(LedgerError::Validation(format!(
                "commission rates add up to {total}%, more than the sale"
            )));
        }

        Ok(())
    }
}

/// A sellable product (program, mentorship, course bundle)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pack {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    pub rates: CommissionRates,
    pub active: bool,
}

/// Lowercase ISO codes a pack can be sold in
pub const SUPPORTED_CURRENCIES: [&str; 3] = ["eur", "usd", "gbp"];

impl Pack {
    pub fn new(name: impl Into<String>, price: Decimal, rates: CommissionRates) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            price,
            currency: "eur".into(),
            rates,
            active: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::Validation("pack name is required".into()));
        }
        if self.price <= Decimal::ZERO {
            return Err(LedgerError::Validation("pack price must be positive".into()));
        }
        if !SUPPORTED_CURRENCIES.contains(&self.currency.as_str()) {
            return Err(LedgerError::Validation(format!(
                "unsupported currency '{}', expected one of {}",
                self.currency,
                SUPPORTED_CURRENCIES.join(", ")
            )));
        }
        self.rates.validate()
    }
}

/// Agents credited on a sale, one optional agent per role
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesTeam {
    pub coach_id: Option<String>,
    pub closer_id: Option<String>,
    pub setter_id: Option<String>,
}

impl SalesTeam {
    pub fn agent_for(&self, role: Role) -> Option<&str> {
        match role {
            Role::Coach => self.coach_id.as_deref(),
            Role::Closer => self.closer_id.as_deref(),
            Role::Setter => self.setter_id.as_deref(),
        }
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = &str> {
        Role::ALL.into_iter().filter_map(|role| self.agent_for(role))
    }
}

/// A checkout link for a pack, attributed to a sales team
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentLink {
    pub id: String,
    pub pack_id: String,
    pub gateway: Gateway,
    pub price: Decimal,
    pub team: SalesTeam,
    pub active: bool,
    /// Hosted checkout URL, once created on the gateway
    pub checkout_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentLink {
    pub fn new(pack: &Pack, gateway: Gateway, team: SalesTeam) -> Self {
        Self {
            id: new_id(),
            pack_id: pack.id.clone(),
            gateway,
            price: pack.price,
            team,
            active: true,
            checkout_url: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = price;
        self
    }
}

/// Collection state of a sale
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    /// Money is still arriving (installment gateways)
    Collecting,
    /// The full amount has been collected
    Collected,
    Refunded,
}

/// A completed purchase of a pack by a student
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sale {
    pub id: String,
    pub student_id: String,
    pub pack_id: String,
    pub payment_link_id: Option<String>,
    pub gateway: Gateway,
    /// Gateway-side reference (payment intent, order ref, transfer id)
    pub external_ref: String,
    pub amount_total: Decimal,
    pub amount_collected: Decimal,
    pub status: SaleStatus,
    pub team: SalesTeam,
    pub milestones: SequraMilestones,
    pub created_at: DateTime<Utc>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Sale {
    /// Create a sale; single-payment gateways collect the full amount upfront
    pub fn new(
        student_id: impl Into<String>,
        pack_id: impl Into<String>,
        gateway: Gateway,
        external_ref: impl Into<String>,
        amount_total: Decimal,
        team: SalesTeam,
    ) -> Self {
        let (amount_collected, status) = if gateway.is_installment() {
            (Decimal::ZERO, SaleStatus::Collecting)
        } else {
            (amount_total, SaleStatus::Collected)
        };

        Self {
            id: new_id(),
            student_id: student_id.into(),
            pack_id: pack_id.into(),
            payment_link_id: None,
            gateway,
            external_ref: external_ref.into(),
            amount_total,
            amount_collected,
            status,
            team,
            milestones: SequraMilestones::default(),
            created_at: Utc::now(),
            refunded_at: None,
        }
    }

    pub fn with_payment_link(mut self, payment_link_id: impl Into<String>) -> Self {
        self.payment_link_id = Some(payment_link_id.into());
        self
    }

    pub fn is_refunded(&self) -> bool {
        self.status == SaleStatus::Refunded
    }

    pub fn outstanding(&self) -> Decimal {
        (self.amount_total - self.amount_collected).max(Decimal::ZERO)
    }

    pub fn validate(&self) -> Result<()> {
        if self.amount_total <= Decimal::ZERO {
            return Err(LedgerError::Validation("sale amount must be positive".into()));
        }
        if self.external_ref.trim().is_empty() {
            return Err(LedgerError::Validation("sale needs an external reference".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_over_hundred_rejected() {
        let rates = CommissionRates::new(dec!(50), dec!(40), dec!(20));
        assert!(matches!(rates.validate(), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_negative_rate_rejected() {
        let rates = CommissionRates::new(dec!(-1), dec!(10), dec!(0));
        assert!(rates.validate().is_err());
    }

    #[test]
    fn test_pack_rejects_unknown_currency() {
        let mut pack = Pack::new("Mentoring", dec!(1500), CommissionRates::new(dec!(10), dec!(10), dec!(5)));
        assert!(pack.validate().is_ok());

        pack.currency = "gbp".into();
        assert!(pack.validate().is_ok());

        pack.currency = "xyz".into();
        assert!(matches!(pack.validate(), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_sale_collection_depends_on_gateway() {
        let card = Sale::new("s", "p", Gateway::Stripe, "pi_1", dec!(1000), SalesTeam::default());
        assert_eq!(card.amount_collected, dec!(1000));
        assert_eq!(card.status, SaleStatus::Collected);

        let financed = Sale::new("s", "p", Gateway::Sequra, "sq_1", dec!(1000), SalesTeam::default());
        assert_eq!(financed.amount_collected, Decimal::ZERO);
        assert_eq!(financed.status, SaleStatus::Collecting);
        assert_eq!(financed.outstanding(), dec!(1000));
    }

    #[test]
    fn test_emails_are_normalized() {
        let student = Student::new("Ana", "  Ana@Example.COM ");
        assert_eq!(student.email, "ana@example.com");
    }
}
