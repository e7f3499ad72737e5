//! Ledger Storage
//!
//! The `LedgerStore` trait exposes every multi-entity change as a single
//! atomic operation: a sale with its commissions, a refund with its cascade,
//! a milestone credit, a payout run. Implementations must apply each one
//! entirely or not at all.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::commission::{Commission, Transition};
use crate::error::{LedgerError, Result};
use crate::installment::{self, Milestone, MilestoneCredit};
use crate::model::{Actor, Agent, Gateway, Pack, PaymentLink, Sale, SaleStatus, Student};
use crate::payout::{Payout, PayoutStatement};

/// Who initiated a refund
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundOrigin {
    /// Reported by the payment gateway; commissions go to incidence
    Gateway,
    /// Issued by an admin; commissions are cancelled
    Admin,
}

impl RefundOrigin {
    pub fn transition(&self) -> Transition {
        match self {
            RefundOrigin::Gateway => Transition::RefundHold,
            RefundOrigin::Admin => Transition::RefundCancel,
        }
    }
}

/// Result of a refund request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RefundOutcome {
    Refunded {
        sale_id: String,
        commissions_affected: usize,
    },
    AlreadyRefunded {
        sale_id: String,
    },
}

/// Ledger storage trait
pub trait LedgerStore: Send + Sync {
    /// Save or update an agent
    fn save_agent(&self, agent: &Agent) -> Result<()>;

    fn get_agent(&self, id: &str) -> Result<Option<Agent>>;

    fn find_agent_by_email(&self, email: &str) -> Result<Option<Agent>>;

    fn list_agents(&self) -> Result<Vec<Agent>>;

    /// Save or update a pack (rates are validated)
    fn save_pack(&self, pack: &Pack) -> Result<()>;

    fn get_pack(&self, id: &str) -> Result<Option<Pack>>;

    fn list_packs(&self) -> Result<Vec<Pack>>;

    /// Save or update a payment link (pack and agents must exist)
    fn save_payment_link(&self, link: &PaymentLink) -> Result<()>;

    fn get_payment_link(&self, id: &str) -> Result<Option<PaymentLink>>;

    /// Payment links of a pack, oldest first
    fn payment_links_for_pack(&self, pack_id: &str) -> Result<Vec<PaymentLink>>;

    /// Find a student by email, creating it if unknown
    fn find_or_create_student(&self, student: Student) -> Result<Student>;

    fn get_student(&self, id: &str) -> Result<Option<Student>>;

    fn get_sale(&self, id: &str) -> Result<Option<Sale>>;

    fn find_sale(&self, gateway: Gateway, external_ref: &str) -> Result<Option<Sale>>;

    /// Insert a sale together with its commissions
    fn record_sale(&self, sale: &Sale, commissions: &[Commission]) -> Result<()>;

    /// Installment sales that are neither fully collected nor refunded
    fn open_installment_sales(&self) -> Result<Vec<Sale>>;

    /// Credit reached seQura milestones on a sale (idempotent)
    fn credit_milestones(&self, sale_id: &str, reached: &[Milestone]) -> Result<Vec<MilestoneCredit>>;

    /// Refund a sale and cascade the refund to all its commissions
    fn refund_sale(&self, sale_id: &str, origin: RefundOrigin, actor: &Actor) -> Result<RefundOutcome>;

    fn get_commission(&self, id: &str) -> Result<Option<Commission>>;

    fn commissions_for_sale(&self, sale_id: &str) -> Result<Vec<Commission>>;

    fn commissions_for_agent(&self, agent_id: &str) -> Result<Vec<Commission>>;

    /// Apply a lifecycle transition to a commission
    fn apply_transition(&self, commission_id: &str, transition: &Transition, actor: &Actor) -> Result<Commission>;

    /// Summarise what an agent is owed
    fn payout_statement(&self, agent_id: &str) -> Result<PayoutStatement>;

    /// Pay every payable commission of an agent in one run
    fn settle_payout(&self, agent_id: &str, actor: &Actor) -> Result<Payout>;

    fn payouts_for_agent(&self, agent_id: &str) -> Result<Vec<Payout>>;

    /// Whether a gateway event has already been processed
    fn seen_event(&self, provider: &str, event_id: &str) -> Result<bool>;

    /// Remember a processed gateway event; returns false if it was seen before
    fn record_event(&self, provider: &str, event_id: &str) -> Result<bool>;
}

#[derive(Default)]
struct Ledger {
    agents: HashMap<String, Agent>,
    packs: HashMap<String, Pack>,
    links: HashMap<String, PaymentLink>,
    students: HashMap<String, Student>,
    students_by_email: HashMap<String, String>,
    sales: HashMap<String, Sale>,
    sales_by_ref: HashMap<(Gateway, String), String>,
    commissions: HashMap<String, Commission>,
    payouts: Vec<Payout>,
    events: HashSet<(String, String)>,
}

impl Ledger {
    fn sale_commissions(&self, sale_id: &str) -> Vec<Commission> {
        let mut found: Vec<_> = self
            .commissions
            .values()
            .filter(|c| c.sale_id == sale_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.role.as_str().cmp(b.role.as_str())));
        found
    }

    fn agent_commissions(&self, agent_id: &str) -> Vec<Commission> {
        let mut found: Vec<_> = self
            .commissions
            .values()
            .filter(|c| c.agent_id == agent_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }

    fn statement(&self, agent_id: &str) -> PayoutStatement {
        let commissions = self.agent_commissions(agent_id);
        let sales = commissions
            .iter()
            .filter_map(|c| self.sales.get(&c.sale_id))
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        PayoutStatement::build(agent_id, &commissions, &sales)
    }

    fn require_active_agent(&self, agent_id: &str) -> Result<()> {
        match self.agents.get(agent_id) {
            Some(agent) if agent.active => Ok(()),
            Some(_) => Err(LedgerError::Validation(format!("agent {agent_id} is inactive"))),
            None => Err(LedgerError::not_found("agent", agent_id)),
        }
    }
}

/// In-memory ledger store (for development and tests)
///
/// A single lock guards every table, so each trait operation is atomic.
pub struct MemoryLedgerStore {
    ledger: RwLock<Ledger>,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            ledger: RwLock::new(Ledger::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Ledger>> {
        self.ledger
            .read()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Ledger>> {
        self.ledger
            .write()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".into()))
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn save_agent(&self, agent: &Agent) -> Result<()> {
        let mut ledger = self.write()?;

        let email_taken = ledger
            .agents
            .values()
            .any(|a| a.id != agent.id && a.email == agent.email);
        if email_taken {
            return Err(LedgerError::Conflict(format!("agent email {} already in use", agent.email)));
        }

        ledger.agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        Ok(self.read()?.agents.get(id).cloned())
    }

    fn find_agent_by_email(&self, email: &str) -> Result<Option<Agent>> {
        let email = email.trim().to_lowercase();
        Ok(self.read()?.agents.values().find(|a| a.email == email).cloned())
    }

    fn list_agents(&self) -> Result<Vec<Agent>> {
        let mut agents: Vec<_> = self.read()?.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    fn save_pack(&self, pack: &Pack) -> Result<()> {
        pack.validate()?;
        self.write()?.packs.insert(pack.id.clone(), pack.clone());
        Ok(())
    }

    fn get_pack(&self, id: &str) -> Result<Option<Pack>> {
        Ok(self.read()?.packs.get(id).cloned())
    }

    fn list_packs(&self) -> Result<Vec<Pack>> {
        let mut packs: Vec<_> = self.read()?.packs.values().cloned().collect();
        packs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(packs)
    }

    fn save_payment_link(&self, link: &PaymentLink) -> Result<()> {
        let mut ledger = self.write()?;

        if !ledger.packs.contains_key(&link.pack_id) {
            return Err(LedgerError::not_found("pack", &link.pack_id));
        }
        for agent_id in link.team.agent_ids() {
            ledger.require_active_agent(agent_id)?;
        }
        if link.price <= rust_decimal::Decimal::ZERO {
            return Err(LedgerError::Validation("payment link price must be positive".into()));
        }

        ledger.links.insert(link.id.clone(), link.clone());
        Ok(())
    }

    fn get_payment_link(&self, id: &str) -> Result<Option<PaymentLink>> {
        Ok(self.read()?.links.get(id).cloned())
    }

    fn payment_links_for_pack(&self, pack_id: &str) -> Result<Vec<PaymentLink>> {
        let mut links: Vec<_> = self
            .read()?
            .links
            .values()
            .filter(|l| l.pack_id == pack_id)
            .cloned()
            .collect();
        links.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(links)
    }

    fn find_or_create_student(&self, student: Student) -> Result<Student> {
        if student.email.is_empty() {
            return Err(LedgerError::Validation("student email is required".into()));
        }

        let mut ledger = self.write()?;

        if let Some(existing) = ledger
            .students_by_email
            .get(&student.email)
            .and_then(|id| ledger.students.get(id))
        {
            return Ok(existing.clone());
        }

        ledger.students_by_email.insert(student.email.clone(), student.id.clone());
        ledger.students.insert(student.id.clone(), student.clone());

        tracing::info!(student_id = %student.id, email = %student.email, "Created student");
        Ok(student)
    }

    fn get_student(&self, id: &str) -> Result<Option<Student>> {
        Ok(self.read()?.students.get(id).cloned())
    }

    fn get_sale(&self, id: &str) -> Result<Option<Sale>> {
        Ok(self.read()?.sales.get(id).cloned())
    }

    fn find_sale(&self, gateway: Gateway, external_ref: &str) -> Result<Option<Sale>> {
        let ledger = self.read()?;
        Ok(ledger
            .sales_by_ref
            .get(&(gateway, external_ref.to_string()))
            .and_then(|id| ledger.sales.get(id))
            .cloned())
    }

    fn record_sale(&self, sale: &Sale, commissions: &[Commission]) -> Result<()> {
        sale.validate()?;

        let mut ledger = self.write()?;

        let key = (sale.gateway, sale.external_ref.clone());
        if ledger.sales_by_ref.contains_key(&key) {
            return Err(LedgerError::Conflict(format!(
                "{} sale {} already recorded",
                sale.gateway, sale.external_ref
            )));
        }
        if !ledger.students.contains_key(&sale.student_id) {
            return Err(LedgerError::not_found("student", &sale.student_id));
        }
        if !ledger.packs.contains_key(&sale.pack_id) {
            return Err(LedgerError::not_found("pack", &sale.pack_id));
        }
        if let Some(stray) = commissions.iter().find(|c| c.sale_id != sale.id) {
            return Err(LedgerError::Validation(format!(
                "commission {} does not belong to sale {}",
                stray.id, sale.id
            )));
        }

        ledger.sales_by_ref.insert(key, sale.id.clone());
        ledger.sales.insert(sale.id.clone(), sale.clone());
        for commission in commissions {
            ledger.commissions.insert(commission.id.clone(), commission.clone());
        }

        tracing::info!(
            sale_id = %sale.id,
            gateway = %sale.gateway,
            external_ref = %sale.external_ref,
            amount = %sale.amount_total,
            commissions = commissions.len(),
            "Recorded sale"
        );
        Ok(())
    }

    fn open_installment_sales(&self) -> Result<Vec<Sale>> {
        let ledger = self.read()?;
        let mut open: Vec<_> = ledger
            .sales
            .values()
            .filter(|s| s.gateway.is_installment() && s.status == SaleStatus::Collecting)
            .cloned()
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(open)
    }

    fn credit_milestones(&self, sale_id: &str, reached: &[Milestone]) -> Result<Vec<MilestoneCredit>> {
        let mut ledger = self.write()?;

        let mut sale = ledger
            .sales
            .get(sale_id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("sale", sale_id))?;

        let credits = installment::credit_milestones(&mut sale, reached)?;
        if !credits.is_empty() {
            ledger.sales.insert(sale.id.clone(), sale);
        }
        Ok(credits)
    }

    fn refund_sale(&self, sale_id: &str, origin: RefundOrigin, actor: &Actor) -> Result<RefundOutcome> {
        if origin == RefundOrigin::Admin {
            actor.require_admin()?;
        }

        let mut ledger = self.write()?;

        let mut sale = ledger
            .sales
            .get(sale_id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("sale", sale_id))?;

        if sale.is_refunded() {
            return Ok(RefundOutcome::AlreadyRefunded { sale_id: sale.id });
        }

        // Apply to copies first; nothing is written unless every commission accepts.
        let transition = origin.transition();
        let mut updated = ledger.sale_commissions(sale_id);
        for commission in &mut updated {
            commission.apply(&transition, actor)?;
        }

        sale.status = SaleStatus::Refunded;
        sale.refunded_at = Some(Utc::now());

        let affected = updated.len();
        for commission in updated {
            ledger.commissions.insert(commission.id.clone(), commission);
        }
        ledger.sales.insert(sale.id.clone(), sale);

        tracing::warn!(
            sale_id = %sale_id,
            origin = ?origin,
            commissions_affected = affected,
            "Sale refunded"
        );

        Ok(RefundOutcome::Refunded {
            sale_id: sale_id.to_string(),
            commissions_affected: affected,
        })
    }

    fn get_commission(&self, id: &str) -> Result<Option<Commission>> {
        Ok(self.read()?.commissions.get(id).cloned())
    }

    fn commissions_for_sale(&self, sale_id: &str) -> Result<Vec<Commission>> {
        Ok(self.read()?.sale_commissions(sale_id))
    }

    fn commissions_for_agent(&self, agent_id: &str) -> Result<Vec<Commission>> {
        Ok(self.read()?.agent_commissions(agent_id))
    }

    fn apply_transition(&self, commission_id: &str, transition: &Transition, actor: &Actor) -> Result<Commission> {
        if transition.is_refund() {
            return Err(LedgerError::Validation(
                "refund transitions are applied by refunding the sale".into(),
            ));
        }

        let mut ledger = self.write()?;

        let mut commission = ledger
            .commissions
            .get(commission_id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("commission", commission_id))?;

        // Authority and state first, so unknown agent ids are never revealed
        commission.check(transition, actor)?;
        if let Transition::ModifyAndAccept { agent_id: Some(agent_id), .. } = transition {
            ledger.require_active_agent(agent_id)?;
        }

        commission.apply(transition, actor)?;
        ledger.commissions.insert(commission.id.clone(), commission.clone());

        Ok(commission)
    }

    fn payout_statement(&self, agent_id: &str) -> Result<PayoutStatement> {
        Ok(self.read()?.statement(agent_id))
    }

    fn settle_payout(&self, agent_id: &str, actor: &Actor) -> Result<Payout> {
        actor.require_admin()?;

        let mut ledger = self.write()?;

        if !ledger.agents.contains_key(agent_id) {
            return Err(LedgerError::not_found("agent", agent_id));
        }

        let mut payable = ledger.statement(agent_id).payable_commissions;
        if payable.is_empty() {
            return Err(LedgerError::Validation(format!(
                "agent {agent_id} has no payable commissions"
            )));
        }

        for commission in &mut payable {
            commission.apply(&Transition::MarkPaid, actor)?;
        }

        let payout = Payout::new(agent_id, &actor.agent_id, &payable);
        for commission in payable {
            ledger.commissions.insert(commission.id.clone(), commission);
        }
        ledger.payouts.push(payout.clone());

        tracing::info!(
            payout_id = %payout.id,
            agent_id = %agent_id,
            total = %payout.total,
            commissions = payout.commission_ids.len(),
            "Payout settled"
        );

        Ok(payout)
    }

    fn payouts_for_agent(&self, agent_id: &str) -> Result<Vec<Payout>> {
        Ok(self
            .read()?
            .payouts
            .iter()
            .filter(|p| p.agent_id == agent_id)
            .cloned()
            .collect())
    }

    fn seen_event(&self, provider: &str, event_id: &str) -> Result<bool> {
        Ok(self
            .read()?
            .events
            .contains(&(provider.to_string(), event_id.to_string())))
    }

    fn record_event(&self, provider: &str, event_id: &str) -> Result<bool> {
        let mut ledger = self.write()?;
        Ok(ledger.events.insert((provider.to_string(), event_id.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commission::CommissionStatus;
    use crate::model::{CommissionRates, SalesTeam};
    use crate::split::split_commissions;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: MemoryLedgerStore,
        admin: Agent,
        coach: Agent,
        closer: Agent,
        pack: Pack,
        student: Student,
    }

    fn fixture() -> Fixture {
        let store = MemoryLedgerStore::new();
        let admin = Agent::admin("Root", "root@example.com");
        let coach = Agent::new("Coach", "coach@example.com");
        let closer = Agent::new("Closer", "closer@example.com");
        for agent in [&admin, &coach, &closer] {
            store.save_agent(agent).unwrap();
        }

        let pack = Pack::new("Mentorship", dec!(2000), CommissionRates::new(dec!(10), dec!(5), dec!(0)));
        store.save_pack(&pack).unwrap();
        let student = store.find_or_create_student(Student::new("Ana", "ana@example.com")).unwrap();

        Fixture { store, admin, coach, closer, pack, student }
    }

    impl Fixture {
        fn sale(&self, gateway: Gateway, external_ref: &str) -> (Sale, Vec<Commission>) {
            let team = SalesTeam {
                coach_id: Some(self.coach.id.clone()),
                closer_id: Some(self.closer.id.clone()),
                setter_id: None,
            };
            let sale = Sale::new(&self.student.id, &self.pack.id, gateway, external_ref, dec!(2000), team);
            let commissions = split_commissions(&sale, &self.pack.rates);
            self.store.record_sale(&sale, &commissions).unwrap();
            (sale, commissions)
        }
    }

    #[test]
    fn test_record_sale_rejects_duplicate_reference() {
        let f = fixture();
        let (sale, _) = f.sale(Gateway::Stripe, "pi_1");

        let dup = Sale::new(&f.student.id, &f.pack.id, Gateway::Stripe, "pi_1", dec!(2000), sale.team.clone());
        let err = f.store.record_sale(&dup, &[]).unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));

        // Same reference on another gateway is a different sale
        let other = Sale::new(&f.student.id, &f.pack.id, Gateway::Sequra, "pi_1", dec!(2000), sale.team.clone());
        assert!(f.store.record_sale(&other, &[]).is_ok());
    }

    #[test]
    fn test_payment_links_listed_per_pack() {
        let f = fixture();
        let team = SalesTeam {
            coach_id: Some(f.coach.id.clone()),
            closer_id: None,
            setter_id: None,
        };
        let stripe = PaymentLink::new(&f.pack, Gateway::Stripe, team.clone());
        let sequra = PaymentLink::new(&f.pack, Gateway::Sequra, team).with_price(dec!(2100));
        f.store.save_payment_link(&stripe).unwrap();
        f.store.save_payment_link(&sequra).unwrap();

        let links = f.store.payment_links_for_pack(&f.pack.id).unwrap();
        assert_eq!(links.len(), 2);
        assert!(f.store.payment_links_for_pack("other").unwrap().is_empty());
        assert_eq!(f.store.list_packs().unwrap().len(), 1);
    }

    #[test]
    fn test_payment_link_rejects_inactive_agent() {
        let f = fixture();
        let mut gone = Agent::new("Gone", "gone@example.com");
        gone.active = false;
        f.store.save_agent(&gone).unwrap();

        let team = SalesTeam {
            coach_id: None,
            closer_id: Some(gone.id.clone()),
            setter_id: None,
        };
        let link = PaymentLink::new(&f.pack, Gateway::Stripe, team);
        assert!(f.store.save_payment_link(&link).is_err());
    }

    #[test]
    fn test_student_found_by_email() {
        let f = fixture();
        let again = f
            .store
            .find_or_create_student(Student::new("Ana B.", "ANA@example.com"))
            .unwrap();
        assert_eq!(again.id, f.student.id);
    }

    #[test]
    fn test_gateway_refund_puts_every_commission_on_hold() {
        let f = fixture();
        let (sale, commissions) = f.sale(Gateway::Stripe, "pi_1");
        let coach = Actor::from_agent(&f.coach);
        let admin = Actor::from_agent(&f.admin);

        let coach_commission = commissions.iter().find(|c| c.agent_id == f.coach.id).unwrap();
        f.store.apply_transition(&coach_commission.id, &Transition::Validate, &coach).unwrap();
        f.store.apply_transition(&coach_commission.id, &Transition::MarkPaid, &admin).unwrap();

        let outcome = f.store.refund_sale(&sale.id, RefundOrigin::Gateway, &Actor::system()).unwrap();
        assert_eq!(
            outcome,
            RefundOutcome::Refunded { sale_id: sale.id.clone(), commissions_affected: 2 }
        );

        let after = f.store.commissions_for_sale(&sale.id).unwrap();
        assert!(after.iter().all(|c| c.status == CommissionStatus::Incidence));
        assert!(f.store.get_sale(&sale.id).unwrap().unwrap().is_refunded());
    }

    #[test]
    fn test_admin_refund_cancels_commissions() {
        let f = fixture();
        let (sale, _) = f.sale(Gateway::Stripe, "pi_1");

        f.store
            .refund_sale(&sale.id, RefundOrigin::Admin, &Actor::from_agent(&f.admin))
            .unwrap();

        let after = f.store.commissions_for_sale(&sale.id).unwrap();
        assert!(after.iter().all(|c| c.status == CommissionStatus::Cancelled));
    }

    #[test]
    fn test_admin_refund_by_agent_changes_nothing() {
        let f = fixture();
        let (sale, _) = f.sale(Gateway::Stripe, "pi_1");

        let err = f
            .store
            .refund_sale(&sale.id, RefundOrigin::Admin, &Actor::from_agent(&f.coach))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Forbidden(_)));

        let after = f.store.commissions_for_sale(&sale.id).unwrap();
        assert!(after.iter().all(|c| c.status == CommissionStatus::Pending));
        assert!(!f.store.get_sale(&sale.id).unwrap().unwrap().is_refunded());
    }

    #[test]
    fn test_refund_twice_is_idempotent() {
        let f = fixture();
        let (sale, _) = f.sale(Gateway::Stripe, "pi_1");
        f.store.refund_sale(&sale.id, RefundOrigin::Gateway, &Actor::system()).unwrap();

        let outcome = f.store.refund_sale(&sale.id, RefundOrigin::Gateway, &Actor::system()).unwrap();
        assert_eq!(outcome, RefundOutcome::AlreadyRefunded { sale_id: sale.id.clone() });
    }

    #[test]
    fn test_refund_transition_not_applicable_directly() {
        let f = fixture();
        let (_, commissions) = f.sale(Gateway::Stripe, "pi_1");
        let err = f
            .store
            .apply_transition(&commissions[0].id, &Transition::RefundCancel, &Actor::from_agent(&f.admin))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn test_modify_and_accept_requires_known_agent() {
        let f = fixture();
        let (_, commissions) = f.sale(Gateway::Stripe, "pi_1");
        let commission = commissions.iter().find(|c| c.agent_id == f.coach.id).unwrap();
        f.store
            .apply_transition(
                &commission.id,
                &Transition::ReportIncidence { note: "wrong coach".into() },
                &Actor::from_agent(&f.coach),
            )
            .unwrap();

        let modify = |agent_id: &str| Transition::ModifyAndAccept {
            agent_id: Some(agent_id.into()),
            amount: None,
            admin_note: None,
        };
        let admin = Actor::from_agent(&f.admin);

        let err = f.store.apply_transition(&commission.id, &modify("ghost"), &admin).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));

        let updated = f.store.apply_transition(&commission.id, &modify(&f.closer.id), &admin).unwrap();
        assert_eq!(updated.agent_id, f.closer.id);
        assert_eq!(updated.status, CommissionStatus::Validated);
    }

    #[test]
    fn test_modify_and_accept_by_non_admin_is_forbidden_before_agent_lookup() {
        let f = fixture();
        let (_, commissions) = f.sale(Gateway::Stripe, "pi_1");
        let commission = commissions.iter().find(|c| c.agent_id == f.coach.id).unwrap();
        let owner = Actor::from_agent(&f.coach);
        f.store
            .apply_transition(
                &commission.id,
                &Transition::ReportIncidence { note: "wrong coach".into() },
                &owner,
            )
            .unwrap();

        let mut gone = Agent::new("Gone", "gone@example.com");
        gone.active = false;
        f.store.save_agent(&gone).unwrap();

        for agent_id in ["ghost", gone.id.as_str(), f.closer.id.as_str()] {
            let modify = Transition::ModifyAndAccept {
                agent_id: Some(agent_id.into()),
                amount: None,
                admin_note: None,
            };
            let err = f.store.apply_transition(&commission.id, &modify, &owner).unwrap_err();
            assert!(matches!(err, LedgerError::Forbidden(_)), "{agent_id}: {err:?}");
        }

        let unchanged = f.store.get_commission(&commission.id).unwrap().unwrap();
        assert_eq!(unchanged.status, CommissionStatus::Incidence);
        assert_eq!(unchanged.agent_id, f.coach.id);
    }

    #[test]
    fn test_milestones_credit_once_and_complete_sale() {
        let f = fixture();
        let (sale, _) = f.sale(Gateway::Sequra, "sq-1");
        assert_eq!(f.store.open_installment_sales().unwrap().len(), 1);

        let first = f.store.credit_milestones(&sale.id, &[Milestone::First]).unwrap();
        assert_eq!(first.len(), 1);
        assert!(f.store.credit_milestones(&sale.id, &[Milestone::First]).unwrap().is_empty());
        assert_eq!(f.store.get_sale(&sale.id).unwrap().unwrap().amount_collected, dec!(1400));

        f.store.credit_milestones(&sale.id, &[Milestone::Third]).unwrap();
        let done = f.store.get_sale(&sale.id).unwrap().unwrap();
        assert_eq!(done.amount_collected, dec!(2000));
        assert_eq!(done.status, SaleStatus::Collected);
        assert!(f.store.open_installment_sales().unwrap().is_empty());
    }

    #[test]
    fn test_settle_payout_pays_only_collected_sales() {
        let f = fixture();
        let coach = Actor::from_agent(&f.coach);
        let admin = Actor::from_agent(&f.admin);

        let (_, card) = f.sale(Gateway::Stripe, "pi_1");
        let (financed_sale, financed) = f.sale(Gateway::Sequra, "sq-1");
        for c in card.iter().chain(financed.iter()).filter(|c| c.agent_id == f.coach.id) {
            f.store.apply_transition(&c.id, &Transition::Validate, &coach).unwrap();
        }

        let payout = f.store.settle_payout(&f.coach.id, &admin).unwrap();
        assert_eq!(payout.total, dec!(200));
        assert_eq!(payout.commission_ids.len(), 1);

        let statement = f.store.payout_statement(&f.coach.id).unwrap();
        assert_eq!(statement.paid, dec!(200));
        assert_eq!(statement.awaiting_collection, dec!(200));

        // Nothing left to pay until the financed sale is collected
        assert!(f.store.settle_payout(&f.coach.id, &admin).is_err());

        f.store.credit_milestones(&financed_sale.id, &[Milestone::Third]).unwrap();
        let second = f.store.settle_payout(&f.coach.id, &admin).unwrap();
        assert_eq!(second.total, dec!(200));
        assert_eq!(f.store.payouts_for_agent(&f.coach.id).unwrap().len(), 2);
    }

    #[test]
    fn test_settle_payout_requires_admin() {
        let f = fixture();
        let err = f.store.settle_payout(&f.coach.id, &Actor::from_agent(&f.coach)).unwrap_err();
        assert!(matches!(err, LedgerError::Forbidden(_)));
    }

    #[test]
    fn test_record_event_detects_replay() {
        let store = MemoryLedgerStore::new();
        assert!(!store.seen_event("stripe", "evt_1").unwrap());
        assert!(store.record_event("stripe", "evt_1").unwrap());
        assert!(store.seen_event("stripe", "evt_1").unwrap());
        assert!(!store.record_event("stripe", "evt_1").unwrap());
        assert!(store.record_event("sequra", "evt_1").unwrap());
    }
}
