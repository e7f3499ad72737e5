//! Commission Lifecycle
//!
//! A commission moves through a small state machine:
//!
//! ```text
//!                 report incidence (owner)
//!   ┌─────────┐ ─────────────────────────▶ ┌───────────┐
//!   │ pending │                            │ incidence │──── reject (admin) ───▶ cancelled
//!   └─────────┘                            └───────────┘
//!        │ validate (owner)                  │ validate (owner)
//!        │                                   │ resolve / modify-and-accept (admin)
//!        ▼                                   ▼
//!   ┌───────────┐   mark paid (admin)   ┌──────┐
//!   │ validated │ ────────────────────▶ │ paid │
//!   └───────────┘                       └──────┘
//! ```
//!
//! Refunds bypass the table: a gateway refund moves every commission of the
//! sale to `incidence`, an admin refund moves them to `cancelled`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::model::{new_id, Actor, Role};
use crate::split::round_money;

/// Note attached when a gateway refund puts a commission on hold
pub const REFUND_NOTE: &str = "sale refunded";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Pending,
    Incidence,
    Validated,
    Paid,
    Cancelled,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Pending => "pending",
            CommissionStatus::Incidence => "incidence",
            CommissionStatus::Validated => "validated",
            CommissionStatus::Paid => "paid",
            CommissionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of a transition, without its payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionAction {
    Validate,
    ReportIncidence,
    Resolve,
    ModifyAndAccept,
    Reject,
    MarkPaid,
    RefundHold,
    RefundCancel,
}

impl CommissionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionAction::Validate => "validate",
            CommissionAction::ReportIncidence => "report incidence on",
            CommissionAction::Resolve => "resolve",
            CommissionAction::ModifyAndAccept => "modify and accept",
            CommissionAction::Reject => "reject",
            CommissionAction::MarkPaid => "pay",
            CommissionAction::RefundHold => "hold",
            CommissionAction::RefundCancel => "cancel",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            CommissionAction::Validate => "validated",
            CommissionAction::ReportIncidence => "disputed",
            CommissionAction::Resolve => "resolved",
            CommissionAction::ModifyAndAccept => "modified",
            CommissionAction::Reject => "rejected",
            CommissionAction::MarkPaid => "paid",
            CommissionAction::RefundHold => "put on hold",
            CommissionAction::RefundCancel => "cancelled",
        }
    }
}

impl std::fmt::Display for CommissionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may trigger a transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Authority {
    Owner,
    Admin,
    System,
}

/// A requested state change with its payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Validate,
    ReportIncidence {
        note: String,
    },
    Resolve {
        admin_note: Option<String>,
    },
    ModifyAndAccept {
        agent_id: Option<String>,
        amount: Option<Decimal>,
        admin_note: Option<String>,
    },
    Reject {
        admin_note: Option<String>,
    },
    MarkPaid,
    /// Gateway refund of the sale
    RefundHold,
    /// Admin refund of the sale
    RefundCancel,
}

const FROM_PENDING: &[CommissionStatus] = &[CommissionStatus::Pending];
const FROM_OPEN: &[CommissionStatus] = &[CommissionStatus::Pending, CommissionStatus::Incidence];
const FROM_INCIDENCE: &[CommissionStatus] = &[CommissionStatus::Incidence];
const FROM_VALIDATED: &[CommissionStatus] = &[CommissionStatus::Validated];
const ANY: &[CommissionStatus] = &[
    CommissionStatus::Pending,
    CommissionStatus::Incidence,
    CommissionStatus::Validated,
    CommissionStatus::Paid,
    CommissionStatus::Cancelled,
];

impl Transition {
    pub fn action(&self) -> CommissionAction {
        match self {
            Transition::Validate => CommissionAction::Validate,
            Transition::ReportIncidence { .. } => CommissionAction::ReportIncidence,
            Transition::Resolve { .. } => CommissionAction::Resolve,
            Transition::ModifyAndAccept { .. } => CommissionAction::ModifyAndAccept,
            Transition::Reject { .. } => CommissionAction::Reject,
            Transition::MarkPaid => CommissionAction::MarkPaid,
            Transition::RefundHold => CommissionAction::RefundHold,
            Transition::RefundCancel => CommissionAction::RefundCancel,
        }
    }

    /// (authority, allowed source states, target state)
    fn rule(&self) -> (Authority, &'static [CommissionStatus], CommissionStatus) {
        use CommissionStatus::{Cancelled, Incidence, Paid, Validated};

        match self {
            Transition::Validate => (Authority::Owner, FROM_OPEN, Validated),
            Transition::ReportIncidence { .. } => (Authority::Owner, FROM_PENDING, Incidence),
            Transition::Resolve { .. } => (Authority::Admin, FROM_INCIDENCE, Validated),
            Transition::ModifyAndAccept { .. } => (Authority::Admin, FROM_INCIDENCE, Validated),
            Transition::Reject { .. } => (Authority::Admin, FROM_INCIDENCE, Cancelled),
            Transition::MarkPaid => (Authority::Admin, FROM_VALIDATED, Paid),
            Transition::RefundHold => (Authority::System, ANY, Incidence),
            Transition::RefundCancel => (Authority::Admin, ANY, Cancelled),
        }
    }

    /// Refund transitions are only applied through the sale refund cascade
    pub fn is_refund(&self) -> bool {
        matches!(self, Transition::RefundHold | Transition::RefundCancel)
    }

    /// Target status of this transition
    pub fn target(&self) -> CommissionStatus {
        self.rule().2
    }

    /// Whether the transition may start from `status`
    pub fn allowed_from(&self, status: CommissionStatus) -> bool {
        self.rule().1.contains(&status)
    }

    fn note(&self) -> Option<&str> {
        match self {
            Transition::ReportIncidence { note } => Some(note.as_str()),
            Transition::Resolve { admin_note }
            | Transition::ModifyAndAccept { admin_note, .. }
            | Transition::Reject { admin_note } => admin_note.as_deref(),
            Transition::RefundHold => Some(REFUND_NOTE),
            _ => None,
        }
    }
}

/// One entry of a commission's audit trail
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: CommissionStatus,
    pub to: CommissionStatus,
    pub action: CommissionAction,
    pub actor_id: String,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

/// Commission earned by one agent on one sale
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commission {
    pub id: String,
    pub sale_id: String,
    pub agent_id: String,
    pub role: Role,
    pub amount: Decimal,
    pub status: CommissionStatus,
    /// Reason given by the agent when raising an incidence
    pub incidence_note: Option<String>,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub history: Vec<StatusChange>,
}

impl Commission {
    pub fn new(
        sale_id: impl Into<String>,
        agent_id: impl Into<String>,
        role: Role,
        amount: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            sale_id: sale_id.into(),
            agent_id: agent_id.into(),
            role,
            amount,
            status: CommissionStatus::Pending,
            incidence_note: None,
            admin_note: None,
            created_at: now,
            updated_at: now,
            validated_at: None,
            paid_at: None,
            history: Vec::new(),
        }
    }

    /// Check that `actor` may apply `transition` to this commission.
    ///
    /// Authorization is checked before the source state so a stranger cannot
    /// learn the status of someone else's commission.
    pub fn check(&self, transition: &Transition, actor: &Actor) -> Result<()> {
        let (authority, from, _) = transition.rule();
        let action = transition.action();

        match authority {
            Authority::Owner if actor.agent_id != self.agent_id => {
                return Err(LedgerError::Forbidden(format!(
                    "only the owning agent can {action} this commission"
                )));
            }
            Authority::Admin if !actor.is_admin => {
                return Err(LedgerError::Forbidden(format!(
                    "only an admin can {action} a commission"
                )));
            }
            _ => {}
        }

        if !from.contains(&self.status) {
            return Err(LedgerError::InvalidTransition {
                from: self.status,
                action,
            });
        }

        match transition {
            Transition::ReportIncidence { note } if note.trim().is_empty() => {
                Err(LedgerError::Validation("an incidence needs a note".into()))
            }
            Transition::ModifyAndAccept { amount: Some(amount), .. } if round_money(*amount) <= Decimal::ZERO => {
                Err(LedgerError::Validation("commission amount must be positive".into()))
            }
            Transition::ModifyAndAccept { agent_id: Some(agent_id), .. } if agent_id.trim().is_empty() => {
                Err(LedgerError::Validation("replacement agent id is empty".into()))
            }
            _ => Ok(()),
        }
    }

    /// Validate and apply a transition, recording it in the history
    pub fn apply(&mut self, transition: &Transition, actor: &Actor) -> Result<&StatusChange> {
        self.check(transition, actor)?;

        let now = Utc::now();
        let from = self.status;
        let to = transition.target();

        match transition {
            Transition::ReportIncidence { note } => {
                self.incidence_note = Some(note.trim().to_string());
            }
            Transition::ModifyAndAccept { agent_id, amount, admin_note } => {
                if let Some(agent_id) = agent_id {
                    self.agent_id.clone_from(agent_id);
                }
                if let Some(amount) = amount {
                    self.amount = round_money(*amount);
                }
                self.admin_note.clone_from(admin_note);
            }
            Transition::Resolve { admin_note } | Transition::Reject { admin_note } => {
                self.admin_note.clone_from(admin_note);
            }
            Transition::RefundHold => {
                self.incidence_note = Some(REFUND_NOTE.into());
            }
            _ => {}
        }

        if to == CommissionStatus::Validated {
            self.validated_at = Some(now);
        }
        if to == CommissionStatus::Paid {
            self.paid_at = Some(now);
        }

        self.status = to;
        self.updated_at = now;
        self.history.push(StatusChange {
            from,
            to,
            action: transition.action(),
            actor_id: actor.agent_id.clone(),
            note: transition.note().map(str::to_string),
            at: now,
        });

        tracing::info!(
            commission_id = %self.id,
            sale_id = %self.sale_id,
            agent_id = %self.agent_id,
            from = %from,
            to = %to,
            actor = %actor.agent_id,
            "Commission transition applied"
        );

        self.history
            .last()
            .ok_or_else(|| LedgerError::Storage("history entry missing after transition".into()))
    }
}
