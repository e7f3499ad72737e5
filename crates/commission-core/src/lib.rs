//! # commission-core
//!
//! Sale ledger, commission lifecycle and payout reconciliation for a
//! coaching sales team paid on coach / closer / setter commissions.
//!
//! ## Flow
//!
//! ```text
//! ┌───────────────┐    ┌──────────────┐    ┌────────────────────┐    ┌──────────┐
//! │ Gateway event │───▶│ Sale (+split)│───▶│ Commission         │───▶│  Payout  │
//! │ stripe/sequra │    │ per role     │    │ pending → validated│    │   run    │
//! └───────────────┘    └──────────────┘    │ → paid             │    └──────────┘
//!                             │            └────────────────────┘
//!                             │ seQura 70/15/15 milestones
//!                             ▼
//!                      amount_collected
//! ```
//!
//! All money is `rust_decimal::Decimal`. Every multi-entity change goes
//! through one atomic [`LedgerStore`] operation.

pub mod commission;
pub mod error;
pub mod installment;
pub mod model;
pub mod payout;
pub mod split;
pub mod store;

pub use commission::{Commission, CommissionAction, CommissionStatus, StatusChange, Transition};
pub use error::{LedgerError, Result};
pub use installment::{Milestone, MilestoneCredit, SequraMilestones};
pub use model::{
    Actor, Agent, CommissionRates, Gateway, Pack, PaymentLink, Role, Sale, SaleStatus, SalesTeam, Student,
    SUPPORTED_CURRENCIES,
};
pub use payout::{Payout, PayoutStatement};
pub use split::split_commissions;
pub use store::{LedgerStore, MemoryLedgerStore, RefundOrigin, RefundOutcome};
