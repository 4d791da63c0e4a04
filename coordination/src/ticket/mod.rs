//! Ticket Manager & Status Transition Engine.
//!
//! Tiered budgets and SLA-ish iteration tracking drive escalation; the
//! hierarchy is a ticket tree with a single owning registry, so the
//! "registry is the only mutator" discipline holds throughout.

mod manager;
mod model;
mod transitions;

pub use manager::{ReadinessCheck, SlaRisk, TicketManager, TicketManagerError};
pub use model::{
    ApprovalRecord, Approvals, Complexity, Sla, Ticket, TicketLevel, TicketStatus, TicketType,
};
pub use transitions::{default_transition_rules, Actor, ActorRole, Condition, TransitionRule};
