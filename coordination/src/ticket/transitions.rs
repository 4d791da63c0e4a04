//! Table-driven status transitions.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::model::{Ticket, TicketStatus};

/// Actor role for `hasRole` conditions; ordered viewer < editor < admin
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Viewer,
    Editor,
    Admin,
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub role: ActorRole,
    pub email: String,
}

/// A condition a transition rule must satisfy before firing.
/// `Custom` wraps an arbitrary predicate behind an `Arc<dyn Fn>` so rules
/// stay `Clone`-able for storage in a rule table.
#[derive(Clone)]
pub enum Condition {
    HasRole(ActorRole),
    AllDependenciesComplete,
    AllSubtasksComplete,
    HasDesignPack,
    HasDevPack,
    PassesTests,
    Custom {
        description: String,
        predicate: Arc<dyn Fn(&TransitionEvalCtx) -> bool + Send + Sync>,
    },
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HasRole(r) => write!(f, "HasRole({r:?})"),
            Self::AllDependenciesComplete => write!(f, "AllDependenciesComplete"),
            Self::AllSubtasksComplete => write!(f, "AllSubtasksComplete"),
            Self::HasDesignPack => write!(f, "HasDesignPack"),
            Self::HasDevPack => write!(f, "HasDevPack"),
            Self::PassesTests => write!(f, "PassesTests"),
            Self::Custom { description, .. } => write!(f, "Custom({description})"),
        }
    }
}

/// Side-effect interfaces dispatched on a successful transition; these are external collaborators — the core only records that
/// they *should* fire, via [`super::manager::TicketManager::take_pending_actions`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AutoAction {
    Notify { message: String },
    AssignTo { role: String },
    CreateSubtask { template: String },
    TriggerWorkflow { id: String },
    UpdateField { key: String, value: String },
    CreateGitBranch,
    CreatePr,
}

/// Context made available to condition evaluation.
pub struct TransitionEvalCtx<'a> {
    pub ticket: &'a Ticket,
    pub actor: &'a Actor,
    pub all_dependencies_complete: bool,
    pub all_subtasks_complete: bool,
    pub has_design_pack: bool,
    pub has_dev_pack: bool,
    pub passes_tests: bool,
}

impl Condition {
    pub fn evaluate(&self, ctx: &TransitionEvalCtx) -> bool {
        match self {
            Self::HasRole(required) => ctx.actor.role >= *required,
            Self::AllDependenciesComplete => ctx.all_dependencies_complete,
            Self::AllSubtasksComplete => ctx.all_subtasks_complete,
            Self::HasDesignPack => ctx.has_design_pack,
            Self::HasDevPack => ctx.has_dev_pack,
            // Default true when no test result is recorded.
            Self::PassesTests => ctx.passes_tests,
            Self::Custom { predicate, .. } => predicate(ctx),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransitionRule {
    pub id: String,
    pub from_status: TicketStatus,
    pub to_status: TicketStatus,
    pub conditions: Vec<Condition>,
    pub required_fields: Vec<String>,
    pub required_approval: bool,
    pub auto_actions: Vec<AutoAction>,
    pub blocked_by: Vec<String>,
}

impl TransitionRule {
    pub fn matches(&self, ctx: &TransitionEvalCtx) -> bool {
        ctx.ticket.status == self.from_status && self.conditions.iter().all(|c| c.evaluate(ctx))
    }
}

/// Minimum default rule set.
pub fn default_transition_rules() -> Vec<TransitionRule> {
    use TicketStatus::*;

    vec![
        TransitionRule {
            id: "backlog_to_in_progress".to_string(),
            from_status: Backlog,
            to_status: InProgress,
            conditions: vec![],
            required_fields: vec![],
            required_approval: false,
            auto_actions: vec![AutoAction::Notify {
                message: "ticket started".to_string(),
            }],
            blocked_by: vec![],
        },
        TransitionRule {
            id: "in_progress_to_review".to_string(),
            from_status: InProgress,
            to_status: Review,
            conditions: vec![],
            required_fields: vec![],
            required_approval: false,
            auto_actions: vec![AutoAction::Notify {
                message: "ticket ready for review".to_string(),
            }],
            blocked_by: vec![],
        },
        TransitionRule {
            id: "review_to_approved".to_string(),
            from_status: Review,
            to_status: Approved,
            conditions: vec![Condition::HasRole(ActorRole::Editor), Condition::PassesTests],
            required_fields: vec![],
            required_approval: true,
            auto_actions: vec![AutoAction::Notify {
                message: "ticket approved".to_string(),
            }],
            blocked_by: vec![],
        },
        TransitionRule {
            id: "review_to_rejected".to_string(),
            from_status: Review,
            to_status: Rejected,
            conditions: vec![Condition::HasRole(ActorRole::Editor)],
            required_fields: vec![],
            required_approval: true,
            auto_actions: vec![],
            blocked_by: vec![],
        },
        TransitionRule {
            id: "rejected_to_in_progress".to_string(),
            from_status: Rejected,
            to_status: InProgress,
            conditions: vec![],
            required_fields: vec![],
            required_approval: false,
            auto_actions: vec![],
            blocked_by: vec![],
        },
        TransitionRule {
            id: "approved_to_done".to_string(),
            from_status: Approved,
            to_status: Done,
            conditions: vec![Condition::AllSubtasksComplete, Condition::PassesTests],
            required_fields: vec![],
            required_approval: false,
            auto_actions: vec![AutoAction::Notify {
                message: "ticket done".to_string(),
            }],
            blocked_by: vec![],
        },
        TransitionRule {
            id: "in_progress_to_backlog".to_string(),
            from_status: InProgress,
            to_status: Backlog,
            conditions: vec![],
            required_fields: vec![],
            required_approval: false,
            auto_actions: vec![],
            blocked_by: vec![],
        },
        TransitionRule {
            id: "backlog_to_done_quick_complete".to_string(),
            from_status: Backlog,
            to_status: Done,
            conditions: vec![Condition::HasRole(ActorRole::Admin)],
            required_fields: vec![],
            required_approval: false,
            auto_actions: vec![AutoAction::Notify {
                message: "ticket quick-completed".to_string(),
            }],
            blocked_by: vec![],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::model::{Complexity, Ticket};

    fn ticket_in(status: TicketStatus) -> Ticket {
        let mut t = Ticket::new("proj", "title", "desc", Complexity::M, "coder");
        t.status = status;
        t
    }

    fn ctx<'a>(ticket: &'a Ticket, actor: &'a Actor) -> TransitionEvalCtx<'a> {
        TransitionEvalCtx {
            ticket,
            actor,
            all_dependencies_complete: true,
            all_subtasks_complete: true,
            has_design_pack: true,
            has_dev_pack: true,
            passes_tests: true,
        }
    }

    #[test]
    fn backlog_to_in_progress_has_no_conditions() {
        let ticket = ticket_in(TicketStatus::Backlog);
        let actor = Actor {
            role: ActorRole::Viewer,
            email: "a@b.com".to_string(),
        };
        let rules = default_transition_rules();
        let rule = rules.iter().find(|r| r.id == "backlog_to_in_progress").unwrap();
        assert!(rule.matches(&ctx(&ticket, &actor)));
    }

    #[test]
    fn review_to_approved_requires_editor_role() {
        let ticket = ticket_in(TicketStatus::Review);
        let viewer = Actor {
            role: ActorRole::Viewer,
            email: "a@b.com".to_string(),
        };
        let editor = Actor {
            role: ActorRole::Editor,
            email: "a@b.com".to_string(),
        };
        let rules = default_transition_rules();
        let rule = rules.iter().find(|r| r.id == "review_to_approved").unwrap();
        assert!(!rule.matches(&ctx(&ticket, &viewer)));
        assert!(rule.matches(&ctx(&ticket, &editor)));
    }

    #[test]
    fn backlog_to_done_requires_admin() {
        let ticket = ticket_in(TicketStatus::Backlog);
        let editor = Actor {
            role: ActorRole::Editor,
            email: "a@b.com".to_string(),
        };
        let admin = Actor {
            role: ActorRole::Admin,
            email: "a@b.com".to_string(),
        };
        let rules = default_transition_rules();
        let rule = rules
            .iter()
            .find(|r| r.id == "backlog_to_done_quick_complete")
            .unwrap();
        assert!(!rule.matches(&ctx(&ticket, &editor)));
        assert!(rule.matches(&ctx(&ticket, &admin)));
    }
}
