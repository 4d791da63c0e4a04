//! `TicketManager` — the sole mutator of ticket state.

use std::collections::HashMap;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use super::model::{Complexity, Ticket, TicketLevel, TicketStatus, TicketType};
use super::transitions::{
    default_transition_rules, Actor, AutoAction, TransitionEvalCtx, TransitionRule,
};

#[derive(Debug, Error)]
pub enum TicketManagerError {
    #[error("HIERARCHY_VIOLATION: {0}")]
    HierarchyViolation(String),
    #[error("unknown ticket: {0}")]
    UnknownTicket(String),
    #[error("no transition rule matches ticket {ticket_id} from {from:?}")]
    NoMatchingRule { ticket_id: String, from: TicketStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaRisk {
    Ok,
    Warning,
    Breached,
}

#[derive(Debug, Clone)]
pub struct ReadinessCheck {
    pub ready: bool,
    pub sla_risk: SlaRisk,
}

pub struct TicketManager {
    tickets: HashMap<String, Ticket>,
    rules: Vec<TransitionRule>,
    max_retries: u8,
    escalate_on_sla_breach: bool,
    pending_actions: Vec<(String, AutoAction)>,
}

impl Default for TicketManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketManager {
    pub fn new() -> Self {
        Self {
            tickets: HashMap::new(),
            rules: default_transition_rules(),
            max_retries: 3,
            escalate_on_sla_breach: true,
            pending_actions: Vec::new(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<TransitionRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn get(&self, id: &str) -> Option<&Ticket> {
        self.tickets.get(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.values()
    }

    /// Drain and return auto-actions queued by successful transitions, so
    /// the caller (an external collaborator) can dispatch them.
    pub fn take_pending_actions(&mut self) -> Vec<(String, AutoAction)> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Create a ticket, enforcing the hierarchy's parent rule: creating a non-root level without a valid parent fails
    /// with `HIERARCHY_VIOLATION`.
    pub fn create_ticket(
        &mut self,
        project_id: &str,
        title: &str,
        description: &str,
        complexity: Complexity,
        assigned_role: &str,
        level: TicketLevel,
        parent_id: Option<&str>,
    ) -> Result<String, TicketManagerError> {
        match (level.required_parent_level(), parent_id) {
            (None, _) => {}
            (Some(_), None) => {
                return Err(TicketManagerError::HierarchyViolation(format!(
                    "level {level:?} requires a parent"
                )))
            }
            (Some(required), Some(pid)) => {
                let parent = self
                    .tickets
                    .get(pid)
                    .ok_or_else(|| TicketManagerError::UnknownTicket(pid.to_string()))?;
                match parent.level {
                    Some(parent_level) if parent_level == required => {}
                    _ => {
                        return Err(TicketManagerError::HierarchyViolation(format!(
                            "ticket {level:?} must have a parent at level {required:?}"
                        )))
                    }
                }
                if self.creates_cycle(pid) {
                    return Err(TicketManagerError::HierarchyViolation(
                        "parent assignment would create a cycle".to_string(),
                    ));
                }
            }
        }

        let ticket = Ticket::new(project_id, title, description, complexity, assigned_role)
            .with_level(level, parent_id.map(str::to_string));
        let id = ticket.id.clone();
        info!(ticket_id = %id, ?level, "ticket created");
        self.tickets.insert(id.clone(), ticket);
        Ok(id)
    }

    fn creates_cycle(&self, start_parent_id: &str) -> bool {
        // A freshly-created ticket cannot yet be its own ancestor; this
        // guards the pathological case of a caller re-using an id that
        // already points into a cycle upstream (defensive, not reachable
        // through `create_ticket`'s own id generation).
        let mut seen = std::collections::HashSet::new();
        let mut current = Some(start_parent_id.to_string());
        while let Some(id) = current {
            if !seen.insert(id.clone()) {
                return true;
            }
            current = self.tickets.get(&id).and_then(|t| t.parent_id.clone());
        }
        false
    }

    pub fn update_ticket<F: FnOnce(&mut Ticket)>(
        &mut self,
        id: &str,
        f: F,
    ) -> Result<(), TicketManagerError> {
        let ticket = self
            .tickets
            .get_mut(id)
            .ok_or_else(|| TicketManagerError::UnknownTicket(id.to_string()))?;
        f(ticket);
        Ok(())
    }

    fn all_dependencies_complete(&self, ticket: &Ticket) -> bool {
        ticket.dependencies.iter().all(|dep| {
            self.tickets
                .get(dep)
                .map(|t| matches!(t.status, TicketStatus::Done | TicketStatus::Approved))
                .unwrap_or(false)
        })
    }

    fn all_subtasks_complete(&self, ticket_id: &str) -> bool {
        !self
            .tickets
            .values()
            .any(|t| t.parent_id.as_deref() == Some(ticket_id) && t.status != TicketStatus::Done)
    }

    /// SLA risk for a ticket: breached when
    /// `now - startedAt >= targetMinutes*60_000`; warning when
    /// `>= warningThresholdPct% * target`; else ok.
    pub fn sla_risk(&self, ticket: &Ticket) -> SlaRisk {
        let Some(sla) = &ticket.sla else {
            return SlaRisk::Ok;
        };
        let elapsed_minutes = (Utc::now() - sla.started_at).num_seconds() as f64 / 60.0;
        if elapsed_minutes >= sla.target_minutes as f64 {
            SlaRisk::Breached
        } else if elapsed_minutes >= (sla.warning_threshold_pct as f64 / 100.0) * sla.target_minutes as f64
        {
            SlaRisk::Warning
        } else {
            SlaRisk::Ok
        }
    }

    /// Readiness: `backlog` status, all deps done/approved, all required
    /// approval gates present, and no breached SLA. Calling this lazily
    /// evaluates (and applies) SLA breaches on each readiness query.
    pub fn check_readiness(&mut self, id: &str) -> Result<ReadinessCheck, TicketManagerError> {
        let risk = {
            let ticket = self
                .tickets
                .get(id)
                .ok_or_else(|| TicketManagerError::UnknownTicket(id.to_string()))?;
            self.sla_risk(ticket)
        };

        if risk == SlaRisk::Breached {
            self.apply_sla_breach(id)?;
        }

        let ticket = self.tickets.get(id).unwrap();
        let ready = ticket.status == TicketStatus::Backlog
            && self.all_dependencies_complete(ticket)
            && ticket.approvals.all_required_gates_approved()
            && risk != SlaRisk::Breached;

        Ok(ReadinessCheck { ready, sla_risk: risk })
    }

    /// On SLA breach: transition to `rejected`, increment
    /// retryCount (capped), and optionally create a linked escalation
    /// ticket.
    fn apply_sla_breach(&mut self, id: &str) -> Result<(), TicketManagerError> {
        let (role, project_id) = {
            let ticket = self.tickets.get(id).unwrap();
            (ticket.assigned_role.clone(), ticket.project_id.clone())
        };

        {
            let ticket = self.tickets.get_mut(id).unwrap();
            ticket.status = TicketStatus::Rejected;
            ticket.retry_count = (ticket.retry_count + 1).min(self.max_retries);
            warn!(ticket_id = %id, "SLA breached, ticket rejected");
        }

        if self.escalate_on_sla_breach {
            self.create_escalation(&project_id, id, &role, "SLA breach")?;
        }
        Ok(())
    }

    /// Create an escalation ticket linked by dependency to `original_id`
    ///.
    pub fn create_escalation(
        &mut self,
        project_id: &str,
        original_id: &str,
        role: &str,
        reason: &str,
    ) -> Result<String, TicketManagerError> {
        let mut ticket = Ticket::new(
            project_id,
            format!("Escalation: {reason}"),
            format!("Escalated from ticket {original_id}: {reason}"),
            Complexity::M,
            role,
        );
        ticket.ticket_type = Some(TicketType::Escalation);
        ticket.original_ticket_id = Some(original_id.to_string());
        ticket.dependencies = vec![original_id.to_string()];
        let id = ticket.id.clone();
        info!(ticket_id = %id, %original_id, %reason, "escalation ticket created");
        self.tickets.insert(id.clone(), ticket);
        Ok(id)
    }

    /// Fetch the next ready ticket for a role: additionally requires that for
    /// `subtask`/`subatomic` levels, the parent ticket is `done`.
    pub fn next_ticket_for_agent(&mut self, role: &str) -> Option<String> {
        let candidate_ids: Vec<String> = self
            .tickets
            .values()
            .filter(|t| t.assigned_role == role && t.status == TicketStatus::Backlog)
            .map(|t| t.id.clone())
            .collect();

        for id in candidate_ids {
            let Ok(readiness) = self.check_readiness(&id) else {
                continue;
            };
            if !readiness.ready {
                continue;
            }
            let ticket = self.tickets.get(&id).unwrap();
            let parent_ok = match ticket.level {
                Some(TicketLevel::Subtask) | Some(TicketLevel::Subatomic) => ticket
                    .parent_id
                    .as_ref()
                    .and_then(|pid| self.tickets.get(pid))
                    .map(|p| p.status == TicketStatus::Done)
                    .unwrap_or(false),
                _ => true,
            };
            if parent_ok {
                return Some(id);
            }
        }
        None
    }

    /// Apply a named transition rule, enforcing its conditions and
    /// dispatching auto-actions + terminal side-effects.
    pub fn execute_transition(
        &mut self,
        ticket_id: &str,
        rule_id: &str,
        actor: &Actor,
    ) -> Result<(), TicketManagerError> {
        let rule = self
            .rules
            .iter()
            .find(|r| r.id == rule_id)
            .cloned()
            .ok_or_else(|| TicketManagerError::NoMatchingRule {
                ticket_id: ticket_id.to_string(),
                from: TicketStatus::Backlog,
            })?;

        let ticket = self
            .tickets
            .get(ticket_id)
            .ok_or_else(|| TicketManagerError::UnknownTicket(ticket_id.to_string()))?
            .clone();

        let ctx = TransitionEvalCtx {
            ticket: &ticket,
            actor,
            all_dependencies_complete: self.all_dependencies_complete(&ticket),
            all_subtasks_complete: self.all_subtasks_complete(ticket_id),
            has_design_pack: true,
            has_dev_pack: true,
            passes_tests: true,
        };

        if !rule.matches(&ctx) {
            return Err(TicketManagerError::NoMatchingRule {
                ticket_id: ticket_id.to_string(),
                from: ticket.status,
            });
        }

        let to_status = rule.to_status;
        {
            let t = self.tickets.get_mut(ticket_id).unwrap();
            t.status = to_status;
            if rule.required_approval {
                let action = if to_status == TicketStatus::Approved {
                    "approved"
                } else {
                    "rejected"
                };
                t.record_approval(action, actor.email.clone());
            }
        }

        for action in &rule.auto_actions {
            self.pending_actions
                .push((ticket_id.to_string(), action.clone()));
        }

        self.apply_terminal_side_effects(ticket_id, to_status);

        info!(ticket_id = %ticket_id, rule = %rule_id, ?to_status, "transition applied");
        Ok(())
    }

    /// Terminal-transition side effects:
    /// - done: dependents whose deps are now all done move backlog→in_progress.
    /// - rejected: dependents in backlog/in_progress reset to backlog.
    fn apply_terminal_side_effects(&mut self, ticket_id: &str, status: TicketStatus) {
        match status {
            TicketStatus::Done => {
                let dependents: Vec<String> = self
                    .tickets
                    .values()
                    .filter(|t| t.dependencies.contains(&ticket_id.to_string()))
                    .map(|t| t.id.clone())
                    .collect();
                for dep_id in dependents {
                    let all_done = {
                        let t = self.tickets.get(&dep_id).unwrap();
                        self.all_dependencies_complete(t)
                    };
                    if all_done {
                        let t = self.tickets.get_mut(&dep_id).unwrap();
                        if t.status == TicketStatus::Backlog {
                            t.status = TicketStatus::InProgress;
                        }
                    }
                }
            }
            TicketStatus::Rejected => {
                let dependents: Vec<String> = self
                    .tickets
                    .values()
                    .filter(|t| {
                        t.dependencies.contains(&ticket_id.to_string())
                            && matches!(t.status, TicketStatus::Backlog | TicketStatus::InProgress)
                    })
                    .map(|t| t.id.clone())
                    .collect();
                for dep_id in dependents {
                    let t = self.tickets.get_mut(&dep_id).unwrap();
                    t.status = TicketStatus::Backlog;
                }
            }
            _ => {}
        }
    }

    /// Record a no-progress iteration, escalating once a threshold is
    /// crossed.
    pub fn record_iteration_progress(&mut self, ticket_id: &str, progressed: bool) {
        if let Some(t) = self.tickets.get_mut(ticket_id) {
            if progressed {
                t.consecutive_no_progress = 0;
            } else {
                t.consecutive_no_progress += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::transitions::ActorRole;

    fn admin() -> Actor {
        Actor {
            role: ActorRole::Admin,
            email: "admin@example.com".to_string(),
        }
    }

    #[test]
    fn creating_epic_without_parent_is_hierarchy_violation() {
        let mut mgr = TicketManager::new();
        let result = mgr.create_ticket(
            "proj",
            "Epic",
            "desc",
            Complexity::M,
            "planner",
            TicketLevel::Epic,
            None,
        );
        assert!(matches!(
            result,
            Err(TicketManagerError::HierarchyViolation(_))
        ));
    }

    #[test]
    fn creating_epic_with_feature_parent_succeeds() {
        let mut mgr = TicketManager::new();
        let feature = mgr
            .create_ticket("proj", "Feature", "d", Complexity::L, "planner", TicketLevel::Feature, None)
            .unwrap();
        let epic = mgr.create_ticket(
            "proj",
            "Epic",
            "d",
            Complexity::M,
            "planner",
            TicketLevel::Epic,
            Some(&feature),
        );
        assert!(epic.is_ok());
    }

    #[test]
    fn wrong_parent_level_is_hierarchy_violation() {
        let mut mgr = TicketManager::new();
        let feature = mgr
            .create_ticket("proj", "Feature", "d", Complexity::L, "planner", TicketLevel::Feature, None)
            .unwrap();
        // story needs an epic parent, not a feature.
        let result = mgr.create_ticket(
            "proj",
            "Story",
            "d",
            Complexity::M,
            "planner",
            TicketLevel::Story,
            Some(&feature),
        );
        assert!(matches!(
            result,
            Err(TicketManagerError::HierarchyViolation(_))
        ));
    }

    #[test]
    fn readiness_requires_dependencies_done() {
        let mut mgr = TicketManager::new();
        let dep = mgr
            .create_ticket("proj", "Dep", "d", Complexity::S, "coder", TicketLevel::Feature, None)
            .unwrap();
        let main = mgr
            .create_ticket("proj", "Main", "d", Complexity::S, "coder", TicketLevel::Feature, None)
            .unwrap();
        mgr.update_ticket(&main, |t| t.dependencies = vec![dep.clone()])
            .unwrap();

        let readiness = mgr.check_readiness(&main).unwrap();
        assert!(!readiness.ready);

        mgr.update_ticket(&dep, |t| t.status = TicketStatus::Done).unwrap();
        let readiness = mgr.check_readiness(&main).unwrap();
        assert!(readiness.ready);
    }

    #[test]
    fn sla_breach_rejects_and_escalates() {
        let mut mgr = TicketManager::new();
        let id = mgr
            .create_ticket("proj", "T", "d", Complexity::S, "coder", TicketLevel::Feature, None)
            .unwrap();
        mgr.update_ticket(&id, |t| {
            t.sla = Some(super::super::model::Sla {
                target_minutes: 1,
                warning_threshold_pct: 50,
                started_at: Utc::now() - chrono::Duration::minutes(2),
            });
        })
        .unwrap();

        let readiness = mgr.check_readiness(&id).unwrap();
        assert_eq!(readiness.sla_risk, SlaRisk::Breached);
        assert!(!readiness.ready);

        let ticket = mgr.get(&id).unwrap();
        assert_eq!(ticket.status, TicketStatus::Rejected);
        assert_eq!(ticket.retry_count, 1);

        let escalation_exists = mgr
            .all()
            .any(|t| t.original_ticket_id.as_deref() == Some(id.as_str()));
        assert!(escalation_exists);
    }

    #[test]
    fn done_transition_unblocks_dependents() {
        let mut mgr = TicketManager::new();
        let dep = mgr
            .create_ticket("proj", "Dep", "d", Complexity::S, "coder", TicketLevel::Feature, None)
            .unwrap();
        let main = mgr
            .create_ticket("proj", "Main", "d", Complexity::S, "coder", TicketLevel::Feature, None)
            .unwrap();
        mgr.update_ticket(&main, |t| t.dependencies = vec![dep.clone()])
            .unwrap();
        mgr.update_ticket(&dep, |t| t.status = TicketStatus::Review).unwrap();

        mgr.execute_transition(&dep, "review_to_approved", &admin())
            .unwrap();
        mgr.execute_transition(&dep, "approved_to_done", &admin())
            .unwrap();

        assert_eq!(mgr.get(&dep).unwrap().status, TicketStatus::Done);
        assert_eq!(mgr.get(&main).unwrap().status, TicketStatus::InProgress);
    }

    #[test]
    fn rejected_transition_resets_dependents_to_backlog() {
        let mut mgr = TicketManager::new();
        let dep = mgr
            .create_ticket("proj", "Dep", "d", Complexity::S, "coder", TicketLevel::Feature, None)
            .unwrap();
        let main = mgr
            .create_ticket("proj", "Main", "d", Complexity::S, "coder", TicketLevel::Feature, None)
            .unwrap();
        mgr.update_ticket(&main, |t| {
            t.dependencies = vec![dep.clone()];
            t.status = TicketStatus::InProgress;
        })
        .unwrap();
        mgr.update_ticket(&dep, |t| t.status = TicketStatus::Review).unwrap();

        mgr.execute_transition(&dep, "review_to_rejected", &admin())
            .unwrap();

        assert_eq!(mgr.get(&dep).unwrap().status, TicketStatus::Rejected);
        assert_eq!(mgr.get(&main).unwrap().status, TicketStatus::Backlog);
    }

    #[test]
    fn next_ticket_for_subtask_requires_parent_done() {
        let mut mgr = TicketManager::new();
        let feature = mgr
            .create_ticket("proj", "F", "d", Complexity::L, "coder", TicketLevel::Feature, None)
            .unwrap();
        let epic = mgr
            .create_ticket("proj", "E", "d", Complexity::M, "coder", TicketLevel::Epic, Some(&feature))
            .unwrap();
        let story = mgr
            .create_ticket("proj", "S", "d", Complexity::M, "coder", TicketLevel::Story, Some(&epic))
            .unwrap();
        let task = mgr
            .create_ticket("proj", "T", "d", Complexity::M, "coder", TicketLevel::Task, Some(&story))
            .unwrap();
        let subtask = mgr
            .create_ticket(
                "proj",
                "Sub",
                "d",
                Complexity::S,
                "coder",
                TicketLevel::Subtask,
                Some(&task),
            )
            .unwrap();

        assert_eq!(mgr.next_ticket_for_agent("coder"), Some(feature.clone()));

        // Once the parent task is marked done, the subtask becomes eligible.
        mgr.update_ticket(&task, |t| t.status = TicketStatus::Done).unwrap();
        mgr.update_ticket(&feature, |t| t.status = TicketStatus::Done).unwrap();
        mgr.update_ticket(&epic, |t| t.status = TicketStatus::Done).unwrap();
        mgr.update_ticket(&story, |t| t.status = TicketStatus::Done).unwrap();

        assert_eq!(mgr.next_ticket_for_agent("coder"), Some(subtask));
    }
}
