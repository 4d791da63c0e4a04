//! Ticket data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hierarchy levels. Parent rules:
/// epic→feature, story→epic, task→story, subtask→task, subatomic→subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketLevel {
    Feature,
    Epic,
    Story,
    Task,
    Subtask,
    Subatomic,
}

impl TicketLevel {
    /// The level a ticket's parent must be at, or `None` if this level is
    /// a root (no parent required).
    pub fn required_parent_level(self) -> Option<TicketLevel> {
        match self {
            Self::Feature => None,
            Self::Epic => Some(Self::Feature),
            Self::Story => Some(Self::Epic),
            Self::Task => Some(Self::Story),
            Self::Subtask => Some(Self::Task),
            Self::Subatomic => Some(Self::Subtask),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Complexity {
    S,
    M,
    L,
    Xl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Backlog,
    InProgress,
    Review,
    Approved,
    Rejected,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    Task,
    Escalation,
}

/// Approval gates a ticket requires before it can transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Approvals {
    pub required_gates: Vec<String>,
    pub approved_gates: Vec<String>,
}

impl Approvals {
    pub fn all_required_gates_approved(&self) -> bool {
        self.required_gates
            .iter()
            .all(|g| self.approved_gates.contains(g))
    }
}

/// SLA timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sla {
    pub target_minutes: u32,
    pub warning_threshold_pct: u8,
    pub started_at: DateTime<Utc>,
}

/// A single approval-history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub actor_email: String,
}

/// Ticket entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub complexity: Complexity,
    pub status: TicketStatus,
    pub assigned_role: String,
    pub level: Option<TicketLevel>,
    pub parent_id: Option<String>,
    pub dependencies: Vec<String>,
    pub evidence_ids: Vec<String>,
    pub approvals: Approvals,
    pub sla: Option<Sla>,
    pub retry_count: u8,
    #[serde(rename = "type")]
    pub ticket_type: Option<TicketType>,
    pub original_ticket_id: Option<String>,
    pub approval_history: Vec<ApprovalRecord>,
    /// Consecutive iterations with no observable progress — feeds the
    /// friction-style escalation that fires once a ticket stalls for too
    /// long.
    pub consecutive_no_progress: u32,
}

impl Ticket {
    pub fn new(
        project_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        complexity: Complexity,
        assigned_role: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            title: title.into(),
            description: description.into(),
            acceptance_criteria: Vec::new(),
            complexity,
            status: TicketStatus::Backlog,
            assigned_role: assigned_role.into(),
            level: None,
            parent_id: None,
            dependencies: Vec::new(),
            evidence_ids: Vec::new(),
            approvals: Approvals::default(),
            sla: None,
            retry_count: 0,
            ticket_type: Some(TicketType::Task),
            original_ticket_id: None,
            approval_history: Vec::new(),
            consecutive_no_progress: 0,
        }
    }

    pub fn with_level(mut self, level: TicketLevel, parent_id: Option<String>) -> Self {
        self.level = Some(level);
        self.parent_id = parent_id;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_sla(mut self, target_minutes: u32, warning_threshold_pct: u8) -> Self {
        self.sla = Some(Sla {
            target_minutes,
            warning_threshold_pct,
            started_at: Utc::now(),
        });
        self
    }

    pub fn record_approval(&mut self, action: impl Into<String>, actor_email: impl Into<String>) {
        self.approval_history.push(ApprovalRecord {
            action: action.into(),
            timestamp: Utc::now(),
            actor_email: actor_email.into(),
        });
    }
}
