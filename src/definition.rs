//! Workflow Definition Tables
//!
//! The status graphs and the role-capability matrix are data, not code:
//! both ship with a built-in standard set and can be loaded from YAML so
//! new roles or edges are configuration changes.

use serde::{Deserialize, Serialize};

use crate::entity::{EntityKind, Role, Status};
use crate::error::WorkflowError;
use crate::permissions::Action;

/// Pure precondition attached to a transition edge, evaluated against a
/// snapshot of linked data (never against storage directly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// Request must carry a non-empty justification/root-cause field.
    JustificationPresent,
    /// Every Request bundled into the Order must be APPROVED.
    BundledRequestsApproved,
    /// The Order must bundle at least one Request.
    HasBundledRequests,
    /// The Notice must have at least one recipient.
    HasRecipients,
}

/// One legal edge in a kind's status graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub from: Status,
    pub to: Status,
    /// Roles allowed to invoke this edge; empty means any role holding the
    /// TRANSITION capability.
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,
}

impl TransitionSpec {
    fn new(from: Status, to: Status) -> Self {
        Self {
            from,
            to,
            roles: Vec::new(),
            guard: None,
        }
    }

    fn with_roles(mut self, roles: &[Role]) -> Self {
        self.roles = roles.to_vec();
        self
    }

    fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }
}

/// Status graph for one entity kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindDefinition {
    pub initial: Status,
    pub transitions: Vec<TransitionSpec>,
}

impl KindDefinition {
    /// Legal target statuses from `from`. Empty exactly for terminal states.
    pub fn allowed_next(&self, from: Status) -> Vec<Status> {
        self.transitions
            .iter()
            .filter(|t| t.from == from)
            .map(|t| t.to)
            .collect()
    }

    pub fn edge(&self, from: Status, to: Status) -> Option<&TransitionSpec> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.to == to)
    }

    /// Every status that appears in this graph.
    pub fn statuses(&self) -> Vec<Status> {
        let mut seen = Vec::new();
        for t in &self.transitions {
            for s in [t.from, t.to] {
                if !seen.contains(&s) {
                    seen.push(s);
                }
            }
        }
        seen
    }
}

/// The three status graphs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinitions {
    pub request: KindDefinition,
    pub order: KindDefinition,
    pub notice: KindDefinition,
}

impl WorkflowDefinitions {
    pub fn for_kind(&self, kind: EntityKind) -> &KindDefinition {
        match kind {
            EntityKind::Request => &self.request,
            EntityKind::Order => &self.order,
            EntityKind::Notice => &self.notice,
        }
    }

    /// Load from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, WorkflowError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| WorkflowError::Validation(vec![format!("invalid definitions: {}", e)]))
    }

    /// Built-in standard graphs.
    pub fn standard() -> Self {
        use Status::*;

        let approvers = [Role::Manager, Role::Admin];

        let mut request = vec![
            TransitionSpec::new(Draft, Submitted),
            TransitionSpec::new(Submitted, UnderReview),
            TransitionSpec::new(UnderReview, InAnalysis),
            TransitionSpec::new(InAnalysis, PendingApproval).with_guard(Guard::JustificationPresent),
            TransitionSpec::new(PendingApproval, Approved).with_roles(&approvers),
            TransitionSpec::new(PendingApproval, Rejected).with_roles(&approvers),
        ];
        for from in [Draft, Submitted, UnderReview, InAnalysis, PendingApproval] {
            request.push(TransitionSpec::new(from, Cancelled));
        }

        let mut order = vec![
            TransitionSpec::new(Draft, Backlog),
            TransitionSpec::new(Draft, InProgress).with_guard(Guard::HasBundledRequests),
            TransitionSpec::new(Backlog, InProgress).with_guard(Guard::HasBundledRequests),
            TransitionSpec::new(InProgress, Review),
            TransitionSpec::new(Review, InProgress),
            TransitionSpec::new(Review, Completed).with_guard(Guard::BundledRequestsApproved),
        ];
        for from in [Draft, Backlog, InProgress, Review] {
            order.push(TransitionSpec::new(from, Cancelled));
        }

        let notice = vec![
            TransitionSpec::new(Draft, PendingApproval),
            TransitionSpec::new(PendingApproval, Draft),
            TransitionSpec::new(PendingApproval, Approved).with_roles(&approvers),
            TransitionSpec::new(PendingApproval, Rejected).with_roles(&approvers),
            TransitionSpec::new(Approved, Distributed).with_guard(Guard::HasRecipients),
            TransitionSpec::new(Distributed, Effective)
                .with_roles(&[Role::Quality, Role::Manager, Role::Admin]),
            TransitionSpec::new(Draft, Cancelled),
            TransitionSpec::new(PendingApproval, Cancelled),
            TransitionSpec::new(Approved, Cancelled),
        ];

        Self {
            request: KindDefinition {
                initial: Draft,
                transitions: request,
            },
            order: KindDefinition {
                initial: Draft,
                transitions: order,
            },
            notice: KindDefinition {
                initial: Draft,
                transitions: notice,
            },
        }
    }
}

/// One row of the capability matrix: role × kind × status → actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRule {
    pub role: Role,
    /// Kinds this rule applies to; empty means all kinds.
    #[serde(default)]
    pub kinds: Vec<EntityKind>,
    /// Statuses this rule applies to; empty means any status.
    #[serde(default)]
    pub statuses: Vec<Status>,
    pub actions: Action,
}

impl CapabilityRule {
    fn matches(&self, role: Role, kind: EntityKind, status: Status) -> bool {
        self.role == role
            && (self.kinds.is_empty() || self.kinds.contains(&kind))
            && (self.statuses.is_empty() || self.statuses.contains(&status))
    }
}

/// Per-kind status subsets for the context overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditableSets {
    #[serde(default)]
    pub request: Vec<Status>,
    #[serde(default)]
    pub order: Vec<Status>,
    #[serde(default)]
    pub notice: Vec<Status>,
}

impl EditableSets {
    pub fn for_kind(&self, kind: EntityKind) -> &[Status] {
        match kind {
            EntityKind::Request => &self.request,
            EntityKind::Order => &self.order,
            EntityKind::Notice => &self.notice,
        }
    }
}

/// Role-capability matrix plus the submitter/assignee context subsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityMatrix {
    pub rules: Vec<CapabilityRule>,
    /// Statuses in which the submitter may edit regardless of role.
    pub submitter_editable: EditableSets,
    /// Statuses in which the assignee may edit regardless of role.
    pub assignee_editable: EditableSets,
}

impl CapabilityMatrix {
    /// Union of all role-grant actions for (role, kind, status).
    pub fn grants(&self, role: Role, kind: EntityKind, status: Status) -> Action {
        self.rules
            .iter()
            .filter(|r| r.matches(role, kind, status))
            .fold(Action::empty(), |acc, r| acc | r.actions)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, WorkflowError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| WorkflowError::Validation(vec![format!("invalid matrix: {}", e)]))
    }

    /// Built-in standard matrix.
    pub fn standard() -> Self {
        use Status::*;

        let rules = vec![
            // Admin holds everything, everywhere.
            CapabilityRule {
                role: Role::Admin,
                kinds: vec![],
                statuses: vec![],
                actions: Action::all(),
            },
            // Managers drive and edit all records, and sign off approvals.
            CapabilityRule {
                role: Role::Manager,
                kinds: vec![],
                statuses: vec![],
                actions: Action::READ | Action::UPDATE | Action::TRANSITION,
            },
            CapabilityRule {
                role: Role::Manager,
                kinds: vec![EntityKind::Request, EntityKind::Notice],
                statuses: vec![PendingApproval],
                actions: Action::APPROVE | Action::REJECT,
            },
            // Engineers author requests and work orders/notices pre-approval.
            CapabilityRule {
                role: Role::Engineer,
                kinds: vec![EntityKind::Request],
                statuses: vec![Draft, Submitted, UnderReview, InAnalysis, PendingApproval],
                actions: Action::READ | Action::UPDATE | Action::TRANSITION,
            },
            CapabilityRule {
                role: Role::Engineer,
                kinds: vec![EntityKind::Order],
                statuses: vec![Draft, Backlog, InProgress, Review],
                actions: Action::READ | Action::UPDATE | Action::TRANSITION,
            },
            CapabilityRule {
                role: Role::Engineer,
                kinds: vec![EntityKind::Notice],
                statuses: vec![Draft],
                actions: Action::READ | Action::UPDATE | Action::TRANSITION,
            },
            // Quality confirms distributed notices went effective.
            CapabilityRule {
                role: Role::Quality,
                kinds: vec![EntityKind::Notice],
                statuses: vec![Distributed],
                actions: Action::READ | Action::TRANSITION,
            },
            // Manufacturing and Viewer fall through to the READ floor.
        ];

        Self {
            rules,
            submitter_editable: EditableSets {
                request: vec![Draft, Submitted],
                order: vec![Draft, Backlog],
                notice: vec![Draft],
            },
            assignee_editable: EditableSets {
                request: vec![UnderReview, InAnalysis],
                order: vec![Backlog, InProgress, Review],
                notice: vec![Draft, PendingApproval],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_graphs_have_initial_and_terminal_states() {
        let defs = WorkflowDefinitions::standard();
        assert_eq!(defs.request.initial, Status::Draft);

        // Approved is absorbing for requests.
        assert!(defs.request.allowed_next(Status::Approved).is_empty());
        assert!(defs.request.allowed_next(Status::Rejected).is_empty());
        assert!(defs.order.allowed_next(Status::Completed).is_empty());
        assert!(defs.notice.allowed_next(Status::Effective).is_empty());

        // Draft always has a way forward.
        assert!(!defs.request.allowed_next(Status::Draft).is_empty());
    }

    #[test]
    fn test_approval_edges_are_role_gated() {
        let defs = WorkflowDefinitions::standard();
        let edge = defs
            .request
            .edge(Status::PendingApproval, Status::Approved)
            .unwrap();
        assert!(edge.roles.contains(&Role::Manager));
        assert!(!edge.roles.contains(&Role::Engineer));
    }

    #[test]
    fn test_matrix_grants_union() {
        let matrix = CapabilityMatrix::standard();
        let manager = matrix.grants(
            Role::Manager,
            EntityKind::Request,
            Status::PendingApproval,
        );
        assert!(manager.contains(Action::APPROVE));
        assert!(manager.contains(Action::TRANSITION));

        let engineer = matrix.grants(
            Role::Engineer,
            EntityKind::Request,
            Status::PendingApproval,
        );
        assert!(!engineer.contains(Action::APPROVE));
        assert!(engineer.contains(Action::TRANSITION));

        // Manufacturing holds no explicit grants.
        let mfg = matrix.grants(Role::Manufacturing, EntityKind::Request, Status::Draft);
        assert!(mfg.is_empty());
    }

    #[test]
    fn test_definitions_load_from_yaml() {
        let yaml = r#"
request:
  initial: DRAFT
  transitions:
    - from: DRAFT
      to: SUBMITTED
    - from: SUBMITTED
      to: APPROVED
      roles: [MANAGER]
order:
  initial: DRAFT
  transitions:
    - from: DRAFT
      to: IN_PROGRESS
      guard: has_bundled_requests
notice:
  initial: DRAFT
  transitions:
    - from: DRAFT
      to: DISTRIBUTED
      guard: has_recipients
"#;
        let defs = WorkflowDefinitions::from_yaml_str(yaml).unwrap();
        assert_eq!(
            defs.request.allowed_next(Status::Draft),
            vec![Status::Submitted]
        );
        let edge = defs
            .order
            .edge(Status::Draft, Status::InProgress)
            .unwrap();
        assert_eq!(edge.guard, Some(Guard::HasBundledRequests));
    }
}
