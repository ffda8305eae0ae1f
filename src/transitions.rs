//! Transition Rules
//!
//! Pure validation of status changes against the kind's graph: edge
//! existence, per-edge role gates, and guard preconditions. Every violated
//! clause is collected so the caller can show a complete explanation, not
//! just the first failure. A successful transition also yields the
//! deterministic milestone patch applied by the workflow service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::{Guard, WorkflowDefinitions};
use crate::entity::{ChangeEntity, EntityKind, Milestones, Role, Status};

/// A violated validation clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Violation {
    /// No such edge in the kind's graph. Carries the real allowed set.
    EdgeNotAllowed {
        from: Status,
        to: Status,
        allowed: Vec<Status>,
    },
    /// Edge exists but is gated to other roles.
    RoleNotPermitted {
        role: Role,
        from: Status,
        to: Status,
    },
    /// An edge guard precondition failed.
    GuardFailed { guard: Guard, detail: String },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EdgeNotAllowed { from, to, allowed } => {
                let allowed = allowed
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "transition {} -> {} is not allowed (allowed: [{}])",
                    from, to, allowed
                )
            }
            Self::RoleNotPermitted { role, from, to } => {
                write!(f, "role {} may not perform {} -> {}", role, from, to)
            }
            Self::GuardFailed { detail, .. } => write!(f, "{}", detail),
        }
    }
}

/// Snapshot of linked data a guard may need. Built by the caller from
/// canonical state; guards never touch storage.
#[derive(Debug, Clone, Default)]
pub struct GuardContext {
    /// (public number, status) of every Request bundled into the Order.
    pub bundled_requests: Vec<(String, Status)>,
    /// Recipient count of the Notice.
    pub recipient_count: usize,
}

/// Deterministic patch of derived fields produced by a transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MilestonePatch {
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approver_id: Option<Uuid>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub distributed_at: Option<DateTime<Utc>>,
    pub effective_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl MilestonePatch {
    /// Apply to an entity's milestones. `distributed_at` is only set when
    /// not already present (re-distribution keeps the original date).
    pub fn apply(&self, entity: &mut ChangeEntity) {
        let m: &mut Milestones = &mut entity.milestones;
        if self.submitted_at.is_some() {
            m.submitted_at = self.submitted_at;
        }
        if self.approved_at.is_some() {
            m.approved_at = self.approved_at;
            entity.approver_id = self.approver_id;
        }
        if self.rejected_at.is_some() {
            m.rejected_at = self.rejected_at;
            entity.approver_id = self.approver_id;
        }
        if self.completed_at.is_some() {
            m.completed_at = self.completed_at;
        }
        if self.distributed_at.is_some() && m.distributed_at.is_none() {
            m.distributed_at = self.distributed_at;
        }
        if self.effective_at.is_some() {
            m.effective_at = self.effective_at;
        }
        if self.cancelled_at.is_some() {
            m.cancelled_at = self.cancelled_at;
        }
    }
}

/// Transition validation over the loaded definitions.
pub struct TransitionRules {
    defs: WorkflowDefinitions,
}

impl TransitionRules {
    pub fn new(defs: WorkflowDefinitions) -> Self {
        Self { defs }
    }

    pub fn standard() -> Self {
        Self::new(WorkflowDefinitions::standard())
    }

    pub fn definitions(&self) -> &WorkflowDefinitions {
        &self.defs
    }

    pub fn initial_status(&self, kind: EntityKind) -> Status {
        self.defs.for_kind(kind).initial
    }

    /// Legal target statuses from `from`; empty exactly for terminal states.
    pub fn allowed_next(&self, kind: EntityKind, from: Status) -> Vec<Status> {
        self.defs.for_kind(kind).allowed_next(from)
    }

    pub fn is_terminal(&self, kind: EntityKind, status: Status) -> bool {
        self.allowed_next(kind, status).is_empty()
    }

    /// Whether the target status requires the APPROVE/REJECT capability
    /// recheck (rules govern shape, the permission engine governs who).
    pub fn is_approval_edge(&self, to: Status) -> bool {
        matches!(to, Status::Approved | Status::Rejected)
    }

    /// Validate a transition, collecting every violated clause.
    pub fn validate(
        &self,
        entity: &ChangeEntity,
        to: Status,
        actor_role: Role,
        ctx: &GuardContext,
    ) -> Result<(), Vec<Violation>> {
        let def = self.defs.for_kind(entity.kind);
        let from = entity.status;

        let Some(edge) = def.edge(from, to) else {
            // Without an edge the role and guard clauses have no subject.
            return Err(vec![Violation::EdgeNotAllowed {
                from,
                to,
                allowed: def.allowed_next(from),
            }]);
        };

        let mut violations = Vec::new();

        if !edge.roles.is_empty() && !edge.roles.contains(&actor_role) {
            violations.push(Violation::RoleNotPermitted {
                role: actor_role,
                from,
                to,
            });
        }

        if let Some(guard) = edge.guard {
            if let Some(detail) = evaluate_guard(guard, entity, ctx) {
                violations.push(Violation::GuardFailed { guard, detail });
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Compute the milestone patch for entering `to`.
    pub fn milestone_patch(&self, to: Status, actor_id: Uuid, now: DateTime<Utc>) -> MilestonePatch {
        let mut patch = MilestonePatch::default();
        match to {
            Status::Submitted => patch.submitted_at = Some(now),
            Status::Approved => {
                patch.approved_at = Some(now);
                patch.approver_id = Some(actor_id);
            }
            Status::Rejected => {
                patch.rejected_at = Some(now);
                patch.approver_id = Some(actor_id);
            }
            Status::Completed => patch.completed_at = Some(now),
            Status::Distributed => patch.distributed_at = Some(now),
            Status::Effective => patch.effective_at = Some(now),
            Status::Cancelled => patch.cancelled_at = Some(now),
            _ => {}
        }
        patch
    }
}

/// Evaluate one guard; returns the failure detail, or None when satisfied.
fn evaluate_guard(guard: Guard, entity: &ChangeEntity, ctx: &GuardContext) -> Option<String> {
    match guard {
        Guard::JustificationPresent => {
            if entity.field_str("justification").is_some()
                || entity.field_str("root_cause").is_some()
            {
                None
            } else {
                Some("a justification or root_cause field is required before approval review".to_string())
            }
        }
        Guard::BundledRequestsApproved => {
            let blocking: Vec<&str> = ctx
                .bundled_requests
                .iter()
                .filter(|(_, status)| *status != Status::Approved)
                .map(|(number, _)| number.as_str())
                .collect();
            if blocking.is_empty() {
                None
            } else {
                Some(format!(
                    "bundled requests not yet APPROVED: {}",
                    blocking.join(", ")
                ))
            }
        }
        Guard::HasBundledRequests => {
            if ctx.bundled_requests.is_empty() {
                Some("order has no bundled requests".to_string())
            } else {
                None
            }
        }
        Guard::HasRecipients => {
            if ctx.recipient_count == 0 {
                Some("notice has no recipients".to_string())
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(status: Status) -> ChangeEntity {
        ChangeEntity::new(
            EntityKind::Request,
            Uuid::new_v4(),
            "ECR-0001".to_string(),
            Uuid::new_v4(),
            "Test".to_string(),
            status,
        )
    }

    fn order(status: Status) -> ChangeEntity {
        ChangeEntity::new(
            EntityKind::Order,
            Uuid::new_v4(),
            "ECO-0001".to_string(),
            Uuid::new_v4(),
            "Test".to_string(),
            status,
        )
    }

    #[test]
    fn test_every_non_terminal_status_has_a_next() {
        let rules = TransitionRules::standard();
        for kind in [EntityKind::Request, EntityKind::Order, EntityKind::Notice] {
            for status in rules.definitions().for_kind(kind).statuses() {
                let next = rules.allowed_next(kind, status);
                if rules.is_terminal(kind, status) {
                    assert!(next.is_empty(), "{kind} {status} should be terminal");
                } else {
                    assert!(!next.is_empty(), "{kind} {status} should have a next");
                }
            }
        }
    }

    #[test]
    fn test_illegal_edge_reports_allowed_set() {
        let rules = TransitionRules::standard();
        let entity = request(Status::Draft);
        let err = rules
            .validate(&entity, Status::Approved, Role::Manager, &GuardContext::default())
            .unwrap_err();

        match &err[0] {
            Violation::EdgeNotAllowed { allowed, .. } => {
                assert!(allowed.contains(&Status::Submitted));
                assert!(allowed.contains(&Status::Cancelled));
            }
            other => panic!("expected EdgeNotAllowed, got {other:?}"),
        }
    }

    #[test]
    fn test_role_gate_on_approval_edge() {
        let rules = TransitionRules::standard();
        let entity = request(Status::PendingApproval);

        let err = rules
            .validate(&entity, Status::Approved, Role::Engineer, &GuardContext::default())
            .unwrap_err();
        assert!(matches!(err[0], Violation::RoleNotPermitted { .. }));

        assert!(rules
            .validate(&entity, Status::Approved, Role::Manager, &GuardContext::default())
            .is_ok());
    }

    #[test]
    fn test_justification_guard() {
        let rules = TransitionRules::standard();
        let mut entity = request(Status::InAnalysis);

        let err = rules
            .validate(
                &entity,
                Status::PendingApproval,
                Role::Engineer,
                &GuardContext::default(),
            )
            .unwrap_err();
        assert!(matches!(err[0], Violation::GuardFailed { .. }));

        entity.fields.insert(
            "justification".to_string(),
            serde_json::json!("vibration fatigue at mount point"),
        );
        assert!(rules
            .validate(
                &entity,
                Status::PendingApproval,
                Role::Engineer,
                &GuardContext::default(),
            )
            .is_ok());
    }

    #[test]
    fn test_order_completion_blocked_by_unapproved_request() {
        let rules = TransitionRules::standard();
        let entity = order(Status::Review);
        let ctx = GuardContext {
            bundled_requests: vec![
                ("ECR-0001".to_string(), Status::Approved),
                ("ECR-0002".to_string(), Status::Draft),
            ],
            recipient_count: 0,
        };

        let err = rules
            .validate(&entity, Status::Completed, Role::Engineer, &ctx)
            .unwrap_err();
        let detail = err[0].to_string();
        assert!(detail.contains("ECR-0002"), "should cite the blocker: {detail}");
        assert!(!detail.contains("ECR-0001"));
    }

    #[test]
    fn test_multiple_violations_collected() {
        // Synthesize an edge that is both role-gated and guarded so a single
        // attempt violates two clauses at once.
        let yaml = r#"
request:
  initial: DRAFT
  transitions:
    - from: REVIEW
      to: COMPLETED
      roles: [MANAGER]
      guard: bundled_requests_approved
order:
  initial: DRAFT
  transitions: []
notice:
  initial: DRAFT
  transitions: []
"#;
        let rules = TransitionRules::new(
            crate::definition::WorkflowDefinitions::from_yaml_str(yaml).unwrap(),
        );
        let entity = request(Status::Review);
        let ctx = GuardContext {
            bundled_requests: vec![("ECR-0009".to_string(), Status::Draft)],
            recipient_count: 0,
        };

        let err = rules
            .validate(&entity, Status::Completed, Role::Engineer, &ctx)
            .unwrap_err();
        assert_eq!(err.len(), 2);
        assert!(matches!(err[0], Violation::RoleNotPermitted { .. }));
        assert!(matches!(err[1], Violation::GuardFailed { .. }));
    }

    #[test]
    fn test_milestone_patch_fields() {
        let rules = TransitionRules::standard();
        let actor = Uuid::new_v4();
        let now = Utc::now();

        let patch = rules.milestone_patch(Status::Approved, actor, now);
        assert_eq!(patch.approved_at, Some(now));
        assert_eq!(patch.approver_id, Some(actor));
        assert_eq!(patch.submitted_at, None);

        let patch = rules.milestone_patch(Status::UnderReview, actor, now);
        assert_eq!(patch, MilestonePatch::default());
    }

    #[test]
    fn test_distributed_at_is_set_once() {
        let rules = TransitionRules::standard();
        let mut entity = request(Status::Draft);
        let first = Utc::now();

        rules
            .milestone_patch(Status::Distributed, Uuid::new_v4(), first)
            .apply(&mut entity);
        assert_eq!(entity.milestones.distributed_at, Some(first));

        let later = first + chrono::Duration::hours(1);
        rules
            .milestone_patch(Status::Distributed, Uuid::new_v4(), later)
            .apply(&mut entity);
        assert_eq!(entity.milestones.distributed_at, Some(first));
    }
}
