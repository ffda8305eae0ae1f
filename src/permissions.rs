//! Permission Engine
//!
//! Computes the set of actions an actor may take on a specific record.
//! Base grants come from the capability matrix; context overrides (being
//! the submitter or assignee) layer on top. Organization scoping is a hard
//! precondition evaluated before anything else — a cross-organization
//! actor sees NOT_FOUND, never a permission denial, so record existence
//! does not leak across tenants.

use bitflags::bitflags;

use crate::definition::CapabilityMatrix;
use crate::entity::{Actor, ChangeEntity};
use crate::error::WorkflowError;

bitflags! {
    /// Actions an actor can take on a change record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct Action: u32 {
        const READ = 1 << 0;
        const UPDATE = 1 << 1;
        const APPROVE = 1 << 2;
        const REJECT = 1 << 3;
        const TRANSITION = 1 << 4;
    }
}

impl Action {
    pub fn can_read(&self) -> bool {
        self.contains(Action::READ)
    }

    pub fn can_update(&self) -> bool {
        self.contains(Action::UPDATE)
    }

    pub fn can_approve(&self) -> bool {
        self.contains(Action::APPROVE)
    }

    /// Flag names, for attaching to entity views.
    pub fn names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        for (name, flag) in [
            ("READ", Action::READ),
            ("UPDATE", Action::UPDATE),
            ("APPROVE", Action::APPROVE),
            ("REJECT", Action::REJECT),
            ("TRANSITION", Action::TRANSITION),
        ] {
            if self.contains(flag) {
                out.push(name);
            }
        }
        out
    }

    fn name_of(action: Action) -> &'static str {
        if action == Action::APPROVE {
            "APPROVE"
        } else if action == Action::REJECT {
            "REJECT"
        } else if action == Action::UPDATE {
            "UPDATE"
        } else if action == Action::TRANSITION {
            "TRANSITION"
        } else if action == Action::READ {
            "READ"
        } else {
            "ACTION"
        }
    }
}

/// Context-aware permission evaluation over the capability matrix.
pub struct PermissionEngine {
    matrix: CapabilityMatrix,
}

impl PermissionEngine {
    pub fn new(matrix: CapabilityMatrix) -> Self {
        Self { matrix }
    }

    pub fn standard() -> Self {
        Self::new(CapabilityMatrix::standard())
    }

    /// Compute the full action set for an actor on an entity.
    ///
    /// Returns the empty set when the actor's organization does not match —
    /// callers translate that to NOT_FOUND, never to a denial.
    pub fn allowed_actions(&self, actor: &Actor, entity: &ChangeEntity) -> Action {
        if actor.org_id != entity.org_id {
            return Action::empty();
        }

        // Role grants, plus the organization-wide READ floor.
        let mut actions =
            self.matrix.grants(actor.role, entity.kind, entity.status) | Action::READ;

        // Submitter keeps editing while the record is still theirs to shape.
        if entity.submitter_id == actor.user_id
            && self
                .matrix
                .submitter_editable
                .for_kind(entity.kind)
                .contains(&entity.status)
        {
            actions |= Action::UPDATE;
        }

        // Assignee edits while the record is actively being worked.
        if entity.assignee_id == Some(actor.user_id)
            && self
                .matrix
                .assignee_editable
                .for_kind(entity.kind)
                .contains(&entity.status)
        {
            actions |= Action::UPDATE;
        }

        actions
    }

    /// Require a capability, or fail with an explainable error.
    ///
    /// Cross-organization access is NOT_FOUND by contract.
    pub fn require(
        &self,
        actor: &Actor,
        entity: &ChangeEntity,
        action: Action,
    ) -> Result<(), WorkflowError> {
        if actor.org_id != entity.org_id {
            return Err(WorkflowError::NotFound { kind: entity.kind });
        }
        if self.allowed_actions(actor, entity).contains(action) {
            Ok(())
        } else {
            Err(WorkflowError::Authorization {
                reason: self.explain_denial(actor, entity, action),
            })
        }
    }

    /// Human-readable denial reason, e.g.
    /// `role MANUFACTURING cannot APPROVE while status=DRAFT`.
    pub fn explain_denial(&self, actor: &Actor, entity: &ChangeEntity, action: Action) -> String {
        format!(
            "role {} cannot {} while status={}",
            actor.role,
            Action::name_of(action),
            entity.status
        )
    }
}
