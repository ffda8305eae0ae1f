//! Field Filter
//!
//! Restricts which attributes a mutation request may actually change.
//! System-managed fields are never writable through content updates;
//! approval fields are writable only by holders of the APPROVE capability
//! while the record sits in an approval status.

use std::collections::BTreeMap;

use crate::entity::{EntityKind, Status};
use crate::permissions::Action;

/// Fields managed by the workflow itself, never via content updates.
pub const PROTECTED_FIELDS: &[&str] = &[
    "entity_id",
    "org_id",
    "number",
    "kind",
    "status",
    "version",
    "submitter_id",
    "created_at",
    "updated_at",
];

/// Fields reserved for the approval action.
pub const APPROVAL_FIELDS: &[&str] = &["approval_comment", "disposition"];

/// Result of filtering a requested mutation.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// Fields the actor is allowed to change, in deterministic order.
    pub allowed: BTreeMap<String, serde_json::Value>,
    /// Requested fields that were dropped.
    pub dropped: Vec<String>,
}

impl FilterOutcome {
    /// All requested fields were dropped — the mutation is a no-op, not an
    /// error.
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

/// Stateless filter over a requested field map.
pub struct FieldFilter;

impl FieldFilter {
    /// Drop every field the actor's action set does not authorize for the
    /// entity's current status.
    pub fn filter(
        actions: Action,
        _kind: EntityKind,
        status: Status,
        requested: BTreeMap<String, serde_json::Value>,
    ) -> FilterOutcome {
        let approval_window =
            matches!(status, Status::PendingApproval | Status::Review) && actions.can_approve();

        let mut allowed = BTreeMap::new();
        let mut dropped = Vec::new();

        for (name, value) in requested {
            if PROTECTED_FIELDS.contains(&name.as_str()) {
                dropped.push(name);
            } else if APPROVAL_FIELDS.contains(&name.as_str()) {
                if approval_window {
                    allowed.insert(name, value);
                } else {
                    dropped.push(name);
                }
            } else if actions.can_update() {
                allowed.insert(name, value);
            } else {
                dropped.push(name);
            }
        }

        FilterOutcome { allowed, dropped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn requested(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_protected_fields_always_dropped() {
        let outcome = FieldFilter::filter(
            Action::all(),
            EntityKind::Request,
            Status::Draft,
            requested(&[
                ("status", json!("APPROVED")),
                ("description", json!("new text")),
            ]),
        );
        assert_eq!(outcome.dropped, vec!["status"]);
        assert!(outcome.allowed.contains_key("description"));
    }

    #[test]
    fn test_approval_fields_need_approve_and_approval_status() {
        // Submitter editing in draft: approval fields dropped.
        let outcome = FieldFilter::filter(
            Action::READ | Action::UPDATE,
            EntityKind::Request,
            Status::Draft,
            requested(&[("disposition", json!("use-as-is"))]),
        );
        assert!(outcome.is_empty());
        assert_eq!(outcome.dropped, vec!["disposition"]);

        // Approver during the approval window: allowed, even without UPDATE.
        let outcome = FieldFilter::filter(
            Action::READ | Action::APPROVE,
            EntityKind::Request,
            Status::PendingApproval,
            requested(&[("disposition", json!("use-as-is"))]),
        );
        assert!(outcome.allowed.contains_key("disposition"));
    }

    #[test]
    fn test_reader_cannot_write_anything() {
        let outcome = FieldFilter::filter(
            Action::READ,
            EntityKind::Order,
            Status::InProgress,
            requested(&[("description", json!("x")), ("effort", json!(3))]),
        );
        assert!(outcome.is_empty());
        assert_eq!(outcome.dropped.len(), 2);
    }
}
