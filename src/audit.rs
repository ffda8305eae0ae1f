//! Audit Trail
//!
//! Field-level diffing between a record's current and proposed content, and
//! the immutable revision records appended for every material change.
//! Comparison is by normalized string equality (null and missing are the
//! empty string) so type-incidental differences never generate spurious
//! revisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Normalize a field value for comparison and storage in revisions.
pub fn normalize(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

/// A computed field-level difference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    /// Changed field names, in deterministic (sorted) order.
    pub changed_fields: Vec<String>,
    pub previous_values: BTreeMap<String, String>,
    pub new_values: BTreeMap<String, String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.changed_fields.is_empty()
    }

    /// Synthesized note used when the caller supplies none.
    pub fn default_note(&self) -> String {
        format!(
            "Updated {} field(s): {}",
            self.changed_fields.len(),
            self.changed_fields.join(", ")
        )
    }
}

/// Stateless diff computation.
pub struct AuditTrail;

impl AuditTrail {
    /// Diff the proposed fields against the current content. Only fields
    /// named in `proposed` are considered — a mutation request is scoped to
    /// what it sends.
    pub fn diff(
        previous: &BTreeMap<String, serde_json::Value>,
        proposed: &BTreeMap<String, serde_json::Value>,
    ) -> Diff {
        let mut diff = Diff::default();

        for (name, new_value) in proposed {
            let old = normalize(previous.get(name));
            let new = normalize(Some(new_value));
            if old != new {
                diff.changed_fields.push(name.clone());
                diff.previous_values.insert(name.clone(), old);
                diff.new_values.insert(name.clone(), new);
            }
        }

        diff
    }
}

/// Immutable audit record of one content change. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    pub revision_id: Uuid,
    pub entity_id: Uuid,
    pub actor_id: Uuid,
    pub changed_fields: Vec<String>,
    pub previous_values: BTreeMap<String, String>,
    pub new_values: BTreeMap<String, String>,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl Revision {
    /// Build a revision from a diff; None when the diff is empty (identical
    /// content never writes history).
    pub fn from_diff(
        entity_id: Uuid,
        actor_id: Uuid,
        diff: Diff,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if diff.is_empty() {
            return None;
        }
        let note = note.unwrap_or_else(|| diff.default_note());
        Some(Self {
            revision_id: Uuid::new_v4(),
            entity_id,
            actor_id,
            changed_fields: diff.changed_fields,
            previous_values: diff.previous_values,
            new_values: diff.new_values,
            note,
            created_at: now,
        })
    }
}
