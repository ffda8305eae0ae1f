//! Change-Record Entity Types
//!
//! Defines the three change-record kinds (Request, Order, Notice), their
//! status vocabulary, milestone timestamps, and the lineage links between
//! them (many Requests → one Order → one Notice).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::distribution::DistributionPolicy;

/// The three change-record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Engineering change request (ECR)
    Request,
    /// Engineering change order (ECO)
    Order,
    /// Engineering change notice (ECN)
    Notice,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Order => "order",
            Self::Notice => "notice",
        }
    }

    /// Prefix used in public numbers (`ECR-0001`, `ECO-0001`, `ECN-0001`).
    pub fn number_prefix(&self) -> &'static str {
        match self {
            Self::Request => "ECR",
            Self::Order => "ECO",
            Self::Notice => "ECN",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(Self::Request),
            "order" => Ok(Self::Order),
            "notice" => Ok(Self::Notice),
            _ => Err(format!("Unknown entity kind: {}", s)),
        }
    }
}

/// Status vocabulary shared across the three kinds.
///
/// Each kind uses its own subgraph of these statuses; the legal edges live
/// in the transition definitions, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Draft,
    Submitted,
    UnderReview,
    InAnalysis,
    PendingApproval,
    Approved,
    Rejected,
    Backlog,
    InProgress,
    Review,
    Completed,
    Distributed,
    Effective,
    Cancelled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Submitted => "SUBMITTED",
            Self::UnderReview => "UNDER_REVIEW",
            Self::InAnalysis => "IN_ANALYSIS",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Backlog => "BACKLOG",
            Self::InProgress => "IN_PROGRESS",
            Self::Review => "REVIEW",
            Self::Completed => "COMPLETED",
            Self::Distributed => "DISTRIBUTED",
            Self::Effective => "EFFECTIVE",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority of a change record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Organizational roles recognized by the capability matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Engineer,
    Manager,
    Manufacturing,
    Quality,
    Admin,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Engineer => "ENGINEER",
            Self::Manager => "MANAGER",
            Self::Manufacturing => "MANUFACTURING",
            Self::Quality => "QUALITY",
            Self::Admin => "ADMIN",
            Self::Viewer => "VIEWER",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A verified caller: identity, role, and organization.
///
/// Session verification happens upstream; the core trusts these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    pub org_id: Uuid,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role, org_id: Uuid) -> Self {
        Self {
            user_id,
            role,
            org_id,
        }
    }
}

/// Milestone timestamps, set once by transition patches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Milestones {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Lineage links between change records.
///
/// A Request bundles into at most one Order; an Order carries many Requests
/// and at most one Notice; a Notice traces back to exactly one Order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityLinks {
    /// For a Request: the Order it is bundled into. For a Notice: its Order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    /// For an Order: its Notice, if one has been attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice_id: Option<Uuid>,
    /// For an Order: the bundled Requests.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_ids: Vec<Uuid>,
}

/// A change record: Request, Order, or Notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEntity {
    pub entity_id: Uuid,
    pub org_id: Uuid,
    /// Public number, e.g. `ECR-0042`. Sequential per kind per organization.
    pub number: String,
    pub kind: EntityKind,
    pub status: Status,
    pub title: String,
    #[serde(default)]
    pub priority: Priority,
    pub submitter_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<Uuid>,
    /// Free-form content fields (description, justification, disposition, …).
    /// Ordered map so diffs are deterministic.
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub milestones: Milestones,
    #[serde(default)]
    pub links: EntityLinks,
    /// Automatic reminder/escalation policy; meaningful for Notices only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_policy: Option<DistributionPolicy>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChangeEntity {
    /// Create a new record in its kind's initial status.
    pub fn new(
        kind: EntityKind,
        org_id: Uuid,
        number: String,
        submitter_id: Uuid,
        title: String,
        initial_status: Status,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id: Uuid::new_v4(),
            org_id,
            number,
            kind,
            status: initial_status,
            title,
            priority: Priority::default(),
            submitter_id,
            assignee_id: None,
            approver_id: None,
            fields: BTreeMap::new(),
            milestones: Milestones::default(),
            links: EntityLinks::default(),
            distribution_policy: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a content field as a trimmed string, if present.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Format a public number from a sequence value: `ECR-0001`, zero-padded to
/// at least four digits.
pub fn format_number(kind: EntityKind, sequence: u64) -> String {
    format!("{}-{:04}", kind.number_prefix(), sequence)
}
