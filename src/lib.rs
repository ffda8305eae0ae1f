//! Change-record workflow core.
//!
//! The decision logic behind an engineering change-management system
//! (Request → Order → Notice): a status state machine gated by role- and
//! context-sensitive authorization, an append-only audit/diff trail, and a
//! deadline-driven distribution/escalation tracker. Storage, transport,
//! and delivery are seams — this crate owns the rules.
//!
//! # Architecture
//!
//! ```text
//! transport (not here) ──► WorkflowService ──► EntityStore (trait)
//!                                │
//!            ┌───────────────────┼──────────────────────┐
//!            │                   │                      │
//!            ▼                   ▼                      ▼
//!    PermissionEngine     TransitionRules         AuditTrail
//!   (who may act)        (which edges exist)    (what changed)
//!
//! read side: TraceabilityResolver, DistributionTracker + sweeper
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cm_workflow::{
//!     Actor, CreatePayload, EntityKind, InMemoryStore, Role, Status, WorkflowService,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let service = WorkflowService::new(store);
//!
//! let view = service.create(&actor, EntityKind::Request, payload).await?;
//! service
//!     .transition(&actor, EntityKind::Request, view.entity.entity_id, Status::Submitted, None)
//!     .await?;
//! ```

pub mod audit;
pub mod config;
pub mod definition;
pub mod distribution;
pub mod entity;
pub mod error;
pub mod fields;
pub mod notify;
pub mod permissions;
pub mod ratelimit;
pub mod service;
pub mod store;
pub mod sweep;
pub mod traceability;
pub mod transitions;

pub use audit::{AuditTrail, Diff, Revision};
pub use config::{CoreConfig, RateLimitConfig, RetryPolicy};
pub use definition::{
    CapabilityMatrix, CapabilityRule, EditableSets, Guard, KindDefinition, TransitionSpec,
    WorkflowDefinitions,
};
pub use distribution::{
    AckOutcome, DeadlineBucket, DerivedStatus, DistributionPolicy, DistributionProgress,
    DistributionTracker, EscalationAction, EscalationEvent, NewRecipient, Recipient,
    RecipientKind, RecipientStatus,
};
pub use entity::{
    format_number, Actor, ChangeEntity, EntityKind, EntityLinks, Milestones, Priority, Role,
    Status,
};
pub use error::{StoreError, WorkflowError};
pub use fields::{FieldFilter, FilterOutcome};
pub use notify::{LoggingNotifier, NoticeMessage, Notifier, NotifyError};
pub use permissions::{Action, PermissionEngine};
pub use ratelimit::{CounterStore, InMemoryCounterStore, RateLimiter};
pub use service::{CreatePayload, EntityView, UpdateOutcome, WorkflowService};
pub use store::{with_retries, EntityStore, InMemoryStore, RetryingStore};
pub use sweep::{DistributionSweeper, SweepStats};
pub use traceability::{TimelineEvent, TimelineEventType, TraceChain, TraceabilityResolver};
pub use transitions::{GuardContext, MilestonePatch, TransitionRules, Violation};
