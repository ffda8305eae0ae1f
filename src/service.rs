//! Workflow Service
//!
//! The orchestrator: the only component that talks to the entity store.
//! Each operation loads the record (organization-scoped), evaluates
//! permissions, validates the requested change, and persists the record
//! plus its revision with an optimistic version check.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditTrail, Revision};
use crate::distribution::{DistributionTracker, NewRecipient, Recipient};
use crate::entity::{format_number, Actor, ChangeEntity, EntityKind, Priority, Status};
use crate::error::{StoreError, WorkflowError};
use crate::fields::FieldFilter;
use crate::notify::{NoticeMessage, Notifier};
use crate::permissions::{Action, PermissionEngine};
use crate::ratelimit::RateLimiter;
use crate::store::EntityStore;
use crate::transitions::{GuardContext, TransitionRules, Violation};

/// An entity plus the caller's computed action summary.
#[derive(Debug, Clone, Serialize)]
pub struct EntityView {
    pub entity: ChangeEntity,
    pub allowed_actions: Vec<&'static str>,
}

/// Payload for creating a change record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePayload {
    pub title: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Uuid>,
}

/// Result of a content update. A request whose every field was filtered
/// away, or whose diff came up empty, is a no-op — not an error.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub view: EntityView,
    pub revision: Option<Revision>,
}

impl UpdateOutcome {
    pub fn is_no_op(&self) -> bool {
        self.revision.is_none()
    }
}

/// Orchestrates transitions, updates, and lineage operations.
pub struct WorkflowService {
    store: Arc<dyn EntityStore>,
    rules: TransitionRules,
    permissions: PermissionEngine,
    tracker: DistributionTracker,
    limiter: Option<RateLimiter>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl WorkflowService {
    /// Service with the standard rule set and capability matrix.
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            tracker: DistributionTracker::new(store.clone()),
            store,
            rules: TransitionRules::standard(),
            permissions: PermissionEngine::standard(),
            limiter: None,
            notifier: None,
        }
    }

    pub fn with_rules(mut self, rules: TransitionRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_permissions(mut self, permissions: PermissionEngine) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Recipient-facing operations (open, acknowledge, remind, escalate).
    pub fn tracker(&self) -> &DistributionTracker {
        &self.tracker
    }

    /// Create a record in its kind's initial status, assigning the next
    /// public number from the per-organization sequence.
    pub async fn create(
        &self,
        actor: &Actor,
        kind: EntityKind,
        payload: CreatePayload,
    ) -> Result<EntityView, WorkflowError> {
        self.check_rate(actor).await?;

        if payload.title.trim().is_empty() {
            return Err(WorkflowError::Validation(vec![
                "title is required".to_string(),
            ]));
        }

        let sequence = self.store.next_number(actor.org_id, kind).await?;
        let number = format_number(kind, sequence);

        let mut entity = ChangeEntity::new(
            kind,
            actor.org_id,
            number,
            actor.user_id,
            payload.title.trim().to_string(),
            self.rules.initial_status(kind),
        );
        entity.priority = payload.priority;
        entity.assignee_id = payload.assignee_id;

        // Content fields pass through the same filter as updates.
        let outcome = FieldFilter::filter(
            Action::READ | Action::UPDATE,
            kind,
            entity.status,
            payload.fields,
        );
        entity.fields = outcome.allowed;

        self.store.insert(&entity).await?;
        info!(number = %entity.number, kind = %kind, actor = %actor.user_id, "created change record");

        Ok(self.view(actor, entity))
    }

    /// Fetch a record. Same-organization callers always hold READ.
    pub async fn get(
        &self,
        actor: &Actor,
        kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<EntityView, WorkflowError> {
        let entity = self.load_scoped(actor, kind, entity_id).await?;
        Ok(self.view(actor, entity))
    }

    /// Revision history of a record, oldest first.
    pub async fn history(
        &self,
        actor: &Actor,
        kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<Vec<Revision>, WorkflowError> {
        let entity = self.load_scoped(actor, kind, entity_id).await?;
        Ok(self.store.revisions_for(entity.entity_id).await?)
    }

    /// Update content fields. Unauthorized fields are dropped; an update
    /// whose surviving fields change nothing writes no history.
    pub async fn update(
        &self,
        actor: &Actor,
        kind: EntityKind,
        entity_id: Uuid,
        fields: BTreeMap<String, serde_json::Value>,
        note: Option<String>,
    ) -> Result<UpdateOutcome, WorkflowError> {
        self.check_rate(actor).await?;
        let mut entity = self.load_scoped(actor, kind, entity_id).await?;

        let actions = self.permissions.allowed_actions(actor, &entity);
        let outcome = FieldFilter::filter(actions, kind, entity.status, fields);
        if !outcome.dropped.is_empty() {
            warn!(
                number = %entity.number,
                dropped = ?outcome.dropped,
                actor = %actor.user_id,
                "dropped unauthorized fields from update"
            );
        }

        let diff = AuditTrail::diff(&entity.fields, &outcome.allowed);
        if diff.is_empty() {
            return Ok(UpdateOutcome {
                view: self.view(actor, entity),
                revision: None,
            });
        }

        let now = Utc::now();
        for (name, value) in &outcome.allowed {
            entity.fields.insert(name.clone(), value.clone());
        }
        entity.updated_at = now;
        entity.version += 1;

        let Some(revision) = Revision::from_diff(entity.entity_id, actor.user_id, diff, note, now)
        else {
            return Ok(UpdateOutcome {
                view: self.view(actor, entity),
                revision: None,
            });
        };

        self.persist(&entity, kind).await?;
        self.store.append_revision(&revision).await?;

        Ok(UpdateOutcome {
            view: self.view(actor, entity),
            revision: Some(revision),
        })
    }

    /// Change a record's status.
    ///
    /// Permission TRANSITION gates the attempt; the transition rules
    /// validate shape, role gate, and guards, collecting every violated
    /// clause; approval targets additionally re-check the APPROVE/REJECT
    /// capability.
    pub async fn transition(
        &self,
        actor: &Actor,
        kind: EntityKind,
        entity_id: Uuid,
        target: Status,
        reason: Option<String>,
    ) -> Result<EntityView, WorkflowError> {
        self.check_rate(actor).await?;
        let mut entity = self.load_scoped(actor, kind, entity_id).await?;

        self.permissions
            .require(actor, &entity, Action::TRANSITION)?;

        let ctx = self.guard_context(&entity).await?;
        let approval_capability = if self.rules.is_approval_edge(target) {
            Some(if target == Status::Approved {
                Action::APPROVE
            } else {
                Action::REJECT
            })
        } else {
            None
        };

        // Shape first: a target with no edge at all is a business-rule
        // failure regardless of who asks. On a real approval edge the
        // APPROVE/REJECT capability is rechecked before role-gate details
        // are reported.
        match self.rules.validate(&entity, target, actor.role, &ctx) {
            Err(violations) => {
                let edge_missing = violations
                    .iter()
                    .any(|v| matches!(v, Violation::EdgeNotAllowed { .. }));
                if !edge_missing {
                    if let Some(capability) = approval_capability {
                        self.permissions.require(actor, &entity, capability)?;
                    }
                }
                return Err(WorkflowError::BusinessRule {
                    allowed: self.rules.allowed_next(kind, entity.status),
                    violations,
                });
            }
            Ok(()) => {
                if let Some(capability) = approval_capability {
                    self.permissions.require(actor, &entity, capability)?;
                }
            }
        }

        let now = Utc::now();
        let from = entity.status;
        let patch = self.rules.milestone_patch(target, actor.user_id, now);
        entity.status = target;
        patch.apply(&mut entity);
        entity.updated_at = now;
        entity.version += 1;

        self.persist(&entity, kind).await?;

        // The status change itself is audited like any content change.
        let previous = BTreeMap::from([("status".to_string(), serde_json::json!(from.as_str()))]);
        let proposed = BTreeMap::from([("status".to_string(), serde_json::json!(target.as_str()))]);
        let note =
            reason.or_else(|| Some(format!("Status changed from {} to {}", from, target)));
        if let Some(revision) = Revision::from_diff(
            entity.entity_id,
            actor.user_id,
            AuditTrail::diff(&previous, &proposed),
            note,
            now,
        ) {
            self.store.append_revision(&revision).await?;
        }

        info!(
            number = %entity.number,
            from = %from,
            to = %target,
            actor = %actor.user_id,
            "status transition"
        );

        if kind == EntityKind::Notice && target == Status::Distributed {
            let recipients = self.tracker.mark_sent(entity.entity_id, now).await?;
            self.notify_recipients(&entity, &recipients).await;
        }

        Ok(self.view(actor, entity))
    }

    /// Bundle a Request into an Order. A Request belongs to at most one
    /// Order.
    pub async fn bundle_request(
        &self,
        actor: &Actor,
        order_id: Uuid,
        request_id: Uuid,
    ) -> Result<EntityView, WorkflowError> {
        self.check_rate(actor).await?;
        let mut order = self.load_scoped(actor, EntityKind::Order, order_id).await?;
        let mut request = self
            .load_scoped(actor, EntityKind::Request, request_id)
            .await?;
        self.permissions.require(actor, &order, Action::UPDATE)?;

        match request.links.order_id {
            Some(existing) if existing == order_id => {
                return Err(WorkflowError::Conflict {
                    reason: format!("{} is already bundled into this order", request.number),
                });
            }
            Some(_) => {
                return Err(WorkflowError::Conflict {
                    reason: format!("{} is already bundled into another order", request.number),
                });
            }
            None => {}
        }

        let now = Utc::now();
        request.links.order_id = Some(order_id);
        request.updated_at = now;
        request.version += 1;
        self.persist(&request, EntityKind::Request).await?;

        order.links.request_ids.push(request_id);
        order.updated_at = now;
        order.version += 1;
        self.persist(&order, EntityKind::Order).await?;

        info!(order = %order.number, request = %request.number, "bundled request into order");
        Ok(self.view(actor, order))
    }

    /// Create the Order's Notice. An Order carries at most one Notice, and
    /// the Notice traces back to exactly this Order.
    pub async fn attach_notice(
        &self,
        actor: &Actor,
        order_id: Uuid,
        payload: CreatePayload,
    ) -> Result<EntityView, WorkflowError> {
        self.check_rate(actor).await?;
        let mut order = self.load_scoped(actor, EntityKind::Order, order_id).await?;
        self.permissions.require(actor, &order, Action::UPDATE)?;

        if order.links.notice_id.is_some() {
            return Err(WorkflowError::Conflict {
                reason: format!("{} already has a notice", order.number),
            });
        }

        let mut notice = self.create(actor, EntityKind::Notice, payload).await?.entity;
        notice.links.order_id = Some(order_id);
        notice.version += 1;
        self.persist(&notice, EntityKind::Notice).await?;

        order.links.notice_id = Some(notice.entity_id);
        order.updated_at = Utc::now();
        order.version += 1;
        self.persist(&order, EntityKind::Order).await?;

        info!(order = %order.number, notice = %notice.number, "attached notice to order");
        Ok(self.view(actor, notice))
    }

    /// Add a recipient to a Notice.
    pub async fn add_recipient(
        &self,
        actor: &Actor,
        notice_id: Uuid,
        new: NewRecipient,
    ) -> Result<Recipient, WorkflowError> {
        self.check_rate(actor).await?;
        let notice = self
            .load_scoped(actor, EntityKind::Notice, notice_id)
            .await?;
        self.permissions.require(actor, &notice, Action::UPDATE)?;
        self.tracker.add_recipient(notice_id, new).await
    }

    /// Enable the automatic reminder/escalation policy on a Notice.
    pub async fn set_distribution_policy(
        &self,
        actor: &Actor,
        notice_id: Uuid,
        policy: crate::distribution::DistributionPolicy,
    ) -> Result<EntityView, WorkflowError> {
        self.check_rate(actor).await?;
        let mut notice = self
            .load_scoped(actor, EntityKind::Notice, notice_id)
            .await?;
        self.permissions.require(actor, &notice, Action::UPDATE)?;

        notice.distribution_policy = Some(policy);
        notice.updated_at = Utc::now();
        notice.version += 1;
        self.persist(&notice, EntityKind::Notice).await?;
        Ok(self.view(actor, notice))
    }

    // ── internals ──────────────────────────────────────────────────────

    /// The single organization-scoped lookup path. Storage applies the
    /// organization filter, so a foreign record is simply absent — the
    /// permission layer never sees it.
    async fn load_scoped(
        &self,
        actor: &Actor,
        kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<ChangeEntity, WorkflowError> {
        self.store
            .get(kind, entity_id, actor.org_id)
            .await?
            .ok_or(WorkflowError::NotFound { kind })
    }

    async fn check_rate(&self, actor: &Actor) -> Result<(), WorkflowError> {
        if let Some(limiter) = &self.limiter {
            limiter.check(actor.user_id).await?;
        }
        Ok(())
    }

    fn view(&self, actor: &Actor, entity: ChangeEntity) -> EntityView {
        let allowed_actions = self
            .permissions
            .allowed_actions(actor, &entity)
            .names();
        EntityView {
            entity,
            allowed_actions,
        }
    }

    async fn persist(&self, entity: &ChangeEntity, kind: EntityKind) -> Result<(), WorkflowError> {
        self.store
            .update(entity, entity.version - 1)
            .await
            .map_err(|e| match e {
                StoreError::VersionConflict { .. } => WorkflowError::Conflict {
                    reason: "the record was modified concurrently; reload and retry".to_string(),
                },
                StoreError::NotFound => WorkflowError::NotFound { kind },
                other => WorkflowError::Storage(other),
            })
    }

    /// Snapshot the linked data the transition guards need.
    async fn guard_context(&self, entity: &ChangeEntity) -> Result<GuardContext, WorkflowError> {
        let mut ctx = GuardContext::default();
        match entity.kind {
            EntityKind::Order => {
                for &request_id in &entity.links.request_ids {
                    if let Some(request) = self
                        .store
                        .get(EntityKind::Request, request_id, entity.org_id)
                        .await?
                    {
                        ctx.bundled_requests.push((request.number, request.status));
                    }
                }
            }
            EntityKind::Notice => {
                ctx.recipient_count = self.store.list_recipients(entity.entity_id).await?.len();
            }
            EntityKind::Request => {}
        }
        Ok(ctx)
    }

    /// Fire-and-forget delivery; failures are logged and never fail the
    /// transition.
    async fn notify_recipients(&self, notice: &ChangeEntity, recipients: &[Recipient]) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let message = NoticeMessage {
            subject: format!("{}: {}", notice.number, notice.title),
            body: notice
                .field_str("description")
                .unwrap_or(&notice.title)
                .to_string(),
        };
        for recipient in recipients {
            if let Err(e) = notifier.send(recipient, &message).await {
                warn!(recipient = %recipient.name, error = %e, "notice delivery failed");
            }
        }
    }
}
