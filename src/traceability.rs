//! Traceability Resolver
//!
//! Given any record's public number, walks the Request→Order→Notice
//! lineage and produces the full chain plus a merged, time-ordered event
//! timeline. Pure read-side recompute over canonical stored state — safe
//! to run on every read, no locks against writers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::entity::{ChangeEntity, EntityKind};
use crate::error::WorkflowError;
use crate::store::EntityStore;

/// Milestone event types emitted into the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineEventType {
    Created,
    Submitted,
    Approved,
    Rejected,
    Completed,
    Distributed,
    Effective,
    Cancelled,
}

impl TimelineEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Submitted => "SUBMITTED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Completed => "COMPLETED",
            Self::Distributed => "DISTRIBUTED",
            Self::Effective => "EFFECTIVE",
            Self::Cancelled => "CANCELLED",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Distributed => "distributed",
            Self::Effective => "effective",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One milestone of one record in the merged timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event_type: TimelineEventType,
    pub date: DateTime<Utc>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<Uuid>,
    pub status_label: String,
    /// Public number of the record the event belongs to.
    pub record_ref: String,
}

/// The resolved lineage around an anchor record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceChain {
    /// Kind of the record the number matched.
    pub anchor_kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<ChangeEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<ChangeEntity>,
    pub requests: Vec<ChangeEntity>,
    pub timeline: Vec<TimelineEvent>,
}

/// Resolves public numbers to lineage chains.
pub struct TraceabilityResolver {
    store: Arc<dyn EntityStore>,
}

impl TraceabilityResolver {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Resolve any record number. Lookup order is Notice, then Order, then
    /// Request; the first hit wins.
    pub async fn resolve(&self, org_id: Uuid, number: &str) -> Result<TraceChain, WorkflowError> {
        for kind in [EntityKind::Notice, EntityKind::Order, EntityKind::Request] {
            if let Some(anchor) = self.store.find_by_number(kind, org_id, number).await? {
                return self.expand(anchor).await;
            }
        }
        Err(WorkflowError::NotFound {
            kind: kind_from_prefix(number).unwrap_or(EntityKind::Request),
        })
    }

    /// Expand an anchor to the full {notice, order, requests} chain.
    async fn expand(&self, anchor: ChangeEntity) -> Result<TraceChain, WorkflowError> {
        let org_id = anchor.org_id;
        let anchor_kind = anchor.kind;

        // Find the Order at the center of the lineage, if any.
        let order = match anchor.kind {
            EntityKind::Order => Some(anchor.clone()),
            EntityKind::Request | EntityKind::Notice => match anchor.links.order_id {
                Some(order_id) => self.store.get(EntityKind::Order, order_id, org_id).await?,
                None => None,
            },
        };

        let notice = match anchor.kind {
            EntityKind::Notice => Some(anchor.clone()),
            _ => match order.as_ref().and_then(|o| o.links.notice_id) {
                Some(notice_id) => {
                    self.store
                        .get(EntityKind::Notice, notice_id, org_id)
                        .await?
                }
                None => None,
            },
        };

        let mut requests = Vec::new();
        if let Some(order) = &order {
            for &request_id in &order.links.request_ids {
                if let Some(request) = self
                    .store
                    .get(EntityKind::Request, request_id, org_id)
                    .await?
                {
                    requests.push(request);
                }
            }
        } else if anchor.kind == EntityKind::Request {
            // Unbundled request: the chain is just itself.
            requests.push(anchor);
        }

        let mut timeline = Vec::new();
        for entity in requests
            .iter()
            .chain(order.iter())
            .chain(notice.iter())
        {
            timeline.extend(events_for(entity));
        }
        timeline.sort_by(|a, b| a.date.cmp(&b.date));

        Ok(TraceChain {
            anchor_kind,
            notice,
            order,
            requests,
            timeline,
        })
    }
}

/// One event per non-null milestone of a record.
pub fn events_for(entity: &ChangeEntity) -> Vec<TimelineEvent> {
    let m = &entity.milestones;
    let milestones: [(TimelineEventType, Option<DateTime<Utc>>, Option<Uuid>); 8] = [
        (
            TimelineEventType::Created,
            Some(entity.created_at),
            Some(entity.submitter_id),
        ),
        (TimelineEventType::Submitted, m.submitted_at, None),
        (TimelineEventType::Approved, m.approved_at, entity.approver_id),
        (TimelineEventType::Rejected, m.rejected_at, entity.approver_id),
        (TimelineEventType::Completed, m.completed_at, None),
        (TimelineEventType::Distributed, m.distributed_at, None),
        (TimelineEventType::Effective, m.effective_at, None),
        (TimelineEventType::Cancelled, m.cancelled_at, None),
    ];

    milestones
        .into_iter()
        .filter_map(|(event_type, date, actor_id)| {
            date.map(|date| TimelineEvent {
                event_type,
                date,
                title: format!("{} {}", entity.number, event_type.label()),
                actor_id,
                status_label: event_type.as_str().to_string(),
                record_ref: entity.number.clone(),
            })
        })
        .collect()
}

fn kind_from_prefix(number: &str) -> Option<EntityKind> {
    let prefix = number.split('-').next()?;
    match prefix {
        "ECR" => Some(EntityKind::Request),
        "ECO" => Some(EntityKind::Order),
        "ECN" => Some(EntityKind::Notice),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Status;

    #[test]
    fn test_events_for_emits_one_per_milestone() {
        let mut entity = ChangeEntity::new(
            EntityKind::Request,
            Uuid::new_v4(),
            "ECR-0007".to_string(),
            Uuid::new_v4(),
            "Test".to_string(),
            Status::Draft,
        );
        let events = events_for(&entity);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, TimelineEventType::Created);
        assert_eq!(events[0].record_ref, "ECR-0007");
        assert_eq!(events[0].actor_id, Some(entity.submitter_id));

        entity.milestones.submitted_at = Some(Utc::now());
        entity.milestones.approved_at = Some(Utc::now());
        entity.approver_id = Some(Uuid::new_v4());

        let events = events_for(&entity);
        assert_eq!(events.len(), 3);
        let approved = events
            .iter()
            .find(|e| e.event_type == TimelineEventType::Approved)
            .unwrap();
        assert_eq!(approved.actor_id, entity.approver_id);
        assert_eq!(approved.title, "ECR-0007 approved");
    }

    #[test]
    fn test_kind_from_prefix() {
        assert_eq!(kind_from_prefix("ECN-0001"), Some(EntityKind::Notice));
        assert_eq!(kind_from_prefix("ECO-1"), Some(EntityKind::Order));
        assert_eq!(kind_from_prefix("ZZZ-1"), None);
    }
}
