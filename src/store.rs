//! Entity Store Abstraction
//!
//! Abstract interface for durable change-record storage. The in-memory
//! implementation is the reference (and test) backend; production adapters
//! target a database and must preserve the same semantics: organization
//! scoping on every lookup, optimistic version checks on writes, atomic
//! per-organization-per-kind sequences, and append-only revision and
//! escalation logs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::Revision;
use crate::config::RetryPolicy;
use crate::distribution::{EscalationEvent, Recipient};
use crate::entity::{ChangeEntity, EntityKind, Status};
use crate::error::StoreError;

/// Abstract storage for change records and their children.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch a record, scoped by organization. A record from another
    /// organization is absent, not forbidden.
    async fn get(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<ChangeEntity>, StoreError>;

    /// Look up a record by public number within an organization.
    async fn find_by_number(
        &self,
        kind: EntityKind,
        org_id: Uuid,
        number: &str,
    ) -> Result<Option<ChangeEntity>, StoreError>;

    async fn insert(&self, entity: &ChangeEntity) -> Result<(), StoreError>;

    /// Write an updated record. `expected_version` is the version the
    /// caller loaded; a mismatch fails with `VersionConflict` and writes
    /// nothing.
    async fn update(&self, entity: &ChangeEntity, expected_version: u64)
        -> Result<(), StoreError>;

    /// Atomic per-organization-per-kind sequence for public numbers.
    async fn next_number(&self, org_id: Uuid, kind: EntityKind) -> Result<u64, StoreError>;

    async fn append_revision(&self, revision: &Revision) -> Result<(), StoreError>;

    async fn revisions_for(&self, entity_id: Uuid) -> Result<Vec<Revision>, StoreError>;

    async fn get_recipient(&self, recipient_id: Uuid) -> Result<Option<Recipient>, StoreError>;

    async fn list_recipients(&self, notice_id: Uuid) -> Result<Vec<Recipient>, StoreError>;

    async fn upsert_recipient(&self, recipient: &Recipient) -> Result<(), StoreError>;

    async fn append_escalation_event(&self, event: &EscalationEvent) -> Result<(), StoreError>;

    async fn escalation_events_for(
        &self,
        notice_id: Uuid,
    ) -> Result<Vec<EscalationEvent>, StoreError>;

    /// Distributed Notices carrying an automatic reminder/escalation
    /// policy — the background sweep's work list.
    async fn list_distributed_notices(&self) -> Result<Vec<ChangeEntity>, StoreError>;
}

#[derive(Default)]
struct StoreInner {
    entities: HashMap<Uuid, ChangeEntity>,
    revisions: Vec<Revision>,
    recipients: HashMap<Uuid, Recipient>,
    escalation_events: Vec<EscalationEvent>,
    sequences: HashMap<(Uuid, EntityKind), u64>,
}

/// In-memory reference implementation.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn get(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<ChangeEntity>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .entities
            .get(&entity_id)
            .filter(|e| e.kind == kind && e.org_id == org_id)
            .cloned())
    }

    async fn find_by_number(
        &self,
        kind: EntityKind,
        org_id: Uuid,
        number: &str,
    ) -> Result<Option<ChangeEntity>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .entities
            .values()
            .find(|e| e.kind == kind && e.org_id == org_id && e.number == number)
            .cloned())
    }

    async fn insert(&self, entity: &ChangeEntity) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.entities.insert(entity.entity_id, entity.clone());
        Ok(())
    }

    async fn update(
        &self,
        entity: &ChangeEntity,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .entities
            .get_mut(&entity.entity_id)
            .ok_or(StoreError::NotFound)?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                found: stored.version,
            });
        }
        *stored = entity.clone();
        Ok(())
    }

    async fn next_number(&self, org_id: Uuid, kind: EntityKind) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let counter = inner.sequences.entry((org_id, kind)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn append_revision(&self, revision: &Revision) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.revisions.push(revision.clone());
        Ok(())
    }

    async fn revisions_for(&self, entity_id: Uuid) -> Result<Vec<Revision>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .revisions
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn get_recipient(&self, recipient_id: Uuid) -> Result<Option<Recipient>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.recipients.get(&recipient_id).cloned())
    }

    async fn list_recipients(&self, notice_id: Uuid) -> Result<Vec<Recipient>, StoreError> {
        let inner = self.inner.read().await;
        let mut recipients: Vec<_> = inner
            .recipients
            .values()
            .filter(|r| r.notice_id == notice_id)
            .cloned()
            .collect();
        recipients.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(recipients)
    }

    async fn upsert_recipient(&self, recipient: &Recipient) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .recipients
            .insert(recipient.recipient_id, recipient.clone());
        Ok(())
    }

    async fn append_escalation_event(&self, event: &EscalationEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.escalation_events.push(event.clone());
        Ok(())
    }

    async fn escalation_events_for(
        &self,
        notice_id: Uuid,
    ) -> Result<Vec<EscalationEvent>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .escalation_events
            .iter()
            .filter(|e| e.notice_id == notice_id)
            .cloned()
            .collect())
    }

    async fn list_distributed_notices(&self) -> Result<Vec<ChangeEntity>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .entities
            .values()
            .filter(|e| {
                e.kind == EntityKind::Notice
                    && e.status == Status::Distributed
                    && e.distribution_policy.is_some()
            })
            .cloned()
            .collect())
    }
}

/// Retry transient failures with bounded exponential backoff. Domain
/// errors (not-found, version conflicts) pass through untouched and are
/// never retried.
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: EntityStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

async fn with_retry<T, Fut>(
    policy: &RetryPolicy,
    mut op: impl FnMut() -> Fut,
) -> Result<T, StoreError>
where
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.base_delay_ms.saturating_mul(1 << (attempt - 1));
                tracing::warn!(attempt, delay_ms = delay, error = %e, "transient storage error, retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            other => return other,
        }
    }
}

#[async_trait]
impl<S: EntityStore> EntityStore for RetryingStore<S> {
    async fn get(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<ChangeEntity>, StoreError> {
        with_retry(&self.policy, || self.inner.get(kind, entity_id, org_id)).await
    }

    async fn find_by_number(
        &self,
        kind: EntityKind,
        org_id: Uuid,
        number: &str,
    ) -> Result<Option<ChangeEntity>, StoreError> {
        with_retry(&self.policy, || self.inner.find_by_number(kind, org_id, number)).await
    }

    async fn insert(&self, entity: &ChangeEntity) -> Result<(), StoreError> {
        with_retry(&self.policy, || self.inner.insert(entity)).await
    }

    async fn update(
        &self,
        entity: &ChangeEntity,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        with_retry(&self.policy, || self.inner.update(entity, expected_version)).await
    }

    async fn next_number(&self, org_id: Uuid, kind: EntityKind) -> Result<u64, StoreError> {
        with_retry(&self.policy, || self.inner.next_number(org_id, kind)).await
    }

    async fn append_revision(&self, revision: &Revision) -> Result<(), StoreError> {
        with_retry(&self.policy, || self.inner.append_revision(revision)).await
    }

    async fn revisions_for(&self, entity_id: Uuid) -> Result<Vec<Revision>, StoreError> {
        with_retry(&self.policy, || self.inner.revisions_for(entity_id)).await
    }

    async fn get_recipient(&self, recipient_id: Uuid) -> Result<Option<Recipient>, StoreError> {
        with_retry(&self.policy, || self.inner.get_recipient(recipient_id)).await
    }

    async fn list_recipients(&self, notice_id: Uuid) -> Result<Vec<Recipient>, StoreError> {
        with_retry(&self.policy, || self.inner.list_recipients(notice_id)).await
    }

    async fn upsert_recipient(&self, recipient: &Recipient) -> Result<(), StoreError> {
        with_retry(&self.policy, || self.inner.upsert_recipient(recipient)).await
    }

    async fn append_escalation_event(&self, event: &EscalationEvent) -> Result<(), StoreError> {
        with_retry(&self.policy, || self.inner.append_escalation_event(event)).await
    }

    async fn escalation_events_for(
        &self,
        notice_id: Uuid,
    ) -> Result<Vec<EscalationEvent>, StoreError> {
        with_retry(&self.policy, || self.inner.escalation_events_for(notice_id)).await
    }

    async fn list_distributed_notices(&self) -> Result<Vec<ChangeEntity>, StoreError> {
        with_retry(&self.policy, || self.inner.list_distributed_notices()).await
    }
}

/// Convenience: wrap a store in the retry adapter and erase the type.
pub fn with_retries<S: EntityStore + 'static>(
    store: S,
    policy: RetryPolicy,
) -> Arc<dyn EntityStore> {
    Arc::new(RetryingStore::new(store, policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::format_number;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn entity(kind: EntityKind, org: Uuid) -> ChangeEntity {
        ChangeEntity::new(
            kind,
            org,
            "ECR-0001".to_string(),
            Uuid::new_v4(),
            "Test".to_string(),
            Status::Draft,
        )
    }

    #[tokio::test]
    async fn test_get_is_org_scoped() {
        let store = InMemoryStore::new();
        let org_a = Uuid::new_v4();
        let e = entity(EntityKind::Request, org_a);
        store.insert(&e).await.unwrap();

        let found = store
            .get(EntityKind::Request, e.entity_id, org_a)
            .await
            .unwrap();
        assert!(found.is_some());

        let foreign = store
            .get(EntityKind::Request, e.entity_id, Uuid::new_v4())
            .await
            .unwrap();
        assert!(foreign.is_none());
    }

    #[tokio::test]
    async fn test_update_detects_version_conflict() {
        let store = InMemoryStore::new();
        let org = Uuid::new_v4();
        let mut e = entity(EntityKind::Order, org);
        store.insert(&e).await.unwrap();

        e.version = 1;
        store.update(&e, 0).await.unwrap();

        // A writer that loaded version 0 loses the race.
        let mut stale = e.clone();
        stale.version = 1;
        match store.update(&stale, 0).await {
            Err(StoreError::VersionConflict { expected: 0, found: 1 }) => {}
            other => panic!("expected VersionConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sequences_are_per_org_per_kind() {
        let store = InMemoryStore::new();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();

        assert_eq!(store.next_number(org_a, EntityKind::Request).await.unwrap(), 1);
        assert_eq!(store.next_number(org_a, EntityKind::Request).await.unwrap(), 2);
        assert_eq!(store.next_number(org_a, EntityKind::Order).await.unwrap(), 1);
        assert_eq!(store.next_number(org_b, EntityKind::Request).await.unwrap(), 1);

        assert_eq!(format_number(EntityKind::Request, 2), "ECR-0002");
    }

    /// Fails with a transient error a fixed number of times, then delegates.
    struct FlakyStore {
        inner: InMemoryStore,
        failures_left: AtomicU32,
    }

    impl FlakyStore {
        fn failing(failures: u32) -> Self {
            Self {
                inner: InMemoryStore::new(),
                failures_left: AtomicU32::new(failures),
            }
        }

        fn trip(&self) -> Result<(), StoreError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(StoreError::Transient("connection reset".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl EntityStore for FlakyStore {
        async fn get(
            &self,
            kind: EntityKind,
            entity_id: Uuid,
            org_id: Uuid,
        ) -> Result<Option<ChangeEntity>, StoreError> {
            self.trip()?;
            self.inner.get(kind, entity_id, org_id).await
        }

        async fn find_by_number(
            &self,
            kind: EntityKind,
            org_id: Uuid,
            number: &str,
        ) -> Result<Option<ChangeEntity>, StoreError> {
            self.inner.find_by_number(kind, org_id, number).await
        }

        async fn insert(&self, entity: &ChangeEntity) -> Result<(), StoreError> {
            self.inner.insert(entity).await
        }

        async fn update(
            &self,
            entity: &ChangeEntity,
            expected_version: u64,
        ) -> Result<(), StoreError> {
            self.inner.update(entity, expected_version).await
        }

        async fn next_number(&self, org_id: Uuid, kind: EntityKind) -> Result<u64, StoreError> {
            self.inner.next_number(org_id, kind).await
        }

        async fn append_revision(&self, revision: &Revision) -> Result<(), StoreError> {
            self.inner.append_revision(revision).await
        }

        async fn revisions_for(&self, entity_id: Uuid) -> Result<Vec<Revision>, StoreError> {
            self.inner.revisions_for(entity_id).await
        }

        async fn get_recipient(
            &self,
            recipient_id: Uuid,
        ) -> Result<Option<Recipient>, StoreError> {
            self.inner.get_recipient(recipient_id).await
        }

        async fn list_recipients(&self, notice_id: Uuid) -> Result<Vec<Recipient>, StoreError> {
            self.inner.list_recipients(notice_id).await
        }

        async fn upsert_recipient(&self, recipient: &Recipient) -> Result<(), StoreError> {
            self.inner.upsert_recipient(recipient).await
        }

        async fn append_escalation_event(
            &self,
            event: &EscalationEvent,
        ) -> Result<(), StoreError> {
            self.inner.append_escalation_event(event).await
        }

        async fn escalation_events_for(
            &self,
            notice_id: Uuid,
        ) -> Result<Vec<EscalationEvent>, StoreError> {
            self.inner.escalation_events_for(notice_id).await
        }

        async fn list_distributed_notices(&self) -> Result<Vec<ChangeEntity>, StoreError> {
            self.inner.list_distributed_notices().await
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1,
        };
        let flaky = FlakyStore::failing(2);
        let org = Uuid::new_v4();
        let e = entity(EntityKind::Request, org);
        flaky.insert(&e).await.unwrap();

        let store = RetryingStore::new(flaky, policy);
        let found = store
            .get(EntityKind::Request, e.entity_id, org)
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1,
        };
        let flaky = FlakyStore::failing(10);
        let store = RetryingStore::new(flaky, policy);

        let err = store
            .get(EntityKind::Request, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_domain_errors_are_not_retried() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1,
        };
        let store = RetryingStore::new(InMemoryStore::new(), policy);
        let e = entity(EntityKind::Request, Uuid::new_v4());

        // Updating a missing row is a domain error, surfaced immediately.
        match store.update(&e, 0).await {
            Err(StoreError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
