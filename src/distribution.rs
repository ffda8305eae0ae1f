//! Distribution Tracker
//!
//! Manages Notice recipients: send/open/acknowledge bookkeeping, response
//! deadlines, reminders and escalation. Recipient status is a derived
//! projection over stored timestamps — it is computed at read time and
//! never persisted, so stored and derived truth cannot drift.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::entity::EntityKind;
use crate::error::WorkflowError;
use crate::store::EntityStore;

/// Internal or external party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    Internal,
    External,
}

/// Response deadline buckets; the concrete deadline is computed at send
/// time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineBucket {
    Hours24,
    Hours48,
    #[default]
    Days7,
    Days14,
}

impl DeadlineBucket {
    pub fn duration(&self) -> Duration {
        match self {
            Self::Hours24 => Duration::hours(24),
            Self::Hours48 => Duration::hours(48),
            Self::Days7 => Duration::days(7),
            Self::Days14 => Duration::days(14),
        }
    }
}

/// A party who must receive (and optionally acknowledge) a Notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub recipient_id: Uuid,
    pub notice_id: Uuid,
    pub name: String,
    pub address: String,
    pub kind: RecipientKind,
    pub acknowledge_required: bool,
    pub deadline_bucket: DeadlineBucket,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminders_sent: u32,
    #[serde(default)]
    pub escalated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
}

impl Recipient {
    /// Derived status at `now`. Never stored.
    pub fn derived_status(&self, now: DateTime<Utc>) -> RecipientStatus {
        let base = if self.acknowledged_at.is_some() {
            DerivedStatus::Acknowledged
        } else if self.opened_at.is_some() {
            DerivedStatus::Opened
        } else if self.sent_at.is_some() {
            DerivedStatus::Sent
        } else {
            DerivedStatus::Pending
        };

        let overdue = self.acknowledge_required
            && base != DerivedStatus::Acknowledged
            && self
                .response_deadline
                .map(|deadline| now > deadline)
                .unwrap_or(false);

        RecipientStatus { base, overdue }
    }
}

/// Base derived state, computed from timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DerivedStatus {
    /// Created but not yet sent.
    Pending,
    Sent,
    Opened,
    /// Terminal.
    Acknowledged,
}

impl DerivedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Opened => "OPENED",
            Self::Acknowledged => "ACKNOWLEDGED",
        }
    }
}

/// Derived state plus the OVERDUE display overlay, which can co-occur with
/// SENT or OPENED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientStatus {
    pub base: DerivedStatus,
    pub overdue: bool,
}

impl RecipientStatus {
    pub fn label(&self) -> String {
        if self.overdue {
            format!("{} (OVERDUE)", self.base.as_str())
        } else {
            self.base.as_str().to_string()
        }
    }
}

/// Administrative action recorded against a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationAction {
    Reminder,
    Escalation,
}

/// Append-only record of a reminder or escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub event_id: Uuid,
    pub recipient_id: Uuid,
    pub notice_id: Uuid,
    pub action: EscalationAction,
    /// User id, or `"system"` for the background sweep.
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Automatic reminder/escalation thresholds, enabled per Notice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistributionPolicy {
    pub reminder_after_hours: i64,
    pub escalate_after_hours: i64,
}

/// Outcome of an acknowledge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged,
    /// Re-submission after acknowledgment; not an error.
    AlreadyAcknowledged,
}

/// Acknowledgment progress over a Notice's recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionProgress {
    /// Recipients with acknowledge_required.
    pub required: usize,
    /// Of those, how many have acknowledged.
    pub acknowledged: usize,
    /// 0–100; 100 when nothing is required.
    pub percent: u32,
}

/// New-recipient payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecipient {
    pub name: String,
    pub address: String,
    pub kind: RecipientKind,
    #[serde(default)]
    pub acknowledge_required: bool,
    #[serde(default)]
    pub deadline_bucket: DeadlineBucket,
}

/// Recipient lifecycle operations over the entity store.
pub struct DistributionTracker {
    store: Arc<dyn EntityStore>,
}

impl DistributionTracker {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Add a recipient to a Notice (before or after distribution).
    pub async fn add_recipient(
        &self,
        notice_id: Uuid,
        new: NewRecipient,
    ) -> Result<Recipient, WorkflowError> {
        if new.name.trim().is_empty() || new.address.trim().is_empty() {
            return Err(WorkflowError::Validation(vec![
                "recipient name and address are required".to_string(),
            ]));
        }
        let recipient = Recipient {
            recipient_id: Uuid::new_v4(),
            notice_id,
            name: new.name,
            address: new.address,
            kind: new.kind,
            acknowledge_required: new.acknowledge_required,
            deadline_bucket: new.deadline_bucket,
            sent_at: None,
            opened_at: None,
            acknowledged_at: None,
            response_deadline: None,
            reminders_sent: 0,
            escalated: false,
            escalated_at: None,
        };
        self.store.upsert_recipient(&recipient).await?;
        Ok(recipient)
    }

    pub async fn list_recipients(&self, notice_id: Uuid) -> Result<Vec<Recipient>, WorkflowError> {
        Ok(self.store.list_recipients(notice_id).await?)
    }

    /// Stamp every unsent recipient of a Notice as sent and compute its
    /// response deadline from the deadline bucket. Idempotent per
    /// recipient.
    pub async fn mark_sent(
        &self,
        notice_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Recipient>, WorkflowError> {
        let mut sent = Vec::new();
        for mut recipient in self.store.list_recipients(notice_id).await? {
            if recipient.sent_at.is_none() {
                recipient.sent_at = Some(now);
                recipient.response_deadline = Some(now + recipient.deadline_bucket.duration());
                self.store.upsert_recipient(&recipient).await?;
            }
            sent.push(recipient);
        }
        Ok(sent)
    }

    /// First open wins; later opens are no-ops.
    pub async fn mark_opened(
        &self,
        recipient_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Recipient, WorkflowError> {
        let mut recipient = self.load(recipient_id).await?;
        if recipient.opened_at.is_none() {
            recipient.opened_at = Some(now);
            self.store.upsert_recipient(&recipient).await?;
        }
        Ok(recipient)
    }

    /// Record an acknowledgment. Accepted best-effort even when the
    /// recipient was not required to acknowledge. Idempotent: a second
    /// call leaves `acknowledged_at` untouched and signals
    /// `AlreadyAcknowledged`.
    pub async fn acknowledge(
        &self,
        recipient_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(AckOutcome, Recipient), WorkflowError> {
        let mut recipient = self.load(recipient_id).await?;
        if recipient.acknowledged_at.is_some() {
            return Ok((AckOutcome::AlreadyAcknowledged, recipient));
        }
        recipient.acknowledged_at = Some(now);
        if recipient.opened_at.is_none() {
            // Acknowledging implies the notice was seen.
            recipient.opened_at = Some(now);
        }
        self.store.upsert_recipient(&recipient).await?;
        Ok((AckOutcome::Acknowledged, recipient))
    }

    /// Send a reminder to each recipient. Monotonic: counters only grow;
    /// already-acknowledged recipients are skipped. Returns the number of
    /// reminders actually sent.
    pub async fn send_reminder(
        &self,
        recipient_ids: &[Uuid],
        performed_by: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, WorkflowError> {
        let mut count = 0;
        for &recipient_id in recipient_ids {
            let mut recipient = self.load(recipient_id).await?;
            if recipient.acknowledged_at.is_some() {
                continue;
            }
            recipient.reminders_sent += 1;
            self.store.upsert_recipient(&recipient).await?;
            self.append_event(&recipient, EscalationAction::Reminder, performed_by, now)
                .await?;
            count += 1;
        }
        Ok(count)
    }

    /// Escalate each recipient. Safe to call repeatedly; the escalation
    /// timestamp is set on the first call only, but every call appends an
    /// event. Acknowledged recipients are skipped.
    pub async fn escalate(
        &self,
        recipient_ids: &[Uuid],
        performed_by: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, WorkflowError> {
        let mut count = 0;
        for &recipient_id in recipient_ids {
            let mut recipient = self.load(recipient_id).await?;
            if recipient.acknowledged_at.is_some() {
                continue;
            }
            if !recipient.escalated {
                recipient.escalated = true;
                recipient.escalated_at = Some(now);
            }
            self.store.upsert_recipient(&recipient).await?;
            self.append_event(&recipient, EscalationAction::Escalation, performed_by, now)
                .await?;
            count += 1;
        }
        Ok(count)
    }

    /// Acknowledgment progress over acknowledge-required recipients.
    pub async fn progress(&self, notice_id: Uuid) -> Result<DistributionProgress, WorkflowError> {
        let recipients = self.store.list_recipients(notice_id).await?;
        let required: Vec<_> = recipients
            .iter()
            .filter(|r| r.acknowledge_required)
            .collect();
        let acknowledged = required
            .iter()
            .filter(|r| r.acknowledged_at.is_some())
            .count();

        let percent = if required.is_empty() {
            100
        } else {
            (acknowledged * 100 / required.len()) as u32
        };

        Ok(DistributionProgress {
            required: required.len(),
            acknowledged,
            percent,
        })
    }

    async fn load(&self, recipient_id: Uuid) -> Result<Recipient, WorkflowError> {
        self.store
            .get_recipient(recipient_id)
            .await?
            .ok_or(WorkflowError::NotFound {
                kind: EntityKind::Notice,
            })
    }

    async fn append_event(
        &self,
        recipient: &Recipient,
        action: EscalationAction,
        performed_by: &str,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let event = EscalationEvent {
            event_id: Uuid::new_v4(),
            recipient_id: recipient.recipient_id,
            notice_id: recipient.notice_id,
            action,
            performed_by: performed_by.to_string(),
            performed_at: now,
            notes: None,
        };
        tracing::info!(
            recipient = %recipient.name,
            notice_id = %recipient.notice_id,
            action = ?action,
            performed_by,
            "distribution escalation event"
        );
        self.store.append_escalation_event(&event).await?;
        Ok(())
    }
}
