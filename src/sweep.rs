//! Distribution Sweep
//!
//! Background loop that applies each Notice's automatic reminder and
//! escalation policy. Runs as a single serialized consumer — one sweeper
//! per deployment — so threshold crossings fire exactly once; the
//! per-recipient `reminders_sent == 0` / `!escalated` check-and-set keeps
//! repeated sweeps from duplicating actions.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::CoreConfig;
use crate::distribution::DistributionTracker;
use crate::error::WorkflowError;
use crate::store::EntityStore;

/// Actions taken by one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub notices_checked: usize,
    pub reminders: usize,
    pub escalations: usize,
}

/// The background sweeper.
pub struct DistributionSweeper {
    store: Arc<dyn EntityStore>,
    tracker: DistributionTracker,
    interval: std::time::Duration,
}

impl DistributionSweeper {
    pub fn new(store: Arc<dyn EntityStore>, config: &CoreConfig) -> Self {
        Self {
            tracker: DistributionTracker::new(store.clone()),
            store,
            interval: std::time::Duration::from_secs(config.sweep_interval_secs),
        }
    }

    /// Run until the shutdown signal flips. One pass per interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("distribution sweeper started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.sweep_once(Utc::now()).await {
                Ok(stats) if stats.reminders > 0 || stats.escalations > 0 => {
                    info!(
                        notices = stats.notices_checked,
                        reminders = stats.reminders,
                        escalations = stats.escalations,
                        "distribution sweep applied actions"
                    );
                }
                Ok(stats) => {
                    debug!(notices = stats.notices_checked, "distribution sweep idle");
                }
                Err(e) => {
                    error!(?e, "distribution sweep failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("distribution sweeper shutting down");
    }

    /// One pass over every distributed Notice with an automatic policy.
    ///
    /// Reminder: fires once, when the send age passes the reminder
    /// threshold and no reminder has gone out yet. Escalation: fires once,
    /// when the age passes the escalation threshold and the recipient is
    /// not yet escalated. Acknowledged recipients are left alone.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepStats, WorkflowError> {
        let mut stats = SweepStats::default();

        for notice in self.store.list_distributed_notices().await? {
            let Some(policy) = notice.distribution_policy else {
                continue;
            };
            stats.notices_checked += 1;

            for recipient in self.store.list_recipients(notice.entity_id).await? {
                if recipient.acknowledged_at.is_some() {
                    continue;
                }
                let Some(sent_at) = recipient.sent_at else {
                    continue;
                };
                let age = now - sent_at;

                if age > Duration::hours(policy.reminder_after_hours)
                    && recipient.reminders_sent == 0
                {
                    stats.reminders += self
                        .tracker
                        .send_reminder(&[recipient.recipient_id], "system", now)
                        .await?;
                }

                if age > Duration::hours(policy.escalate_after_hours) && !recipient.escalated {
                    stats.escalations += self
                        .tracker
                        .escalate(&[recipient.recipient_id], "system", now)
                        .await?;
                }
            }
        }

        Ok(stats)
    }
}
