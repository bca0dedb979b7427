use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::orders::confirm_payment;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduledJob {
    /// Stands in for the payment gateway's asynchronous UPI callback.
    ConfirmPayment { order_id: Uuid },
}

impl ScheduledJob {
    pub fn order_id(&self) -> Uuid {
        match self {
            ScheduledJob::ConfirmPayment { order_id } => *order_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub due_at: DateTime<Utc>,
    pub job: ScheduledJob,
}

/// Due-time task table. Tasks live in the store, not in a sleeping future, so they are
/// independent of the request that created them.
#[derive(Default)]
pub struct Scheduler {
    tasks: DashMap<Uuid, ScheduledTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, job: ScheduledJob, delay: Duration) -> Uuid {
        self.schedule_at(job, Utc::now() + delay)
    }

    pub fn schedule_at(&self, job: ScheduledJob, due_at: DateTime<Utc>) -> Uuid {
        let task = ScheduledTask {
            id: Uuid::new_v4(),
            due_at,
            job,
        };
        let id = task.id;
        debug!(task_id = %id, due_at = %due_at, "task scheduled");
        self.tasks.insert(id, task);
        id
    }

    pub fn cancel(&self, task_id: Uuid) -> bool {
        self.tasks.remove(&task_id).is_some()
    }

    pub fn cancel_for_order(&self, order_id: Uuid) -> usize {
        let mut dropped = 0;
        self.tasks.retain(|_, task| {
            let keep = task.job.order_id() != order_id;
            if !keep {
                dropped += 1;
            }
            keep
        });
        dropped
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Removes and returns every task due at `now`. Removal is the claim, so a task runs once.
    pub fn claim_due(&self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        let due: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|entry| entry.value().due_at <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut claimed: Vec<ScheduledTask> = due
            .into_iter()
            .filter_map(|id| self.tasks.remove(&id).map(|(_, task)| task))
            .collect();
        claimed.sort_by_key(|task| task.due_at);
        claimed
    }
}

pub fn run_due(state: &AppState, now: DateTime<Utc>) -> usize {
    let tasks = state.scheduler.claim_due(now);
    let count = tasks.len();

    for task in tasks {
        match &task.job {
            ScheduledJob::ConfirmPayment { order_id } => {
                if let Err(err) = confirm_payment(state, *order_id) {
                    warn!(task_id = %task.id, order_id = %order_id, error = %err, "payment confirmation failed");
                }
            }
        }
    }

    count
}

pub async fn run_scheduler(state: Arc<AppState>, tick: std::time::Duration) {
    let mut cancel = state.cancel_signal();
    let mut interval = tokio::time::interval(tick);
    info!(tick_ms = tick.as_millis() as u64, "scheduler started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let ran = run_due(&state, Utc::now());
                if ran > 0 {
                    debug!(ran, "scheduled tasks executed");
                }
            }
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
        }
    }

    info!(pending = state.scheduler.pending(), "scheduler stopped");
}
