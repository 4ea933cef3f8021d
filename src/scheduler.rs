//! Scheduled single-client queries.
//!
//! Jobs are user-created with a due time and polled by a fixed-interval
//! background task. Per job the status machine is
//! `scheduled -> executed | error`, both terminal; a terminal job is
//! never touched again. At-most-once execution is guaranteed by
//! claiming a job (under the queue lock, before the backend call is
//! awaited) so an overlapping tick can never pick it up a second time.

use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::{fresh_id, is_valid_period, JobStatus, ScheduledJob};
use crate::pipeline;
use crate::store::{keys, Store};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Owned queue of scheduled jobs plus the in-flight claim set. Only
/// `jobs` is persisted; claims are process-local by nature.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Vec<ScheduledJob>,
    in_flight: HashSet<i64>,
}

impl JobQueue {
    pub fn new(jobs: Vec<ScheduledJob>) -> Self {
        Self {
            jobs,
            in_flight: HashSet::new(),
        }
    }

    pub async fn load(store: &Store) -> Self {
        Self::new(store.load(keys::SCHEDULES).await)
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    pub fn add(
        &mut self,
        client_id: i64,
        period: String,
        due_at: DateTime<Utc>,
    ) -> Result<&ScheduledJob, AppError> {
        if !is_valid_period(&period) {
            return Err(AppError::Validation(format!(
                "Invalid period '{}', expected MM/YYYY",
                period
            )));
        }
        let job = ScheduledJob {
            id: fresh_id(self.jobs.iter().map(|j| j.id)),
            client_id,
            period,
            due_at,
            status: JobStatus::Scheduled,
            executed_at: None,
            error_log: None,
        };
        self.jobs.push(job);
        Ok(self.jobs.last().expect("just pushed"))
    }

    /// Jobs are deletable in any state. Deleting an in-flight job does
    /// not cancel the invocation; its completion is simply discarded.
    pub fn remove(&mut self, id: i64) -> Result<(), AppError> {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.id != id);
        if self.jobs.len() == before {
            return Err(AppError::NotFound(format!("Scheduled job {} not found", id)));
        }
        Ok(())
    }

    /// Claims every due, still-scheduled, unclaimed job. Claimed jobs
    /// stay `Scheduled` until completion but cannot be claimed again.
    pub fn claim_due(&mut self, now: DateTime<Utc>) -> Vec<ScheduledJob> {
        let due: Vec<ScheduledJob> = self
            .jobs
            .iter()
            .filter(|j| {
                j.status == JobStatus::Scheduled
                    && j.due_at <= now
                    && !self.in_flight.contains(&j.id)
            })
            .cloned()
            .collect();
        for job in &due {
            self.in_flight.insert(job.id);
        }
        due
    }

    /// Applies a claimed job's outcome. Returns `false` when the job
    /// was deleted while in flight, in which case the outcome is
    /// discarded.
    pub fn complete(
        &mut self,
        id: i64,
        outcome: Result<(), String>,
        at: DateTime<Utc>,
    ) -> bool {
        self.in_flight.remove(&id);
        let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) else {
            return false;
        };
        match outcome {
            Ok(()) => {
                job.status = JobStatus::Executed;
                job.error_log = None;
            }
            Err(msg) => {
                job.status = JobStatus::Error;
                job.error_log = Some(msg);
            }
        }
        job.executed_at = Some(at);
        true
    }
}

/// One poll pass: claim due jobs and execute them sequentially. A
/// failing job marks itself `Error` and never prevents the remaining
/// jobs of the tick, or future ticks, from running.
pub async fn tick(state: &AppState) {
    let due = state.jobs.lock().await.claim_due(Utc::now());
    if due.is_empty() {
        return;
    }
    tracing::info!("Scheduler tick: {} job(s) due", due.len());

    for job in due {
        let outcome = pipeline::run_single(state, job.client_id, &job.period)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string());

        if let Err(ref msg) = outcome {
            tracing::error!("✗ Scheduled job {} failed: {}", job.id, msg);
        }

        let mut queue = state.jobs.lock().await;
        if queue.complete(job.id, outcome, Utc::now()) {
            state.store.save(keys::SCHEDULES, queue.jobs()).await;
        } else {
            tracing::info!("Scheduled job {} deleted mid-flight, outcome discarded", job.id);
        }
    }
}

/// Spawns the fixed-interval poll task.
pub fn spawn(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(state.config.poll_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; overdue jobs persisted
        // across a restart run right away.
        loop {
            ticker.tick().await;
            tick(&state).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn queue_with_job(due_offset_secs: i64) -> (JobQueue, i64) {
        let mut queue = JobQueue::default();
        let id = queue
            .add(
                42,
                "01/2025".to_string(),
                Utc::now() + ChronoDuration::seconds(due_offset_secs),
            )
            .unwrap()
            .id;
        (queue, id)
    }

    #[test]
    fn add_rejects_malformed_period() {
        let mut queue = JobQueue::default();
        let err = queue.add(1, "2025-01".to_string(), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn claim_skips_future_jobs() {
        let (mut queue, _) = queue_with_job(3600);
        assert!(queue.claim_due(Utc::now()).is_empty());
    }

    #[test]
    fn claim_is_single_flight() {
        let (mut queue, id) = queue_with_job(-1);

        let first = queue.claim_due(Utc::now());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, id);

        // A second overlapping tick must not re-claim the job even
        // though its status is still Scheduled.
        assert!(queue.claim_due(Utc::now()).is_empty());
    }

    #[test]
    fn terminal_jobs_are_never_reclaimed() {
        let (mut queue, id) = queue_with_job(-1);
        queue.claim_due(Utc::now());
        assert!(queue.complete(id, Ok(()), Utc::now()));

        let job = queue.jobs()[0].clone();
        assert_eq!(job.status, JobStatus::Executed);
        assert!(job.executed_at.is_some());

        // Repeated polls leave the terminal status untouched.
        assert!(queue.claim_due(Utc::now()).is_empty());
        assert_eq!(queue.jobs()[0].status, JobStatus::Executed);
    }

    #[test]
    fn failure_marks_error_with_log() {
        let (mut queue, id) = queue_with_job(-1);
        queue.claim_due(Utc::now());
        queue.complete(id, Err("upstream 502".to_string()), Utc::now());

        let job = &queue.jobs()[0];
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error_log.as_deref(), Some("upstream 502"));
    }

    #[test]
    fn deletion_mid_flight_discards_outcome() {
        let (mut queue, id) = queue_with_job(-1);
        queue.claim_due(Utc::now());
        queue.remove(id).unwrap();

        assert!(!queue.complete(id, Ok(()), Utc::now()));
        assert!(queue.jobs().is_empty());
    }

    #[test]
    fn remove_works_in_any_state() {
        let (mut queue, id) = queue_with_job(-1);
        queue.claim_due(Utc::now());
        queue.complete(id, Ok(()), Utc::now());
        queue.remove(id).unwrap();
        assert!(queue.jobs().is_empty());
    }
}
