//! JobTimeoutGuard - enforces the platform's execution budget on async jobs.
//!
//! Every armed job gets exactly one `job_finished` report: either the real
//! one (`finish`) or a forced unsuccessful one when the ceiling expires.
//! Whoever removes the job from `armed` first owns the report.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::tenant_table::lock;
use crate::domain::{JobId, JobParameters};
use crate::ports::JobScheduler;

struct Armed {
    params: JobParameters,
    arm_id: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct ArmedJobs {
    jobs: HashMap<JobId, Armed>,
    next_arm_id: u64,
}

pub struct JobTimeoutGuard {
    armed: Arc<Mutex<ArmedJobs>>,
    scheduler: Arc<dyn JobScheduler>,
    ceiling: Duration,
    runtime: Handle,
}

impl JobTimeoutGuard {
    pub fn new(scheduler: Arc<dyn JobScheduler>, ceiling: Duration, runtime: Handle) -> Self {
        Self {
            armed: Arc::new(Mutex::new(ArmedJobs::default())),
            scheduler,
            ceiling,
            runtime,
        }
    }

    /// Start the one-shot timer for `params.job_id`. Re-arming replaces the old timer.
    pub fn arm(&self, params: JobParameters) {
        let job_id = params.job_id;
        let mut armed = lock(&self.armed);
        armed.next_arm_id += 1;
        let arm_id = armed.next_arm_id;

        // The timer blocks on `armed` until we have inserted the entry.
        let timer = self.spawn_timer(job_id, arm_id);
        let previous = armed.jobs.insert(
            job_id,
            Armed {
                params,
                arm_id,
                timer,
            },
        );
        if let Some(previous) = previous {
            previous.timer.abort();
        }
        debug!(job_id, ceiling_ms = self.ceiling.as_millis() as u64, "armed job timeout");
    }

    /// Report the real completion. Returns `false` if the job was not armed
    /// (never armed, already finished, or already timed out).
    pub fn finish(&self, job_id: JobId, needs_reschedule: bool) -> bool {
        let Some(armed) = lock(&self.armed).jobs.remove(&job_id) else {
            return false;
        };
        armed.timer.abort();
        self.scheduler.job_finished(&armed.params, needs_reschedule);
        true
    }

    /// Forget the job without reporting (the scheduler cancelled it).
    pub fn disarm(&self, job_id: JobId) -> bool {
        let Some(armed) = lock(&self.armed).jobs.remove(&job_id) else {
            return false;
        };
        armed.timer.abort();
        true
    }

    pub fn cancel_all(&self) {
        let jobs = std::mem::take(&mut lock(&self.armed).jobs);
        for armed in jobs.into_values() {
            armed.timer.abort();
        }
    }

    pub fn is_armed(&self, job_id: JobId) -> bool {
        lock(&self.armed).jobs.contains_key(&job_id)
    }

    pub fn armed_count(&self) -> usize {
        lock(&self.armed).jobs.len()
    }

    fn spawn_timer(&self, job_id: JobId, arm_id: u64) -> JoinHandle<()> {
        let armed = Arc::clone(&self.armed);
        let scheduler = Arc::clone(&self.scheduler);
        let ceiling = self.ceiling;

        self.runtime.spawn(async move {
            tokio::time::sleep(ceiling).await;
            let expired = {
                let mut armed = lock(&armed);
                let current = armed.jobs.get(&job_id).is_some_and(|a| a.arm_id == arm_id);
                if current {
                    armed.jobs.remove(&job_id)
                } else {
                    None
                }
            };
            if let Some(expired) = expired {
                warn!(
                    job_id,
                    tenant = %expired.params.tenant_id,
                    task = %expired.params.task_name,
                    "job exceeded execution budget, finishing it as unsuccessful"
                );
                scheduler.job_finished(&expired.params, false);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TenantId;
    use crate::testing::RecordingScheduler;

    fn guard(scheduler: &Arc<RecordingScheduler>) -> JobTimeoutGuard {
        JobTimeoutGuard::new(
            scheduler.clone(),
            Duration::from_millis(15_000),
            Handle::current(),
        )
    }

    fn params(job_id: JobId) -> JobParameters {
        JobParameters::new(job_id, TenantId::new("A"), "sync")
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_forces_one_unsuccessful_report() {
        let scheduler = Arc::new(RecordingScheduler::new());
        let guard = guard(&scheduler);

        guard.arm(params(7));
        tokio::time::sleep(Duration::from_millis(14_999)).await;
        assert!(scheduler.reports().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(scheduler.reports(), vec![(7, false)]);

        // 直後に本物の完了が来ても二重報告しない
        assert!(!guard.finish(7, true));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(scheduler.reports(), vec![(7, false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_before_expiry_cancels_timer() {
        let scheduler = Arc::new(RecordingScheduler::new());
        let guard = guard(&scheduler);

        guard.arm(params(7));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(guard.finish(7, true));
        assert!(!guard.finish(7, false));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(scheduler.reports(), vec![(7, true)]);
        assert_eq!(guard.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_restarts_the_budget() {
        let scheduler = Arc::new(RecordingScheduler::new());
        let guard = guard(&scheduler);

        guard.arm(params(7));
        tokio::time::sleep(Duration::from_secs(10)).await;
        guard.arm(params(7));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(scheduler.reports().is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(scheduler.reports(), vec![(7, false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_and_cancel_all_never_report() {
        let scheduler = Arc::new(RecordingScheduler::new());
        let guard = guard(&scheduler);

        guard.arm(params(1));
        guard.arm(params(2));
        guard.arm(params(3));
        assert!(guard.disarm(1));
        assert!(guard.is_armed(2));
        guard.cancel_all();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(scheduler.reports().is_empty());
        assert_eq!(guard.armed_count(), 0);
    }
}
