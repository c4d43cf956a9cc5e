//! JobScheduler port - the OS job scheduler we report job completion to.

use crate::domain::JobParameters;

pub trait JobScheduler: Send + Sync {
    /// `needs_reschedule = false` reports the run as finished/unsuccessful
    /// from the scheduler's point of view (no retry requested).
    fn job_finished(&self, params: &JobParameters, needs_reschedule: bool);
}
