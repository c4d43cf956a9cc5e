//! Scheduler job invocations.

use serde::{Deserialize, Serialize};

use super::TenantId;

/// Platform job id (assigned by the OS scheduler, not by us).
pub type JobId = u64;

/// Parameters of a job the OS scheduler fired (or cancelled).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub task_name: String,

    /// Whatever the consumer attached when it scheduled the job.
    #[serde(default)]
    pub extras: serde_json::Value,
}

impl JobParameters {
    pub fn new(job_id: JobId, tenant_id: TenantId, task_name: impl Into<String>) -> Self {
        Self {
            job_id,
            tenant_id,
            task_name: task_name.into(),
            extras: serde_json::Value::Null,
        }
    }

    pub fn with_extras(mut self, extras: serde_json::Value) -> Self {
        self.extras = extras;
        self
    }
}
