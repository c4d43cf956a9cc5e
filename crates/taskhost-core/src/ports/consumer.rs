//! TaskConsumer port - per-task-type execution logic.
//!
//! A consumer is created by the `ConsumerFactory` registered for its
//! `ConsumerType`, one instance per task entry. All hooks have no-op defaults
//! so a consumer only implements what its trigger kind needs.

use std::sync::Arc;

use serde_json::Value;

use crate::app::TaskService;
use crate::domain::{JobParameters, TaskEntry, TaskOptions};

pub trait TaskConsumer: Send + Sync {
    fn did_register(&self, _task: &TaskEntry) {}

    fn did_unregister(&self) {}

    fn set_options(&self, _options: &TaskOptions) {}

    /// Returns `true` when the job keeps running asynchronously; the service
    /// then arms the timeout guard and the consumer must eventually call
    /// `TaskService::job_finished`.
    fn did_execute_job(
        &self,
        _service: &TaskService,
        _task: &TaskEntry,
        _params: &JobParameters,
    ) -> bool {
        false
    }

    /// Returns whether the scheduler should reschedule the cancelled job.
    fn did_cancel_job(
        &self,
        _service: &TaskService,
        _task: &TaskEntry,
        _params: &JobParameters,
    ) -> bool {
        false
    }

    fn did_receive_broadcast(&self, _service: &TaskService, _task: &TaskEntry, _payload: &Value) {}
}

/// Builds a fresh consumer for one task entry.
pub type ConsumerFactory = Arc<dyn Fn() -> Arc<dyn TaskConsumer> + Send + Sync>;
