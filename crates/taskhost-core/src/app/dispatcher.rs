//! TaskService - the execution dispatcher and public face of the orchestrator.
//!
//! # フロー
//! 1. trigger (job / broadcast / consumer) → registry lookup
//! 2. EventCorrelator が event を作る（handler がいなくても必ず）
//! 3. handler resident → すぐ配送
//! 4. いなければ pending queue に積んで tenant をロード
//! 5. handler が `set_handle` したら queue を FIFO で配送
//!
//! Resolving the handler and appending to the pending queue happen under the
//! tenant's queue row lock, and so does `set_handle`, so an event can never
//! slip into a queue that was just drained.
//!
//! Queued events are handed over outside the lock. While a flush is running
//! the row is marked `draining` and every new event joins the back of the
//! queue instead of going straight to the handler, so a handler that
//! dispatches again from `execute_with_body` (or a second thread) still sees
//! events in dispatch order.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use super::config::TaskServiceConfig;
use super::correlator::{CompletionCallback, EventCorrelator};
use super::handles::{HandleMode, HandleToken, TenantHandleTable};
use super::lifecycle::{FailureHook, TenantLifecycleManager};
use super::registry::TaskRegistry;
use super::tenant_table::TenantTable;
use super::timeout_guard::JobTimeoutGuard;
use crate::domain::{
    ConsumerType, EventId, ExecutionError, ExecutionEvent, JobId, JobParameters, TaskEntry,
    TaskManagerError, TaskOptions, TenantId,
};
use crate::ports::{PersistenceStore, TenantHandler};

/// Where a dispatched event went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered(EventId),
    /// Waiting for the tenant's handler.
    Queued(EventId),
}

impl Dispatch {
    pub fn event_id(&self) -> EventId {
        match self {
            Dispatch::Delivered(id) | Dispatch::Queued(id) => *id,
        }
    }
}

/// Events waiting for the tenant's handler.
#[derive(Default)]
pub(crate) struct PendingRow {
    queue: VecDeque<ExecutionEvent>,
    /// Someone is flushing `queue`; new events must queue behind it.
    draining: bool,
}

impl PendingRow {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && !self.draining
    }
}

pub(crate) struct Shared {
    pub(crate) config: TaskServiceConfig,
    pub(crate) store: Arc<dyn PersistenceStore>,
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) correlator: EventCorrelator,
    pub(crate) handles: Arc<TenantHandleTable>,
    pub(crate) lifecycle: Arc<TenantLifecycleManager>,
    pub(crate) pending: TenantTable<PendingRow>,
    pub(crate) guard: JobTimeoutGuard,
}

impl Shared {
    /// The tenant could not be loaded: it will never service its tasks.
    fn on_load_failed(&self, tenant_id: &TenantId) {
        self.correlator.clear_tenant(tenant_id);
        let dropped = self
            .pending
            .update_row(tenant_id, |row| std::mem::take(&mut row.queue).len())
            .unwrap_or(0);
        self.pending.prune(tenant_id, PendingRow::is_idle);
        warn!(tenant = %tenant_id, dropped, "tenant unreachable, unregistering all of its tasks");
        if let Err(e) = self.registry.unregister_all(tenant_id) {
            error!(tenant = %tenant_id, error = %e, "failed to unregister tasks of unreachable tenant");
        }
    }
}

/// Cheap to clone; all clones drive the same orchestrator.
#[derive(Clone)]
pub struct TaskService {
    pub(crate) shared: Arc<Shared>,
}

impl TaskService {
    // ------------------------------------------------------------------
    // registration
    // ------------------------------------------------------------------

    pub fn register_task(
        &self,
        name: &str,
        tenant_id: &TenantId,
        tenant_url: &str,
        consumer_type: &ConsumerType,
        options: TaskOptions,
    ) -> Result<TaskEntry, TaskManagerError> {
        self.shared
            .registry
            .register(name, tenant_id, tenant_url, consumer_type, options)
    }

    pub fn unregister_task(
        &self,
        name: &str,
        tenant_id: &TenantId,
        consumer_type: Option<&ConsumerType>,
    ) -> Result<(), TaskManagerError> {
        self.shared.registry.unregister(name, tenant_id, consumer_type)
    }

    pub fn unregister_all_tasks(&self, tenant_id: &TenantId) -> Result<(), TaskManagerError> {
        self.shared.registry.unregister_all(tenant_id)
    }

    pub fn has_registered_task(&self, name: &str, tenant_id: &TenantId) -> bool {
        self.shared.registry.has_task(name, tenant_id)
    }

    pub fn task_has_consumer_of_type(
        &self,
        name: &str,
        tenant_id: &TenantId,
        consumer_type: &ConsumerType,
    ) -> bool {
        self.shared
            .registry
            .has_consumer_of_type(name, tenant_id, consumer_type)
    }

    pub fn tasks_for_tenant(&self, tenant_id: &TenantId) -> BTreeMap<String, TaskOptions> {
        self.shared.registry.options_for_tenant(tenant_id)
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.shared.registry
    }

    // ------------------------------------------------------------------
    // dispatch
    // ------------------------------------------------------------------

    /// Send an execution event for `task` to its tenant.
    ///
    /// When the tenant has to be loaded and cannot be (bad URL, no loader),
    /// the dispatch is rolled back: the task is unregistered, the event is
    /// forgotten and the tenant's queue is dropped.
    pub fn execute_task(
        &self,
        task: &TaskEntry,
        data: Option<Value>,
        error: Option<ExecutionError>,
        callback: Option<CompletionCallback>,
    ) -> Result<Dispatch, TaskManagerError> {
        let shared = &self.shared;
        let tenant_id = task.tenant_id();
        let event = shared.correlator.begin_event(task, data, error, callback);
        let event_id = event.event_id();

        let (handler, draining) = shared.pending.with_row(tenant_id, |row| {
            let handler = match row.draining {
                true => None,
                false => shared.handles.resolve(tenant_id),
            };
            if handler.is_none() {
                row.queue.push_back(event.clone());
            }
            (handler, row.draining)
        });

        if let Some(handler) = handler {
            shared.pending.prune(tenant_id, PendingRow::is_idle);
            handler.execute_with_body(&event);
            return Ok(Dispatch::Delivered(event_id));
        }
        if draining {
            // 配送中の flush が拾う
            return Ok(Dispatch::Queued(event_id));
        }

        info!(tenant = %tenant_id, task = task.name(), event_id = %event_id, "queued event until tenant is ready");

        if let Err(e) = shared
            .lifecycle
            .ensure_loaded(tenant_id, task.tenant_url(), self.load_failure_hook())
        {
            warn!(tenant = %tenant_id, task = task.name(), error = %e, "rolling back dispatch");
            if let Err(unregister) = shared.registry.unregister(task.name(), tenant_id, None) {
                error!(tenant = %tenant_id, task = task.name(), error = %unregister, "error while unregistering invalid task");
            }
            shared.correlator.discard_event(tenant_id, event_id);
            shared.pending.update_row(tenant_id, |row| row.queue.clear());
            shared.pending.prune(tenant_id, PendingRow::is_idle);
            return Err(e);
        }
        Ok(Dispatch::Queued(event_id))
    }

    fn load_failure_hook(&self) -> FailureHook {
        let shared = Arc::downgrade(&self.shared);
        Box::new(move |tenant_id| {
            if let Some(shared) = shared.upgrade() {
                shared.on_load_failed(tenant_id);
            }
        })
    }

    /// Attach the tenant's handler and flush everything queued for it, oldest first.
    ///
    /// A foreground handler also refreshes the tenant URL (it can only change
    /// while the user runs the tenant).
    pub fn set_handle(
        &self,
        tenant_id: &TenantId,
        tenant_url: &str,
        handler: &Arc<dyn TenantHandler>,
        mode: HandleMode,
    ) -> HandleToken {
        let shared = &self.shared;
        let (token, drain) = shared.pending.with_row(tenant_id, |row| {
            let token = shared.handles.set_handle(tenant_id, handler, mode);
            let drain = !row.draining && !row.queue.is_empty();
            row.draining |= drain;
            (token, drain)
        });
        if drain {
            self.drain_pending(tenant_id);
        }
        shared.pending.prune(tenant_id, PendingRow::is_idle);

        if mode == HandleMode::Foreground
            && let Err(e) = shared.registry.update_tenant_url(tenant_id, tenant_url)
        {
            warn!(tenant = %tenant_id, error = %e, "failed to persist tenant url");
        }
        token
    }

    /// Hand the queue to the resident handler in batches until it stays empty.
    /// Only the caller that set `draining` runs this.
    fn drain_pending(&self, tenant_id: &TenantId) {
        let shared = &self.shared;
        loop {
            let batch = shared.pending.with_row(tenant_id, |row| {
                match shared.handles.resolve(tenant_id) {
                    Some(handler) if !row.queue.is_empty() => {
                        Some((handler, std::mem::take(&mut row.queue)))
                    }
                    // handler が外れたら残りは次の set_handle まで待つ
                    _ => {
                        row.draining = false;
                        None
                    }
                }
            });
            let Some((handler, batch)) = batch else {
                return;
            };
            info!(tenant = %tenant_id, count = batch.len(), "delivering queued events");
            for event in &batch {
                handler.execute_with_body(event);
            }
        }
    }

    pub fn detach_handle(&self, tenant_id: &TenantId, token: HandleToken) -> bool {
        self.shared.handles.detach(tenant_id, token)
    }

    /// The tenant's handler finished the event named in `response["eventId"]`.
    pub fn notify_task_did_finish(&self, task_name: &str, tenant_id: &TenantId, response: &Value) {
        self.shared
            .correlator
            .complete_event(task_name, tenant_id, response);
    }

    // ------------------------------------------------------------------
    // OS triggers
    // ------------------------------------------------------------------

    /// The scheduler fired a job. Returns whether the job keeps running
    /// asynchronously (and is now bounded by the execution budget).
    pub fn handle_job(&self, params: &JobParameters) -> bool {
        let Some(task) = self
            .shared
            .registry
            .registered(&params.task_name, &params.tenant_id)
        else {
            warn!(tenant = %params.tenant_id, task = %params.task_name, "task or consumer not found for job");
            return false;
        };

        info!(tenant = %params.tenant_id, task = %params.task_name, job_id = params.job_id, "handling job");

        // 先に arm: consumer が同期的に job_finished を呼んでも取りこぼさない
        self.shared.guard.arm(params.clone());
        let is_async = task.consumer.did_execute_job(self, &task.entry, params);
        if !is_async {
            self.shared.guard.disarm(params.job_id);
        }
        is_async
    }

    /// The scheduler cancelled a job. Returns whether it should be rescheduled.
    pub fn cancel_job(&self, params: &JobParameters) -> bool {
        self.shared.guard.disarm(params.job_id);
        let Some(task) = self
            .shared
            .registry
            .registered(&params.task_name, &params.tenant_id)
        else {
            return false;
        };
        info!(tenant = %params.tenant_id, task = %params.task_name, job_id = params.job_id, "job cancelled by the system");
        task.consumer.did_cancel_job(self, &task.entry, params)
    }

    /// A broadcast/alarm addressed to `task_name`. Returns `false` when nobody handles it.
    pub fn handle_broadcast(&self, tenant_id: &TenantId, task_name: &str, payload: &Value) -> bool {
        let Some(task) = self.shared.registry.registered(task_name, tenant_id) else {
            warn!(tenant = %tenant_id, task = task_name, "task or consumer not found for broadcast");
            return false;
        };
        info!(tenant = %tenant_id, task = task_name, "handling broadcast");
        task.consumer.did_receive_broadcast(self, &task.entry, payload);
        true
    }

    /// Real completion of an async job. `false` if the job already timed out.
    pub fn job_finished(&self, job_id: JobId, needs_reschedule: bool) -> bool {
        self.shared.guard.finish(job_id, needs_reschedule)
    }

    // ------------------------------------------------------------------
    // inspection / shutdown
    // ------------------------------------------------------------------

    pub fn pending_len(&self, tenant_id: &TenantId) -> usize {
        self.shared
            .pending
            .read_row(tenant_id, |row| row.queue.len())
            .unwrap_or(0)
    }

    pub fn outstanding_count(&self, tenant_id: &TenantId) -> usize {
        self.shared.correlator.outstanding_count(tenant_id)
    }

    pub fn is_loaded(&self, tenant_id: &TenantId) -> bool {
        self.shared.lifecycle.is_loaded(tenant_id)
    }

    pub fn is_job_armed(&self, job_id: JobId) -> bool {
        self.shared.guard.is_armed(job_id)
    }

    pub fn config(&self) -> &TaskServiceConfig {
        &self.shared.config
    }

    /// Cancel timers and idle checks, tear down loaded tenants, flush the store.
    pub fn shutdown(&self) -> Result<(), TaskManagerError> {
        let shared = &self.shared;
        shared.guard.cancel_all();
        shared.correlator.cancel_idle_checks();
        shared.lifecycle.invalidate_all();
        shared.store.flush()?;
        info!("task service shut down");
        Ok(())
    }
}
