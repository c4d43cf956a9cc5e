//! EventCorrelator - which events are still outstanding, per tenant.
//!
//! Completion of the last outstanding event does not tear the tenant down
//! right away: an idle check runs after a grace period and only invalidates
//! the tenant if nothing new began in the meantime. Bursts of events that
//! arrive a few hundred milliseconds apart therefore reuse the loaded tenant.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::lifecycle::TenantLifecycleManager;
use super::tenant_table::TenantTable;
use crate::domain::{
    EventId, ExecutionError, ExecutionEvent, TaskEntry, TenantId, event_id_from_response,
};
use crate::ports::IdGenerator;

/// Invoked (at most once) with the tenant's completion response.
pub type CompletionCallback = Box<dyn FnOnce(&Value) + Send>;

#[derive(Default)]
struct Outstanding {
    ids: HashSet<EventId>,
    callbacks: HashMap<EventId, CompletionCallback>,
    /// Replaced by every `begin_event`; an idle check only fires for the epoch it was scheduled in.
    epoch: u64,
    idle_check: Option<JoinHandle<()>>,
}

impl Outstanding {
    fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.callbacks.is_empty() && self.idle_check.is_none()
    }

    fn cancel_idle_check(&mut self) {
        if let Some(check) = self.idle_check.take() {
            check.abort();
        }
    }
}

pub struct EventCorrelator {
    rows: Arc<TenantTable<Outstanding>>,
    ids: Arc<dyn IdGenerator>,
    lifecycle: Arc<TenantLifecycleManager>,
    runtime: Handle,
    grace_period: Duration,
    /// Epochs are unique across rows so a pruned and recreated row never reuses one.
    epochs: AtomicU64,
}

impl EventCorrelator {
    pub fn new(
        ids: Arc<dyn IdGenerator>,
        lifecycle: Arc<TenantLifecycleManager>,
        runtime: Handle,
        grace_period: Duration,
    ) -> Self {
        Self {
            rows: Arc::new(TenantTable::new()),
            ids,
            lifecycle,
            runtime,
            grace_period,
            epochs: AtomicU64::new(0),
        }
    }

    /// Allocate an event for `task` and count it as outstanding.
    pub fn begin_event(
        &self,
        task: &TaskEntry,
        data: Option<Value>,
        error: Option<ExecutionError>,
        callback: Option<CompletionCallback>,
    ) -> ExecutionEvent {
        let event = ExecutionEvent::new(self.ids.generate_event_id(), task.name(), data, error);
        let event_id = event.event_id();
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;

        self.rows.with_row(task.tenant_id(), |row| {
            row.ids.insert(event_id);
            if let Some(callback) = callback {
                row.callbacks.insert(event_id, callback);
            }
            row.epoch = epoch;
            // tenant が再び動き出したので idle check は不要
            row.cancel_idle_check();
        });

        debug!(tenant = %task.tenant_id(), task = task.name(), event_id = %event_id, "began event");
        event
    }

    /// Mark the event named by `response["eventId"]` as finished.
    ///
    /// Unknown or repeated event ids are ignored; the callback fires at most once.
    pub fn complete_event(&self, task_name: &str, tenant_id: &TenantId, response: &Value) {
        let Some(event_id) = event_id_from_response(response) else {
            warn!(tenant = %tenant_id, task = task_name, "completion response without a valid eventId");
            return;
        };

        info!(tenant = %tenant_id, task = task_name, event_id = %event_id, "finished task");

        let callback = self
            .rows
            .update_row(tenant_id, |row| {
                if row.ids.remove(&event_id) && row.ids.is_empty() {
                    row.cancel_idle_check();
                    row.idle_check = Some(self.spawn_idle_check(tenant_id.clone(), row.epoch));
                }
                row.callbacks.remove(&event_id)
            })
            .flatten();

        if let Some(callback) = callback {
            callback(response);
        }
    }

    /// Forget an event that was never delivered. Does not schedule an idle check.
    pub fn discard_event(&self, tenant_id: &TenantId, event_id: EventId) {
        self.rows.update_row(tenant_id, |row| {
            row.ids.remove(&event_id);
            row.callbacks.remove(&event_id);
        });
        self.rows.prune(tenant_id, Outstanding::is_empty);
    }

    /// Drop everything tracked for the tenant (its runtime is gone).
    pub fn clear_tenant(&self, tenant_id: &TenantId) {
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        let dropped = self.rows.update_row(tenant_id, |row| {
            row.cancel_idle_check();
            row.epoch = epoch;
            row.ids.clear();
            std::mem::take(&mut row.callbacks).len()
        });
        self.rows.prune(tenant_id, Outstanding::is_empty);
        if let Some(dropped) = dropped.filter(|n| *n > 0) {
            warn!(tenant = %tenant_id, callbacks = dropped, "dropped completion callbacks");
        }
    }

    pub fn outstanding_count(&self, tenant_id: &TenantId) -> usize {
        self.rows
            .read_row(tenant_id, |row| row.ids.len())
            .unwrap_or(0)
    }

    pub fn is_outstanding(&self, tenant_id: &TenantId, event_id: EventId) -> bool {
        self.rows
            .read_row(tenant_id, |row| row.ids.contains(&event_id))
            .unwrap_or(false)
    }

    /// Abort every scheduled idle check (shutdown).
    pub fn cancel_idle_checks(&self) {
        for tenant in self.rows.tenants() {
            self.rows.update_row(&tenant, Outstanding::cancel_idle_check);
        }
    }

    fn spawn_idle_check(&self, tenant_id: TenantId, epoch: u64) -> JoinHandle<()> {
        let rows = Arc::clone(&self.rows);
        let lifecycle = Arc::clone(&self.lifecycle);
        let grace_period = self.grace_period;

        self.runtime.spawn(async move {
            tokio::time::sleep(grace_period).await;
            // Detach under the row lock so a concurrent begin_event either
            // lands before (and we skip) or finds the tenant already gone.
            // The loader's teardown runs after the lock is released.
            let teardown = rows
                .update_row(&tenant_id, |row| {
                    if !row.ids.is_empty() || row.epoch != epoch {
                        return None;
                    }
                    row.idle_check = None;
                    debug!(tenant = %tenant_id, "tenant idle after grace period");
                    lifecycle.detach(&tenant_id)
                })
                .flatten();
            rows.prune(&tenant_id, Outstanding::is_empty);
            if let Some(teardown) = teardown {
                teardown.run();
            }
        })
    }
}
