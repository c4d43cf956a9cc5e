//! TenantLifecycleManager - loads tenants on demand and tears idle ones down.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, info};

use super::handles::TenantHandleTable;
use super::tenant_table::TenantTable;
use crate::domain::{TaskManagerError, TaskOptions, TenantId};
use crate::ports::{LoadCallback, LoadRecord, TenantLoader};

/// Cleanup to run when an asynchronous load fails.
pub type FailureHook = Box<dyn FnOnce(&TenantId) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// A load record already existed (loading or loaded).
    AlreadyLoaded,
    /// The loader was asked to start the tenant.
    Started,
}

/// One load attempt. `record` is `None` until the loader hands it back.
struct LoadSlot {
    attempt: u64,
    record: Option<Box<dyn LoadRecord>>,
}

/// A tenant already detached from the tables whose runtime is still up.
#[must_use]
pub(crate) struct Teardown {
    tenant_id: TenantId,
    record: Option<Box<dyn LoadRecord>>,
}

impl Teardown {
    pub(crate) fn run(self) {
        if let Some(record) = self.record {
            record.invalidate();
        }
        info!(tenant = %self.tenant_id, "invalidated headless tenant");
    }
}

pub struct TenantLifecycleManager {
    rows: Arc<TenantTable<Option<LoadSlot>>>,
    loader: Arc<dyn TenantLoader>,
    handles: Arc<TenantHandleTable>,
    loader_options: TaskOptions,
    attempts: AtomicU64,
}

/// Only a hard precondition: the loader itself decides what it can reach.
fn is_valid_url(url: &str) -> bool {
    let url = url.trim();
    !url.is_empty() && !url.contains(char::is_whitespace)
}

impl TenantLifecycleManager {
    pub fn new(
        loader: Arc<dyn TenantLoader>,
        handles: Arc<TenantHandleTable>,
        loader_options: TaskOptions,
    ) -> Self {
        Self {
            rows: Arc::new(TenantTable::new()),
            loader,
            handles,
            loader_options,
            attempts: AtomicU64::new(0),
        }
    }

    /// Make sure the tenant is loaded or loading.
    ///
    /// An invalid URL or a loader that refuses to start is a hard failure
    /// (`InvalidLoadParameters` / `LoaderFailure`). An asynchronous failure
    /// drops the load record and runs `on_failure`.
    pub fn ensure_loaded(
        &self,
        tenant_id: &TenantId,
        tenant_url: &str,
        on_failure: FailureHook,
    ) -> Result<LoadStatus, TaskManagerError> {
        if self.is_loaded(tenant_id) {
            return Ok(LoadStatus::AlreadyLoaded);
        }
        if !is_valid_url(tenant_url) {
            error!(tenant = %tenant_id, url = tenant_url, "cannot load tenant: invalid url");
            return Err(TaskManagerError::InvalidLoadParameters {
                tenant: tenant_id.clone(),
                url: tenant_url.to_string(),
            });
        }

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let claimed = self.rows.with_row(tenant_id, |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(LoadSlot {
                attempt,
                record: None,
            });
            true
        });
        if !claimed {
            return Ok(LoadStatus::AlreadyLoaded);
        }

        info!(tenant = %tenant_id, url = tenant_url, "loading headless tenant");

        let on_complete = self.completion_handler(tenant_id.clone(), attempt, on_failure);
        match self
            .loader
            .load_tenant(tenant_url, &self.loader_options, on_complete)
        {
            Ok(record) => {
                let stale = self.rows.with_row(tenant_id, |slot| match slot {
                    Some(current) if current.attempt == attempt => {
                        current.record = Some(record);
                        None
                    }
                    _ => Some(record),
                });
                // 失敗 or invalidate が loader の return より先に来た
                if let Some(record) = stale {
                    debug!(tenant = %tenant_id, attempt, "discarding record of a superseded load");
                    self.rows.prune(tenant_id, Option::is_none);
                    record.invalidate();
                }
                Ok(LoadStatus::Started)
            }
            Err(source) => {
                self.release_attempt(tenant_id, attempt);
                error!(tenant = %tenant_id, error = %source, "tenant loader refused to start");
                Err(TaskManagerError::LoaderFailure {
                    tenant: tenant_id.clone(),
                    source,
                })
            }
        }
    }

    fn completion_handler(
        &self,
        tenant_id: TenantId,
        attempt: u64,
        on_failure: FailureHook,
    ) -> LoadCallback {
        let rows = Arc::clone(&self.rows);
        Box::new(move |result| match result {
            Ok(()) => info!(tenant = %tenant_id, "tenant loaded"),
            Err(e) => {
                error!(tenant = %tenant_id, error = %e, "tenant failed to load");
                rows.update_row(&tenant_id, |slot| {
                    if slot.as_ref().is_some_and(|s| s.attempt == attempt) {
                        *slot = None;
                    }
                });
                rows.prune(&tenant_id, Option::is_none);
                on_failure(&tenant_id);
            }
        })
    }

    fn release_attempt(&self, tenant_id: &TenantId, attempt: u64) -> Option<LoadSlot> {
        let released = self
            .rows
            .update_row(tenant_id, |slot| {
                if slot.as_ref().is_some_and(|s| s.attempt == attempt) {
                    slot.take()
                } else {
                    None
                }
            })
            .flatten();
        self.rows.prune(tenant_id, Option::is_none);
        released
    }

    /// Tear down the tenant's headless runtime. Idempotent.
    pub fn invalidate(&self, tenant_id: &TenantId) -> bool {
        match self.detach(tenant_id) {
            Some(teardown) => {
                teardown.run();
                true
            }
            None => false,
        }
    }

    /// Forget the tenant's load record and headless handle without calling
    /// into the loader. The caller runs the returned `Teardown` once it holds
    /// no locks.
    pub(crate) fn detach(&self, tenant_id: &TenantId) -> Option<Teardown> {
        let slot = self.rows.update_row(tenant_id, Option::take).flatten()?;
        self.rows.prune(tenant_id, Option::is_none);
        self.handles.remove_headless(tenant_id);
        Some(Teardown {
            tenant_id: tenant_id.clone(),
            record: slot.record,
        })
    }

    pub fn invalidate_all(&self) {
        for tenant in self.rows.tenants() {
            self.invalidate(&tenant);
        }
    }

    pub fn is_loaded(&self, tenant_id: &TenantId) -> bool {
        self.rows
            .read_row(tenant_id, Option::is_some)
            .unwrap_or(false)
    }
}
