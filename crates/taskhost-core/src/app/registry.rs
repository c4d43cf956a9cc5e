//! TaskRegistry - the tenant → task catalog, written through to the store.
//!
//! Persisted row (key = tenant id):
//! `{"appUrl":"…","tasks":{"<name>":{"consumerClass":"<type>","options":{…}}}}`
//!
//! Consumer hooks always run after the row lock is released.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::consumers::ConsumerRegistry;
use super::tenant_table::TenantTable;
use crate::domain::{ConsumerType, TaskEntry, TaskManagerError, TaskOptions, TenantId};
use crate::ports::{PersistenceStore, TaskConsumer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedTenant {
    app_url: String,
    tasks: BTreeMap<String, PersistedTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedTask {
    consumer_class: ConsumerType,
    #[serde(default)]
    options: TaskOptions,
}

/// Catalog entry + the consumer instance that serves it.
#[derive(Clone)]
pub(crate) struct RegisteredTask {
    pub(crate) entry: TaskEntry,
    pub(crate) consumer: Arc<dyn TaskConsumer>,
}

#[derive(Default)]
struct TenantTasks {
    tasks: BTreeMap<String, RegisteredTask>,
}

enum Registration {
    Created(RegisteredTask),
    Updated(RegisteredTask),
}

pub struct TaskRegistry {
    rows: TenantTable<TenantTasks>,
    consumers: Arc<ConsumerRegistry>,
    store: Arc<dyn PersistenceStore>,
}

impl TaskRegistry {
    pub fn new(consumers: Arc<ConsumerRegistry>, store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            rows: TenantTable::new(),
            consumers,
            store,
        }
    }

    /// Register (or re-register) a task.
    ///
    /// Re-registering with the same consumer type only replaces the options.
    /// A different consumer type for an existing task is rejected untouched.
    /// The new row is written to the store before it replaces the in-memory
    /// one, and consumer hooks only run once both succeeded.
    pub fn register(
        &self,
        name: &str,
        tenant_id: &TenantId,
        tenant_url: &str,
        consumer_type: &ConsumerType,
        options: TaskOptions,
    ) -> Result<TaskEntry, TaskManagerError> {
        let registration = self.rows.with_row(tenant_id, |row| -> Result<_, TaskManagerError> {
            let (registration, task) = match row.tasks.get(name) {
                Some(existing) if existing.entry.consumer_type() != consumer_type => {
                    return Err(TaskManagerError::InvalidConsumer {
                        task: name.to_string(),
                        consumer: consumer_type.clone(),
                        reason: format!(
                            "task is already registered with consumer '{}'",
                            existing.entry.consumer_type()
                        ),
                    });
                }
                Some(existing) => {
                    let mut updated = existing.clone();
                    updated.entry.set_options(options);
                    (Registration::Updated(updated.clone()), updated)
                }
                None => {
                    let task = self.build_task(name, tenant_id, tenant_url, consumer_type, options)?;
                    (Registration::Created(task.clone()), task)
                }
            };
            let mut next = row.tasks.clone();
            next.insert(name.to_string(), task);
            self.commit(tenant_id, row, next)?;
            Ok(registration)
        });
        self.rows.prune(tenant_id, |row| row.tasks.is_empty());
        let registration = registration.inspect_err(|e| {
            if matches!(e, TaskManagerError::Persistence(_) | TaskManagerError::Codec(_)) {
                error!(tenant = %tenant_id, task = name, error = %e, "failed to persist registration");
            }
        })?;

        let entry = match registration {
            Registration::Updated(task) => {
                info!(tenant = %tenant_id, task = name, "updated task options");
                task.consumer.set_options(task.entry.options());
                task.entry
            }
            Registration::Created(task) => {
                info!(tenant = %tenant_id, task = name, consumer = %consumer_type, "registered task");
                task.consumer.did_register(&task.entry);
                task.entry
            }
        };
        Ok(entry)
    }

    /// `expected_consumer_type = None` skips the consumer check.
    ///
    /// Nothing changes (and no hook runs) when the store rejects the new row.
    pub fn unregister(
        &self,
        name: &str,
        tenant_id: &TenantId,
        expected_consumer_type: Option<&ConsumerType>,
    ) -> Result<(), TaskManagerError> {
        let task = self.rows.with_row(tenant_id, |row| -> Result<_, TaskManagerError> {
            let Some(task) = row.tasks.get(name) else {
                return Err(TaskManagerError::TaskNotFound {
                    task: name.to_string(),
                    tenant: tenant_id.clone(),
                });
            };
            if let Some(expected) = expected_consumer_type
                && task.entry.consumer_type() != expected
            {
                return Err(TaskManagerError::ConsumerMismatch {
                    task: name.to_string(),
                    expected: expected.clone(),
                    actual: task.entry.consumer_type().clone(),
                });
            }
            let mut next = row.tasks.clone();
            let removed = next.remove(name);
            self.commit(tenant_id, row, next)?;
            Ok(removed)
        })?;
        self.rows.prune(tenant_id, |row| row.tasks.is_empty());

        info!(tenant = %tenant_id, task = name, "unregistered task");
        if let Some(task) = task {
            task.consumer.did_unregister();
        }
        Ok(())
    }

    /// Drop every task of the tenant and its persisted row. No-op for unknown tenants.
    pub fn unregister_all(&self, tenant_id: &TenantId) -> Result<(), TaskManagerError> {
        let removed = self.rows.update_row(tenant_id, |row| -> Result<_, TaskManagerError> {
            if row.tasks.is_empty() {
                return Ok(BTreeMap::new());
            }
            self.store.remove(tenant_id.as_str())?;
            Ok(std::mem::take(&mut row.tasks))
        });
        let tasks = match removed {
            None => return Ok(()),
            Some(result) => result?,
        };
        self.rows.prune(tenant_id, |row| row.tasks.is_empty());
        if tasks.is_empty() {
            return Ok(());
        }

        info!(tenant = %tenant_id, count = tasks.len(), "unregistering all tasks");
        for task in tasks.values() {
            task.consumer.did_unregister();
        }
        Ok(())
    }

    pub fn lookup(&self, name: &str, tenant_id: &TenantId) -> Option<TaskEntry> {
        self.registered(name, tenant_id).map(|task| task.entry)
    }

    pub(crate) fn registered(&self, name: &str, tenant_id: &TenantId) -> Option<RegisteredTask> {
        self.rows
            .read_row(tenant_id, |row| row.tasks.get(name).cloned())
            .flatten()
    }

    /// Entries sorted by task name.
    pub fn list_for_tenant(&self, tenant_id: &TenantId) -> Vec<TaskEntry> {
        self.rows
            .read_row(tenant_id, |row| {
                row.tasks.values().map(|task| task.entry.clone()).collect()
            })
            .unwrap_or_default()
    }

    /// Task name → options.
    pub fn options_for_tenant(&self, tenant_id: &TenantId) -> BTreeMap<String, TaskOptions> {
        self.list_for_tenant(tenant_id)
            .into_iter()
            .map(|entry| (entry.name().to_string(), entry.options().clone()))
            .collect()
    }

    pub fn has_task(&self, name: &str, tenant_id: &TenantId) -> bool {
        self.registered(name, tenant_id).is_some()
    }

    pub fn has_consumer_of_type(
        &self,
        name: &str,
        tenant_id: &TenantId,
        consumer_type: &ConsumerType,
    ) -> bool {
        self.registered(name, tenant_id)
            .is_some_and(|task| task.entry.consumer_type() == consumer_type)
    }

    /// Total number of entries across tenants.
    pub fn len(&self) -> usize {
        self.rows
            .tenants()
            .iter()
            .filter_map(|tenant| self.rows.read_row(tenant, |row| row.tasks.len()))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tenants that currently have at least one task.
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self
            .rows
            .tenants()
            .into_iter()
            .filter(|tenant| {
                self.rows
                    .read_row(tenant, |row| !row.tasks.is_empty())
                    .unwrap_or(false)
            })
            .collect();
        tenants.sort();
        tenants
    }

    /// Rewrites the URL of every task of the tenant. Returns whether anything changed.
    pub fn update_tenant_url(
        &self,
        tenant_id: &TenantId,
        url: &str,
    ) -> Result<bool, TaskManagerError> {
        let changed = self.rows.update_row(tenant_id, |row| {
            if row.tasks.is_empty() || row.tasks.values().all(|t| t.entry.tenant_url() == url) {
                return Ok(false);
            }
            let mut next = row.tasks.clone();
            for task in next.values_mut() {
                task.entry.set_tenant_url(url);
            }
            self.commit(tenant_id, row, next).map(|_| true)
        });
        match changed {
            Some(Ok(true)) => {
                info!(tenant = %tenant_id, url, "updated tenant url");
                Ok(true)
            }
            Some(result) => result,
            None => Ok(false),
        }
    }

    /// Rebuild the catalog from the store. Runs once, before the registry is shared.
    ///
    /// Rows that fail to parse and tasks whose consumer type is unknown are
    /// logged and skipped. Returns the number of restored tasks.
    pub fn restore(&self) -> Result<usize, TaskManagerError> {
        let mut restored = 0;
        for key in self.store.keys()? {
            let Some(raw) = self.store.get(&key)? else {
                continue;
            };
            let tenant: PersistedTenant = match serde_json::from_str(&raw) {
                Ok(tenant) => tenant,
                Err(e) => {
                    error!(tenant = %key, error = %e, "skipping unreadable task row");
                    continue;
                }
            };
            let tenant_id = TenantId::new(key);
            for (name, task) in tenant.tasks {
                match self.internal_register(
                    &name,
                    &tenant_id,
                    &tenant.app_url,
                    &task.consumer_class,
                    task.options,
                ) {
                    Ok(()) => restored += 1,
                    Err(e) => {
                        warn!(tenant = %tenant_id, task = %name, error = %e, "skipping task on restore")
                    }
                }
            }
        }
        info!(count = restored, "restored tasks");
        Ok(restored)
    }

    /// Registration without persistence (restore path).
    fn internal_register(
        &self,
        name: &str,
        tenant_id: &TenantId,
        tenant_url: &str,
        consumer_type: &ConsumerType,
        options: TaskOptions,
    ) -> Result<(), TaskManagerError> {
        let task = self.build_task(name, tenant_id, tenant_url, consumer_type, options)?;
        self.rows.with_row(tenant_id, |row| {
            row.tasks.insert(name.to_string(), task.clone());
        });
        task.consumer.did_register(&task.entry);
        Ok(())
    }

    fn build_task(
        &self,
        name: &str,
        tenant_id: &TenantId,
        tenant_url: &str,
        consumer_type: &ConsumerType,
        options: TaskOptions,
    ) -> Result<RegisteredTask, TaskManagerError> {
        let consumer = self.consumers.create(consumer_type).ok_or_else(|| {
            TaskManagerError::InvalidConsumer {
                task: name.to_string(),
                consumer: consumer_type.clone(),
                reason: "no consumer is registered for this type".to_string(),
            }
        })?;
        let entry = TaskEntry::new(
            name,
            tenant_id.clone(),
            tenant_url,
            consumer_type.clone(),
            options,
        );
        Ok(RegisteredTask { entry, consumer })
    }

    /// Persist `next` and only then make it the tenant's row.
    fn commit(
        &self,
        tenant_id: &TenantId,
        row: &mut TenantTasks,
        next: BTreeMap<String, RegisteredTask>,
    ) -> Result<(), TaskManagerError> {
        self.save_tasks(tenant_id, &next)?;
        row.tasks = next;
        Ok(())
    }

    /// Write-through of one tenant row. Empty rows delete the key.
    fn save_tasks(
        &self,
        tenant_id: &TenantId,
        tasks: &BTreeMap<String, RegisteredTask>,
    ) -> Result<(), TaskManagerError> {
        let Some(app_url) = tasks.values().next().map(|t| t.entry.tenant_url().to_string())
        else {
            self.store.remove(tenant_id.as_str())?;
            return Ok(());
        };
        let persisted = PersistedTenant {
            app_url,
            tasks: tasks
                .iter()
                .map(|(name, task)| {
                    let persisted = PersistedTask {
                        consumer_class: task.entry.consumer_type().clone(),
                        options: task.entry.options().clone(),
                    };
                    (name.clone(), persisted)
                })
                .collect(),
        };
        let raw = serde_json::to_string(&persisted)?;
        self.store.put(tenant_id.as_str(), &raw)?;
        Ok(())
    }
}
