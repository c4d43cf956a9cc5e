//! Per-tenant row locking.
//!
//! Every piece of orchestrator state is keyed by tenant, and operations almost
//! never span tenants. `TenantTable` keeps one `Mutex` per tenant row: the
//! outer map lock is only held long enough to find (or create) the row.
//!
//! An empty row means the same thing as an absent one. Owners `prune` rows
//! once they are empty so tenants that went away do not pile up. A row is
//! only removed while nobody else holds its `Arc`: writers clone the `Arc`
//! under the outer lock, so no writer can end up updating a detached copy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::TenantId;

/// Lock that survives a panicked holder. The state under our locks is plain
/// data, so the last written value is still meaningful.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct TenantTable<T> {
    rows: Mutex<HashMap<TenantId, Arc<Mutex<T>>>>,
}

impl<T: Default> TenantTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }

    fn row(&self, tenant_id: &TenantId) -> Arc<Mutex<T>> {
        let mut rows = lock(&self.rows);
        Arc::clone(rows.entry(tenant_id.clone()).or_default())
    }

    fn existing_row(&self, tenant_id: &TenantId) -> Option<Arc<Mutex<T>>> {
        lock(&self.rows).get(tenant_id).cloned()
    }

    /// Run `f` with the tenant's row locked, creating the row if needed.
    ///
    /// `f` must not call back into the same table (the row lock is not re-entrant).
    pub(crate) fn with_row<R>(&self, tenant_id: &TenantId, f: impl FnOnce(&mut T) -> R) -> R {
        let row = self.row(tenant_id);
        let mut guard = lock(&row);
        f(&mut guard)
    }

    /// Like `with_row`, but never creates a row.
    pub(crate) fn read_row<R>(&self, tenant_id: &TenantId, f: impl FnOnce(&T) -> R) -> Option<R> {
        let row = self.existing_row(tenant_id)?;
        let guard = lock(&row);
        Some(f(&guard))
    }

    /// Like `with_row`, but never creates a row.
    pub(crate) fn update_row<R>(
        &self,
        tenant_id: &TenantId,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        let row = self.existing_row(tenant_id)?;
        let mut guard = lock(&row);
        Some(f(&mut guard))
    }

    /// Drop the tenant's row if `is_empty` holds and no one else is using it.
    pub(crate) fn prune(&self, tenant_id: &TenantId, is_empty: impl FnOnce(&T) -> bool) -> bool {
        let mut rows = lock(&self.rows);
        let removable = match rows.get(tenant_id) {
            Some(row) if Arc::strong_count(row) == 1 => is_empty(&*lock(row)),
            _ => false,
        };
        if removable {
            rows.remove(tenant_id);
        }
        removable
    }

    pub(crate) fn tenants(&self) -> Vec<TenantId> {
        lock(&self.rows).keys().cloned().collect()
    }
}

impl<T: Default> Default for TenantTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_row_does_not_create() {
        let table: TenantTable<Vec<u32>> = TenantTable::new();
        let a = TenantId::new("A");

        assert_eq!(table.read_row(&a, |v| v.len()), None);
        assert!(table.tenants().is_empty());

        table.with_row(&a, |v| v.push(1));
        assert_eq!(table.read_row(&a, |v| v.len()), Some(1));
        assert_eq!(table.tenants(), vec![a]);
    }

    #[test]
    fn rows_are_independent() {
        let table: TenantTable<Vec<u32>> = TenantTable::new();
        let a = TenantId::new("A");
        let b = TenantId::new("B");

        table.with_row(&a, |v| v.push(1));
        table.with_row(&b, |v| v.extend([2, 3]));

        assert_eq!(table.read_row(&a, |v| v.clone()), Some(vec![1]));
        assert_eq!(table.read_row(&b, |v| v.clone()), Some(vec![2, 3]));
    }

    #[test]
    fn prune_removes_only_empty_rows() {
        let table: TenantTable<Vec<u32>> = TenantTable::new();
        let a = TenantId::new("A");
        let b = TenantId::new("B");
        table.with_row(&a, |v| v.push(1));
        table.with_row(&b, |_| {});

        assert!(!table.prune(&a, Vec::is_empty));
        assert!(table.prune(&b, Vec::is_empty));
        assert!(!table.prune(&TenantId::new("nobody"), Vec::is_empty));

        assert_eq!(table.tenants(), vec![a.clone()]);
        table.with_row(&a, Vec::clear);
        assert!(table.prune(&a, Vec::is_empty));
        assert!(table.tenants().is_empty());
    }

    #[test]
    fn prune_skips_row_in_use() {
        let table: TenantTable<Vec<u32>> = TenantTable::new();
        let a = TenantId::new("A");
        table.with_row(&a, |_| {});

        let held = table.row(&a);
        assert!(!table.prune(&a, Vec::is_empty));
        drop(held);
        assert!(table.prune(&a, Vec::is_empty));
    }

    #[test]
    fn concurrent_writers_on_one_row() {
        let table: Arc<TenantTable<u64>> = Arc::new(TenantTable::new());
        let a = TenantId::new("A");

        let joins: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let a = a.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        table.with_row(&a, |n| *n += 1);
                    }
                })
            })
            .collect();
        for j in joins {
            j.join().unwrap();
        }

        assert_eq!(table.read_row(&a, |n| *n), Some(8000));
    }
}
