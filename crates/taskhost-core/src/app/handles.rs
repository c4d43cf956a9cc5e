//! TenantHandleTable - non-owning references to tenants' live handlers.
//!
//! The tenant's host runtime owns its handler; we only keep a `Weak`. A
//! handler whose owner dropped it resolves exactly like one that was never
//! set. Hosts can also detach explicitly with the token they got back, which
//! is ignored once a newer handler replaced theirs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

use super::tenant_table::TenantTable;
use crate::domain::TenantId;
use crate::ports::TenantHandler;

/// Foreground handlers belong to a tenant the user is interacting with;
/// headless ones were started by us to service background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleMode {
    Foreground,
    Headless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleToken {
    mode: HandleMode,
    generation: u64,
}

impl HandleToken {
    pub fn mode(&self) -> HandleMode {
        self.mode
    }
}

struct Slot {
    handler: Weak<dyn TenantHandler>,
    generation: u64,
}

#[derive(Default)]
struct Handles {
    foreground: Option<Slot>,
    headless: Option<Slot>,
}

impl Handles {
    fn slot(&self, mode: HandleMode) -> &Option<Slot> {
        match mode {
            HandleMode::Foreground => &self.foreground,
            HandleMode::Headless => &self.headless,
        }
    }

    fn is_empty(&self) -> bool {
        self.foreground.is_none() && self.headless.is_none()
    }

    fn slot_mut(&mut self, mode: HandleMode) -> &mut Option<Slot> {
        match mode {
            HandleMode::Foreground => &mut self.foreground,
            HandleMode::Headless => &mut self.headless,
        }
    }
}

pub struct TenantHandleTable {
    rows: TenantTable<Handles>,
    generations: AtomicU64,
}

impl TenantHandleTable {
    pub fn new() -> Self {
        Self {
            rows: TenantTable::new(),
            generations: AtomicU64::new(0),
        }
    }

    /// Replaces any previous handler of the same mode.
    pub fn set_handle(
        &self,
        tenant_id: &TenantId,
        handler: &Arc<dyn TenantHandler>,
        mode: HandleMode,
    ) -> HandleToken {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let slot = Slot {
            handler: Arc::downgrade(handler),
            generation,
        };
        self.rows.with_row(tenant_id, |handles| {
            *handles.slot_mut(mode) = Some(slot);
        });
        debug!(tenant = %tenant_id, ?mode, generation, "attached handler");
        HandleToken { mode, generation }
    }

    /// Foreground handler if alive, else headless handler if alive.
    pub fn resolve(&self, tenant_id: &TenantId) -> Option<Arc<dyn TenantHandler>> {
        self.rows
            .read_row(tenant_id, |handles| {
                let upgrade = |slot: &Option<Slot>| slot.as_ref().and_then(|s| s.handler.upgrade());
                upgrade(&handles.foreground).or_else(|| upgrade(&handles.headless))
            })
            .flatten()
    }

    pub fn resolve_mode(&self, tenant_id: &TenantId, mode: HandleMode) -> Option<Arc<dyn TenantHandler>> {
        self.rows
            .read_row(tenant_id, |handles| {
                handles
                    .slot(mode)
                    .as_ref()
                    .and_then(|s| s.handler.upgrade())
            })
            .flatten()
    }

    /// Returns `false` when the token is stale or was already detached.
    pub fn detach(&self, tenant_id: &TenantId, token: HandleToken) -> bool {
        let detached = self
            .rows
            .update_row(tenant_id, |handles| {
                let slot = handles.slot_mut(token.mode);
                if slot.as_ref().is_some_and(|s| s.generation == token.generation) {
                    *slot = None;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        self.rows.prune(tenant_id, Handles::is_empty);
        detached
    }

    pub fn remove_headless(&self, tenant_id: &TenantId) {
        self.rows.update_row(tenant_id, |handles| handles.headless = None);
        self.rows.prune(tenant_id, Handles::is_empty);
    }

    pub fn is_resident(&self, tenant_id: &TenantId) -> bool {
        self.resolve(tenant_id).is_some()
    }
}

impl Default for TenantHandleTable {
    fn default() -> Self {
        Self::new()
    }
}
