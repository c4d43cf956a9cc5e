//! TenantHandler port - the tenant-side object that runs events.

use crate::domain::ExecutionEvent;

/// Owned by the tenant's host runtime. The orchestrator only keeps a weak
/// reference to it (see `app::handles`).
pub trait TenantHandler: Send + Sync {
    fn execute_with_body(&self, event: &ExecutionEvent);
}
