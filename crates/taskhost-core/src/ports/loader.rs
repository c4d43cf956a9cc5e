//! TenantLoader port - boots a tenant's runtime from its URL.

use thiserror::Error;

use crate::domain::TaskOptions;

#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// No loader can handle this kind of tenant.
    #[error("loader unavailable: {0}")]
    Unavailable(String),

    /// Host unreachable, bundle failed to evaluate, etc.
    #[error("load failed: {0}")]
    Failed(String),
}

/// Called exactly once when loading finishes, possibly from another thread
/// and possibly before `load_tenant` has returned.
pub type LoadCallback = Box<dyn FnOnce(Result<(), LoaderError>) + Send>;

/// Handle of a (loading or loaded) tenant runtime.
pub trait LoadRecord: Send + Sync {
    /// Tear the tenant runtime down.
    fn invalidate(self: Box<Self>);
}

pub trait TenantLoader: Send + Sync {
    /// Start loading. An `Err` here means loading could not even start.
    fn load_tenant(
        &self,
        url: &str,
        options: &TaskOptions,
        on_complete: LoadCallback,
    ) -> Result<Box<dyn LoadRecord>, LoaderError>;
}
