//! Errors returned by the orchestrator.

use thiserror::Error;

use super::{ConsumerType, TenantId};
use crate::ports::{LoaderError, StoreError};

#[derive(Debug, Error)]
pub enum TaskManagerError {
    #[error("task '{task}' not found for tenant '{tenant}'")]
    TaskNotFound { task: String, tenant: TenantId },

    /// Unregister was asked for a consumer type other than the task's.
    #[error("cannot unregister task '{task}': it is associated with consumer '{actual}', not '{expected}'")]
    ConsumerMismatch {
        task: String,
        expected: ConsumerType,
        actual: ConsumerType,
    },

    /// Unknown consumer type, or a registration that conflicts with the existing one.
    #[error("invalid consumer '{consumer}' for task '{task}': {reason}")]
    InvalidConsumer {
        task: String,
        consumer: ConsumerType,
        reason: String,
    },

    #[error("cannot load tenant '{tenant}': invalid url '{url}'")]
    InvalidLoadParameters { tenant: TenantId, url: String },

    #[error("loader failed for tenant '{tenant}': {source}")]
    LoaderFailure {
        tenant: TenantId,
        #[source]
        source: LoaderError,
    },

    #[error("persistence: {0}")]
    Persistence(#[from] StoreError),

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
}

impl TaskManagerError {
    /// Hard load failures: the tenant cannot be started, so retrying is pointless.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            TaskManagerError::InvalidLoadParameters { .. } | TaskManagerError::LoaderFailure { .. }
        )
    }
}
