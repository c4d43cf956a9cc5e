use serde::{Deserialize, Serialize};

use super::{ConsumerType, TenantId};

/// Free-form task options, as handed over by the registering tenant.
pub type TaskOptions = serde_json::Map<String, serde_json::Value>;

/// A registered background task.
///
/// Unique key is `(tenant_id, name)`. Only `options` ever changes after
/// creation (compatible re-registration); everything else is fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    name: String,
    tenant_id: TenantId,
    tenant_url: String,
    consumer_type: ConsumerType,
    options: TaskOptions,
}

impl TaskEntry {
    pub fn new(
        name: impl Into<String>,
        tenant_id: TenantId,
        tenant_url: impl Into<String>,
        consumer_type: ConsumerType,
        options: TaskOptions,
    ) -> Self {
        Self {
            name: name.into(),
            tenant_id,
            tenant_url: tenant_url.into(),
            consumer_type,
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn tenant_url(&self) -> &str {
        &self.tenant_url
    }

    pub fn consumer_type(&self) -> &ConsumerType {
        &self.consumer_type
    }

    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    pub(crate) fn set_options(&mut self, options: TaskOptions) {
        self.options = options;
    }

    pub(crate) fn set_tenant_url(&mut self, url: impl Into<String>) {
        self.tenant_url = url.into();
    }
}
