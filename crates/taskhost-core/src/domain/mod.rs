//! Domain model (ids, tenants, task entries, execution events, errors).

pub mod errors;
pub mod event;
pub mod ids;
pub mod job;
pub mod task;
pub mod tenant;

pub use errors::TaskManagerError;
pub use event::{ExecutionError, ExecutionEvent, ExecutionInfo, event_id_from_response};
pub use ids::{EventId, Id, IdMarker, ParseIdError};
pub use job::{JobId, JobParameters};
pub use task::{TaskEntry, TaskOptions};
pub use tenant::{ConsumerType, TenantId};
