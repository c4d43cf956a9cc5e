//! Ports - 抽象化レイヤー
//!
//! Every external collaborator of the orchestrator is a trait here: the OS
//! job scheduler, the durable key/value store, the tenant loader, the
//! per-task-type consumers and the tenant-side handler.

pub mod clock;
pub mod consumer;
pub mod handler;
pub mod id_generator;
pub mod loader;
pub mod persistence;
pub mod scheduler;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::consumer::{ConsumerFactory, TaskConsumer};
pub use self::handler::TenantHandler;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::loader::{LoadCallback, LoadRecord, LoaderError, TenantLoader};
pub use self::persistence::{PersistenceStore, StoreError};
pub use self::scheduler::JobScheduler;
