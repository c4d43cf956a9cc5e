//! taskhost-core
//!
//! Core building blocks of the taskhost background-task orchestrator.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, tenant, task, event, job, errors）
//! - **ports**: 抽象化レイヤー（PersistenceStore, TenantLoader, JobScheduler, TaskConsumer, など）
//! - **app**: アプリケーションロジック（builder, dispatcher, registry, correlator, など）
//! - **impls**: 実装（InMemoryStore, JsonFileStore）
//! - **observability**: tracing subscriber の初期化

pub mod domain;
pub mod ports;
pub mod app;
pub mod impls;
pub mod observability;

#[cfg(test)]
mod testing;

pub use crate::app::{
    BuildError, Dispatch, HandleMode, HandleToken, TaskService, TaskServiceBuilder,
    TaskServiceConfig,
};
pub use crate::domain::{
    ConsumerType, EventId, ExecutionError, ExecutionEvent, JobParameters, TaskEntry,
    TaskManagerError, TaskOptions, TenantId,
};
