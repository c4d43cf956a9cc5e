//! TaskServiceBuilder - TaskService の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;

use super::config::TaskServiceConfig;
use super::consumers::{ConsumerRegistry, RegistryError};
use super::correlator::EventCorrelator;
use super::dispatcher::{Shared, TaskService};
use super::handles::TenantHandleTable;
use super::lifecycle::TenantLifecycleManager;
use super::registry::TaskRegistry;
use super::tenant_table::TenantTable;
use super::timeout_guard::JobTimeoutGuard;
use crate::domain::{ConsumerType, TaskManagerError};
use crate::ports::{
    IdGenerator, JobScheduler, PersistenceStore, SystemClock, TaskConsumer, TenantLoader,
    UlidGenerator,
};

/// TaskServiceBuilder は TaskService を構築する
///
/// # 使用例
/// ```ignore
/// let service = TaskServiceBuilder::new()
///     .register_consumer("fetch", || Arc::new(FetchConsumer) as Arc<dyn TaskConsumer>)?
///     .expect_consumers(&["fetch"])
///     .store(Arc::new(JsonFileStore::open("tasks.json")?))
///     .loader(Arc::new(MyLoader))
///     .scheduler(Arc::new(MyScheduler))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - store / loader / scheduler が無ければ BuildError
/// - expect_consumers() の集合が登録済みでなければ BuildError
/// - 永続化された登録は build() 内で restore する
pub struct TaskServiceBuilder {
    consumers: ConsumerRegistry,
    expected_consumers: Option<Vec<ConsumerType>>,
    store: Option<Arc<dyn PersistenceStore>>,
    loader: Option<Arc<dyn TenantLoader>>,
    scheduler: Option<Arc<dyn JobScheduler>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: TaskServiceConfig,
    runtime: Option<Handle>,
}

/// BuildError は TaskService 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing component: {0}")]
    Missing(&'static str),

    #[error("Missing consumer types: {0:?}. These consumers were expected but not registered.")]
    MissingConsumerTypes(Vec<ConsumerType>),

    #[error("No tokio runtime: {0}")]
    Runtime(String),

    #[error("Failed to restore registrations: {0}")]
    Restore(#[source] TaskManagerError),
}

impl TaskServiceBuilder {
    pub fn new() -> Self {
        Self {
            consumers: ConsumerRegistry::new(),
            expected_consumers: None,
            store: None,
            loader: None,
            scheduler: None,
            ids: None,
            config: TaskServiceConfig::default(),
            runtime: None,
        }
    }

    /// Consumer factory を登録
    pub fn register_consumer<F>(
        mut self,
        consumer_type: impl Into<ConsumerType>,
        factory: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn() -> Arc<dyn TaskConsumer> + Send + Sync + 'static,
    {
        self.consumers.register_fn(consumer_type.into(), factory)?;
        Ok(self)
    }

    /// 期待される consumer type のリストを設定
    pub fn expect_consumers(mut self, consumer_types: &[&str]) -> Self {
        self.expected_consumers = Some(consumer_types.iter().map(|&t| ConsumerType::new(t)).collect());
        self
    }

    pub fn store(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn TenantLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn JobScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// 省略時は `UlidGenerator<SystemClock>`
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn config(mut self, config: TaskServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// 省略時は build() を呼んだ runtime
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// TaskService を構築する
    ///
    /// # 検証
    /// - 必須コンポーネントが揃っているか
    /// - expect_consumers() の type が全て登録されているか
    /// - 永続化された登録を restore できるか
    pub fn build(self) -> Result<TaskService, BuildError> {
        if let Some(expected) = &self.expected_consumers {
            let missing: Vec<ConsumerType> = expected
                .iter()
                .filter(|t| !self.consumers.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingConsumerTypes(missing));
            }
        }

        let store = self.store.ok_or(BuildError::Missing("store"))?;
        let loader = self.loader.ok_or(BuildError::Missing("loader"))?;
        let scheduler = self.scheduler.ok_or(BuildError::Missing("scheduler"))?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| BuildError::Runtime(e.to_string()))?,
        };
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock)));
        let config = self.config;

        let registry = Arc::new(TaskRegistry::new(Arc::new(self.consumers), Arc::clone(&store)));
        let restored = registry.restore().map_err(BuildError::Restore)?;

        let handles = Arc::new(TenantHandleTable::new());
        let lifecycle = Arc::new(TenantLifecycleManager::new(
            loader,
            Arc::clone(&handles),
            config.loader_options.clone(),
        ));
        let correlator = EventCorrelator::new(
            ids,
            Arc::clone(&lifecycle),
            runtime.clone(),
            config.idle_grace_period(),
        );
        let guard = JobTimeoutGuard::new(scheduler, config.max_execution_time(), runtime);

        info!(
            restored,
            idle_grace_period_ms = config.idle_grace_period_ms,
            max_execution_time_ms = config.max_execution_time_ms,
            "task service ready"
        );

        Ok(TaskService {
            shared: Arc::new(Shared {
                config,
                store,
                registry,
                correlator,
                handles,
                lifecycle,
                pending: TenantTable::new(),
                guard,
            }),
        })
    }
}

impl Default for TaskServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
