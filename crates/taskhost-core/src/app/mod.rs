//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて orchestrator のロジックを実装します。
//!
//! # 主要コンポーネント
//! - **TaskServiceBuilder**: TaskService の構築とワイヤリング
//! - **TaskService**: 公開 API（登録・dispatch・OS trigger）
//! - **TaskRegistry**: tenant → task の catalog（永続化付き）
//! - **EventCorrelator**: outstanding event の追跡と idle 判定
//! - **TenantLifecycleManager**: headless tenant のロード・破棄
//! - **TenantHandleTable**: handler への weak 参照
//! - **JobTimeoutGuard**: async job の実行時間上限

pub mod builder;
pub mod config;
pub mod consumers;
pub mod correlator;
pub mod dispatcher;
pub mod handles;
pub mod lifecycle;
pub mod registry;
pub(crate) mod tenant_table;
pub mod timeout_guard;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, TaskServiceBuilder};
pub use self::config::{ConfigError, TaskServiceConfig};
pub use self::consumers::{ConsumerRegistry, RegistryError};
pub use self::correlator::{CompletionCallback, EventCorrelator};
pub use self::dispatcher::{Dispatch, TaskService};
pub use self::handles::{HandleMode, HandleToken, TenantHandleTable};
pub use self::lifecycle::{FailureHook, LoadStatus, TenantLifecycleManager};
pub use self::registry::TaskRegistry;
pub use self::timeout_guard::JobTimeoutGuard;
