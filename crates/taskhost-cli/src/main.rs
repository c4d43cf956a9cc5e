use std::error::Error;
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::{Value, json};
use tokio::time::{Duration, sleep};
use tracing::info;

use taskhost_core::domain::{ExecutionEvent, JobParameters, TaskEntry, TaskOptions, TenantId};
use taskhost_core::impls::{InMemoryStore, JsonFileStore};
use taskhost_core::ports::{
    JobScheduler, LoadCallback, LoadRecord, LoaderError, PersistenceStore, TaskConsumer,
    TenantHandler, TenantLoader,
};
use taskhost_core::{HandleMode, TaskService, TaskServiceBuilder, TaskServiceConfig, observability};

/// "sync" consumer：job / broadcast をそのまま tenant への event にする
struct SyncConsumer;

impl TaskConsumer for SyncConsumer {
    fn did_execute_job(&self, service: &TaskService, task: &TaskEntry, params: &JobParameters) -> bool {
        if let Err(e) = service.execute_task(task, Some(params.extras.clone()), None, None) {
            println!("dispatch failed: {e}");
        }
        false
    }

    fn did_receive_broadcast(&self, service: &TaskService, task: &TaskEntry, payload: &Value) {
        if let Err(e) = service.execute_task(task, Some(payload.clone()), None, None) {
            println!("dispatch failed: {e}");
        }
    }
}

struct PrintScheduler;

impl JobScheduler for PrintScheduler {
    fn job_finished(&self, params: &JobParameters, needs_reschedule: bool) {
        println!("job finished: id={} reschedule={needs_reschedule}", params.job_id);
    }
}

/// tenant 側の handler：event を表示して少し後に完了を返す
struct DemoHandler {
    tenant_id: TenantId,
    service: TaskService,
}

impl TenantHandler for DemoHandler {
    fn execute_with_body(&self, event: &ExecutionEvent) {
        println!("[{}] execute: {}", self.tenant_id, event.body());
        let service = self.service.clone();
        let tenant_id = self.tenant_id.clone();
        let task_name = event.task_name().to_string();
        let response = json!({ "eventId": event.event_id().to_string(), "result": "newData" });
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            service.notify_task_did_finish(&task_name, &tenant_id, &response);
        });
    }
}

type HandlerSlot = Arc<Mutex<Option<Arc<dyn TenantHandler>>>>;

/// ロードした tenant の handler を所有する
struct DemoRecord {
    url: String,
    handler: HandlerSlot,
}

impl LoadRecord for DemoRecord {
    fn invalidate(self: Box<Self>) {
        if let Ok(mut slot) = self.handler.lock() {
            slot.take();
        }
        println!("tenant at {} torn down", self.url);
    }
}

/// `demo://<tenant>` を 300ms かけて「ロード」し、headless handler を attach する
struct DemoLoader {
    service: Arc<OnceLock<TaskService>>,
}

impl TenantLoader for DemoLoader {
    fn load_tenant(
        &self,
        url: &str,
        _options: &TaskOptions,
        on_complete: LoadCallback,
    ) -> Result<Box<dyn LoadRecord>, LoaderError> {
        let Some(tenant) = url.strip_prefix("demo://") else {
            return Err(LoaderError::Unavailable(format!("unsupported url {url}")));
        };
        let service = self
            .service
            .get()
            .cloned()
            .ok_or_else(|| LoaderError::Unavailable("service not ready".into()))?;

        let tenant_id = TenantId::new(tenant);
        let url = url.to_string();
        let slot: HandlerSlot = Arc::new(Mutex::new(None));
        let record = DemoRecord {
            url: url.clone(),
            handler: slot.clone(),
        };

        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            on_complete(Ok(()));
            let handler: Arc<dyn TenantHandler> = Arc::new(DemoHandler {
                tenant_id: tenant_id.clone(),
                service: service.clone(),
            });
            if let Ok(mut owned) = slot.lock() {
                *owned = Some(handler.clone());
            }
            service.set_handle(&tenant_id, &url, &handler, HandleMode::Headless);
        });
        Ok(Box::new(record))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    observability::init();

    // (A) 設定と store（引数: [config.json] [store.json]）
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => TaskServiceConfig::from_file(path)?,
        None => TaskServiceConfig::default(),
    };
    let store: Arc<dyn PersistenceStore> = match args.next() {
        Some(path) => Arc::new(JsonFileStore::open(path)?),
        None => Arc::new(InMemoryStore::new()),
    };

    // (B) TaskService を構築（永続化された登録はここで restore される）
    let cell = Arc::new(OnceLock::new());
    let service = TaskServiceBuilder::new()
        .register_consumer("sync", || Arc::new(SyncConsumer) as Arc<dyn TaskConsumer>)?
        .expect_consumers(&["sync"])
        .store(store)
        .loader(Arc::new(DemoLoader {
            service: cell.clone(),
        }))
        .scheduler(Arc::new(PrintScheduler))
        .config(config)
        .build()?;
    // loader は build() 中には呼ばれないので、ここで一度だけ渡す
    cell.set(service.clone())
        .map_err(|_| "task service was already handed to the loader")?;

    // (C) タスク登録
    let tenant = TenantId::new("A");
    service.register_task("sync", &tenant, "demo://A", &"sync".into(), TaskOptions::new())?;
    info!(tasks = ?service.tasks_for_tenant(&tenant).keys().collect::<Vec<_>>(), "registered");

    // (D) OS trigger を模擬：tenant は未ロードなので event は queue に積まれる
    service.handle_job(&JobParameters::new(1, tenant.clone(), "sync").with_extras(json!({"n": 1})));
    service.handle_job(&JobParameters::new(2, tenant.clone(), "sync").with_extras(json!({"n": 2})));
    service.handle_broadcast(&tenant, "sync", &json!({"geofence": "home"}));
    println!("pending for {tenant}: {}", service.pending_len(&tenant));

    // (E) ロード → 配送 → 完了 → idle で破棄されるのを待つ
    sleep(Duration::from_millis(300) + service.config().idle_grace_period() + Duration::from_secs(1)).await;
    println!("loaded after idle: {}", service.is_loaded(&tenant));

    service.shutdown()?;
    Ok(())
}
