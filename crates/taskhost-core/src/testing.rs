//! Test doubles for the ports.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::app::{ConsumerRegistry, TaskService, TaskServiceBuilder};
use crate::domain::{EventId, ExecutionEvent, JobId, JobParameters, TaskEntry, TaskOptions};
use crate::impls::InMemoryStore;
use crate::ports::{
    JobScheduler, LoadCallback, LoadRecord, LoaderError, PersistenceStore, StoreError,
    TaskConsumer, TenantHandler, TenantLoader,
};

pub(crate) fn options(value: Value) -> TaskOptions {
    match value {
        Value::Object(map) => map,
        other => panic!("options must be a JSON object, got {other}"),
    }
}

// ----------------------------------------------------------------------
// store
// ----------------------------------------------------------------------

/// In-memory store whose writes can be switched to fail.
#[derive(Default)]
pub(crate) struct FailingStore {
    inner: InMemoryStore,
    fail_writes: AtomicBool,
}

impl FailingStore {
    pub(crate) fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Other("disk full".into()));
        }
        Ok(())
    }
}

impl PersistenceStore for FailingStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys()
    }
}

// ----------------------------------------------------------------------
// consumers
// ----------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct RecordingConsumer {
    registered: AtomicUsize,
    unregistered: AtomicUsize,
    options_updates: AtomicUsize,
    cancelled: AtomicUsize,
    async_jobs: AtomicBool,
    dispatch_on_job: AtomicBool,
    executed_jobs: Mutex<Vec<JobId>>,
    broadcasts: Mutex<Vec<Value>>,
}

impl RecordingConsumer {
    pub(crate) fn registered(&self) -> usize {
        self.registered.load(Ordering::SeqCst)
    }

    pub(crate) fn unregistered(&self) -> usize {
        self.unregistered.load(Ordering::SeqCst)
    }

    pub(crate) fn options_updates(&self) -> usize {
        self.options_updates.load(Ordering::SeqCst)
    }

    pub(crate) fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn executed_jobs(&self) -> Vec<JobId> {
        self.executed_jobs.lock().unwrap().clone()
    }

    pub(crate) fn broadcasts(&self) -> Vec<Value> {
        self.broadcasts.lock().unwrap().clone()
    }

    /// Report jobs as still running (`did_execute_job` returns `true`).
    pub(crate) fn set_async_jobs(&self, on: bool) {
        self.async_jobs.store(on, Ordering::SeqCst);
    }

    /// Dispatch an event carrying the job extras from `did_execute_job`.
    pub(crate) fn set_dispatch_on_job(&self, on: bool) {
        self.dispatch_on_job.store(on, Ordering::SeqCst);
    }
}

impl TaskConsumer for RecordingConsumer {
    fn did_register(&self, _task: &TaskEntry) {
        self.registered.fetch_add(1, Ordering::SeqCst);
    }

    fn did_unregister(&self) {
        self.unregistered.fetch_add(1, Ordering::SeqCst);
    }

    fn set_options(&self, _options: &TaskOptions) {
        self.options_updates.fetch_add(1, Ordering::SeqCst);
    }

    fn did_execute_job(&self, service: &TaskService, task: &TaskEntry, params: &JobParameters) -> bool {
        self.executed_jobs.lock().unwrap().push(params.job_id);
        if self.dispatch_on_job.load(Ordering::SeqCst) {
            service
                .execute_task(task, Some(params.extras.clone()), None, None)
                .unwrap();
        }
        self.async_jobs.load(Ordering::SeqCst)
    }

    fn did_cancel_job(&self, _service: &TaskService, _task: &TaskEntry, _params: &JobParameters) -> bool {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        false
    }

    fn did_receive_broadcast(&self, _service: &TaskService, _task: &TaskEntry, payload: &Value) {
        self.broadcasts.lock().unwrap().push(payload.clone());
    }
}

/// Registry with a single "fetch" type whose instances all share one recorder.
pub(crate) fn consumer_registry() -> (Arc<ConsumerRegistry>, Arc<RecordingConsumer>) {
    let recorder = Arc::new(RecordingConsumer::default());
    let mut registry = ConsumerRegistry::new();
    let shared = recorder.clone();
    registry
        .register_fn("fetch".into(), move || shared.clone() as Arc<dyn TaskConsumer>)
        .unwrap();
    (Arc::new(registry), recorder)
}

// ----------------------------------------------------------------------
// handlers
// ----------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct RecordingHandler {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl RecordingHandler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn event_ids(&self) -> Vec<EventId> {
        self.events().iter().map(ExecutionEvent::event_id).collect()
    }
}

impl TenantHandler for RecordingHandler {
    fn execute_with_body(&self, event: &ExecutionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ----------------------------------------------------------------------
// loader
// ----------------------------------------------------------------------

type InvalidateHook = Arc<dyn Fn() + Send + Sync>;

struct FakeRecord {
    invalidations: Arc<AtomicUsize>,
    on_invalidate: Arc<Mutex<Option<InvalidateHook>>>,
}

impl LoadRecord for FakeRecord {
    fn invalidate(self: Box<Self>) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        let hook = self.on_invalidate.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Loader whose completions are driven by the test.
#[derive(Default)]
pub(crate) struct ManualLoader {
    urls: Mutex<Vec<String>>,
    waiting: Mutex<VecDeque<LoadCallback>>,
    refuse: Mutex<Option<LoaderError>>,
    inline: Mutex<Option<Result<(), LoaderError>>>,
    invalidations: Arc<AtomicUsize>,
    on_invalidate: Arc<Mutex<Option<InvalidateHook>>>,
}

impl ManualLoader {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn load_urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    /// The next `load_tenant` returns `Err` without starting.
    pub(crate) fn refuse_next(&self, error: LoaderError) {
        *self.refuse.lock().unwrap() = Some(error);
    }

    /// The next `load_tenant` completes before returning its record.
    pub(crate) fn complete_inline(&self, result: Result<(), LoaderError>) {
        *self.inline.lock().unwrap() = Some(result);
    }

    /// Finish the oldest load still in flight.
    pub(crate) fn complete_next(&self, result: Result<(), LoaderError>) {
        let callback = self
            .waiting
            .lock()
            .unwrap()
            .pop_front()
            .expect("no load in flight");
        callback(result);
    }

    pub(crate) fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Run `hook` inside every record's `invalidate`, like a tenant whose
    /// teardown talks back to the service.
    pub(crate) fn on_invalidate(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_invalidate.lock().unwrap() = Some(Arc::new(hook));
    }
}

impl TenantLoader for ManualLoader {
    fn load_tenant(
        &self,
        url: &str,
        _options: &TaskOptions,
        on_complete: LoadCallback,
    ) -> Result<Box<dyn LoadRecord>, LoaderError> {
        if let Some(error) = self.refuse.lock().unwrap().take() {
            return Err(error);
        }
        self.urls.lock().unwrap().push(url.to_string());

        let inline = self.inline.lock().unwrap().take();
        match inline {
            Some(result) => on_complete(result),
            None => self.waiting.lock().unwrap().push_back(on_complete),
        }
        Ok(Box::new(FakeRecord {
            invalidations: self.invalidations.clone(),
            on_invalidate: self.on_invalidate.clone(),
        }))
    }
}

// ----------------------------------------------------------------------
// scheduler
// ----------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct RecordingScheduler {
    reports: Mutex<Vec<(JobId, bool)>>,
}

impl RecordingScheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reports(&self) -> Vec<(JobId, bool)> {
        self.reports.lock().unwrap().clone()
    }
}

impl JobScheduler for RecordingScheduler {
    fn job_finished(&self, params: &JobParameters, needs_reschedule: bool) {
        self.reports.lock().unwrap().push((params.job_id, needs_reschedule));
    }
}

// ----------------------------------------------------------------------
// wired service
// ----------------------------------------------------------------------

/// A service on the current runtime with default timings and a "fetch" consumer.
pub(crate) struct Fixture {
    pub(crate) service: TaskService,
    pub(crate) store: InMemoryStore,
    pub(crate) loader: Arc<ManualLoader>,
    pub(crate) scheduler: Arc<RecordingScheduler>,
    pub(crate) consumer: Arc<RecordingConsumer>,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let store = InMemoryStore::new();
        let loader = Arc::new(ManualLoader::new());
        let scheduler = Arc::new(RecordingScheduler::new());
        let consumer = Arc::new(RecordingConsumer::default());
        let recorder = consumer.clone();

        let service = TaskServiceBuilder::new()
            .register_consumer("fetch", move || recorder.clone() as Arc<dyn TaskConsumer>)
            .unwrap()
            .store(Arc::new(store.clone()))
            .loader(loader.clone())
            .scheduler(scheduler.clone())
            .build()
            .unwrap();

        Self {
            service,
            store,
            loader,
            scheduler,
            consumer,
        }
    }
}
