use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::critical_section::CriticalSectionCounter;

/// One worker's observable state, updated under `status_mutex` as the spec
/// names it — here a plain `Mutex<WorkerStatus>` shared via [`StatusHandle`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStatus {
    pub running: bool,
    pub paused: bool,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub current_item: Option<String>,
    pub spend: f64,
}

/// Handle a running job uses to report progress into its [`WorkerStatus`].
#[derive(Clone)]
pub struct StatusHandle(Arc<Mutex<WorkerStatus>>);

impl StatusHandle {
    pub fn set_current_item(&self, item: Option<String>) {
        self.0.lock().expect("status poisoned").current_item = item;
    }

    pub fn record_attempt(&self) {
        self.0.lock().expect("status poisoned").total += 1;
    }

    pub fn record_completed(&self) {
        self.0.lock().expect("status poisoned").completed += 1;
    }

    pub fn record_failed(&self) {
        self.0.lock().expect("status poisoned").failed += 1;
    }

    pub fn add_spend(&self, spend: f64) {
        self.0.lock().expect("status poisoned").spend += spend;
    }
}

/// The extension point for a supervised worker: one unit of polling/work per
/// invocation. Implementations MUST check `shutdown.is_cancelled()` at safe
/// points and abandon (not mark-completed) any item in flight when it fires.
#[async_trait]
pub trait WorkerJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_once(
        &self,
        status: &StatusHandle,
        critical: &Arc<CriticalSectionCounter>,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<()>;
}

const SLEEP_CHUNKS: usize = 15;
const SLEEP_CHUNK: Duration = Duration::from_millis(200);

async fn sleep_chunked_with_escape(shutdown: &CancellationToken, paused: &AtomicBool) {
    for _ in 0..SLEEP_CHUNKS {
        if shutdown.is_cancelled() || paused.load(Ordering::SeqCst) {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(SLEEP_CHUNK) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}

/// A pausable, resumable, shutdown-aware background task running one
/// [`WorkerJob`] in a loop.
pub struct PausableTask {
    name: String,
    paused: Arc<AtomicBool>,
    notify: Arc<Notify>,
    shutdown: Mutex<CancellationToken>,
    status: Arc<Mutex<WorkerStatus>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PausableTask {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            paused: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            shutdown: Mutex::new(CancellationToken::new()),
            status: Arc::new(Mutex::new(WorkerStatus::default())),
            handle: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.lock().expect("status poisoned").clone()
    }

    pub fn is_running(&self) -> bool {
        self.status().running
    }

    /// No-op returning `false` if already running.
    pub fn start(self: &Arc<Self>, job: Arc<dyn WorkerJob>, critical: Arc<CriticalSectionCounter>) -> bool {
        if self.is_running() {
            return false;
        }
        let shutdown = CancellationToken::new();
        *self.shutdown.lock().expect("shutdown poisoned") = shutdown.clone();
        self.status.lock().expect("status poisoned").running = true;

        let paused = Arc::clone(&self.paused);
        let notify = Arc::clone(&self.notify);
        let status = Arc::clone(&self.status);
        let handle = tokio::spawn(async move {
            loop {
                if shutdown.is_cancelled() {
                    break;
                }
                if paused.load(Ordering::SeqCst) {
                    tokio::select! {
                        _ = notify.notified() => {}
                        _ = shutdown.cancelled() => break,
                    }
                    continue;
                }
                let status_handle = StatusHandle(Arc::clone(&status));
                if let Err(e) = job.run_once(&status_handle, &critical, &shutdown).await {
                    tracing::warn!(worker = job.name(), error = %e, "worker job iteration failed");
                }
                sleep_chunked_with_escape(&shutdown, &paused).await;
            }
            status.lock().expect("status poisoned").running = false;
        });
        *self.handle.lock().expect("handle poisoned") = Some(handle);
        true
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.status.lock().expect("status poisoned").paused = true;
        self.notify.notify_waiters();
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.status.lock().expect("status poisoned").paused = false;
        self.notify.notify_waiters();
    }

    /// Polling wait; returns `false` on timeout. Requires the task to be running.
    pub async fn wait_until_paused(&self, timeout: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.status().paused {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Requests shutdown. No-op returning `false` if not running.
    pub fn stop(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.shutdown.lock().expect("shutdown poisoned").cancel();
        true
    }
}

/// Owns the closed set of supervised workers and the shared critical-section
/// counter shutdown waits on.
pub struct Supervisor {
    tasks: Mutex<HashMap<String, Arc<PausableTask>>>,
    critical: Arc<CriticalSectionCounter>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            critical: CriticalSectionCounter::new(),
        }
    }

    pub fn critical_section(&self) -> Arc<CriticalSectionCounter> {
        Arc::clone(&self.critical)
    }

    pub fn register(&self, name: &str) -> Arc<PausableTask> {
        let task = PausableTask::new(name);
        self.tasks
            .lock()
            .expect("tasks poisoned")
            .insert(name.to_string(), Arc::clone(&task));
        task
    }

    pub fn get(&self, name: &str) -> Option<Arc<PausableTask>> {
        self.tasks.lock().expect("tasks poisoned").get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tasks.lock().expect("tasks poisoned").keys().cloned().collect()
    }

    pub fn pause_all(&self) {
        for task in self.tasks.lock().expect("tasks poisoned").values() {
            task.pause();
        }
    }

    pub fn resume_all(&self) {
        for task in self.tasks.lock().expect("tasks poisoned").values() {
            task.resume();
        }
    }

    pub async fn wait_until_all_paused(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let tasks: Vec<_> = self.tasks.lock().expect("tasks poisoned").values().cloned().collect();
        for task in tasks {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if !task.wait_until_paused(remaining).await {
                return false;
            }
        }
        true
    }

    /// Request shutdown of every worker, then wait up to `timeout` for all
    /// in-flight critical sections to drain.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        for task in self.tasks.lock().expect("tasks poisoned").values() {
            task.stop();
        }
        self.critical.wait_for_drain(timeout).await
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
