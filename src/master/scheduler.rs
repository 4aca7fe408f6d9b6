use super::ddl::TaskEnv;
use super::task::{DdRequest, Task, TaskHandle};
use crate::core::{MetaError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, event, info_span};

/// Serializes every DDL request into one execution order.
///
/// Producers enqueue from any task; a single worker owns the [`TaskEnv`] and
/// runs tasks FIFO, each to completion before the next one starts.
pub struct DdRequestScheduler {
    tx: mpsc::Sender<Task>,
    capacity: usize,
    next_task_id: AtomicU64,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DdRequestScheduler {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(env: TaskEnv, capacity: usize, slow_task_threshold: Duration) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();

        let worker = tokio::spawn(run_worker(env, rx, shutdown.clone(), slow_task_threshold));
        event!(Level::INFO, capacity, "ddl scheduler started");

        Self {
            tx,
            capacity,
            next_task_id: AtomicU64::new(1),
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a request. Never waits: a full queue is reported immediately.
    pub fn enqueue(&self, request: DdRequest) -> Result<TaskHandle> {
        if self.shutdown.is_cancelled() {
            return Err(MetaError::SchedulerClosed);
        }

        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (task, handle) = Task::new(id, request);
        match self.tx.try_send(task) {
            Ok(()) => Ok(handle),
            Err(mpsc::error::TrySendError::Full(task)) => {
                event!(Level::WARN, task_id = task.id(), kind = task.request().kind(), "ddl queue is full");
                Err(MetaError::QueueFull(self.capacity))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(MetaError::SchedulerClosed),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks waiting in the queue
    pub fn queued(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop after the task in flight; everything still queued is notified
    /// with [`MetaError::SchedulerClosed`].
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();

        if let Some(worker) = self.worker.lock().await.take() {
            worker
                .await
                .map_err(|err| MetaError::Internal(format!("ddl scheduler join: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for DdRequestScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_worker(
    mut env: TaskEnv,
    mut rx: mpsc::Receiver<Task>,
    shutdown: CancellationToken,
    slow_task_threshold: Duration,
) {
    loop {
        let mut task = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };
        run_task(&mut env, &mut task, slow_task_threshold).await;
    }

    rx.close();
    let mut rejected = 0usize;
    while let Ok(mut task) = rx.try_recv() {
        task.notify(Err(MetaError::SchedulerClosed));
        rejected += 1;
    }
    event!(Level::INFO, rejected, "ddl scheduler stopped");
}

async fn run_task(env: &mut TaskEnv, task: &mut Task, slow_task_threshold: Duration) {
    let span = info_span!(
        "master.ddl.task",
        task_id = task.id(),
        kind = %task.request().kind()
    );

    async {
        task.mark_running();
        let queued_for = task.enqueued_at().elapsed();
        let started = Instant::now();

        let result = task.request().execute(env).await;
        let elapsed = started.elapsed();

        if elapsed > slow_task_threshold {
            event!(
                Level::WARN,
                elapsed_ms = elapsed.as_millis() as u64,
                queued_ms = queued_for.as_millis() as u64,
                "slow ddl task"
            );
        }
        if let Err(err) = &result {
            event!(Level::DEBUG, error = %err, "ddl task failed");
        }

        if !task.notify(result) {
            event!(Level::DEBUG, "ddl task finished after its waiter left");
        }
    }
    .instrument(span)
    .await;
}
