use super::context::RequestContext;
use crate::core::{CollectionSchema, MetaError, Result, Timestamp, UniqueId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::oneshot;
use tokio::time::Instant;

// ============================================================================
// Requests / Responses
// ============================================================================

/// One schema-level request, as understood by the scheduler worker.
#[derive(Debug, Clone, PartialEq)]
pub enum DdRequest {
    CreateCollection { schema: CollectionSchema },
    DropCollection { collection_name: String },
    HasCollection { collection_name: String },
    DescribeCollection { collection_name: String },
    ShowCollections,
    CreatePartition { collection_name: String, tag: String },
    DropPartition { collection_name: String, tag: String },
    HasPartition { collection_name: String, tag: String },
    DescribePartition { collection_name: String, tag: String },
    ShowPartitions { collection_name: String },
}

impl DdRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            DdRequest::CreateCollection { .. } => "CreateCollection",
            DdRequest::DropCollection { .. } => "DropCollection",
            DdRequest::HasCollection { .. } => "HasCollection",
            DdRequest::DescribeCollection { .. } => "DescribeCollection",
            DdRequest::ShowCollections => "ShowCollections",
            DdRequest::CreatePartition { .. } => "CreatePartition",
            DdRequest::DropPartition { .. } => "DropPartition",
            DdRequest::HasPartition { .. } => "HasPartition",
            DdRequest::DescribePartition { .. } => "DescribePartition",
            DdRequest::ShowPartitions { .. } => "ShowPartitions",
        }
    }

    /// Whether executing the request changes committed metadata.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            DdRequest::CreateCollection { .. }
                | DdRequest::DropCollection { .. }
                | DdRequest::CreatePartition { .. }
                | DdRequest::DropPartition { .. }
        )
    }
}

impl fmt::Display for DdRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub id: UniqueId,
    pub schema: CollectionSchema,
    pub create_time: Timestamp,
    pub statistics: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionInfo {
    pub id: UniqueId,
    pub collection_name: String,
    pub tag: String,
    pub create_time: Timestamp,
    pub statistics: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DdResponse {
    Unit,
    Bool(bool),
    Collection(CollectionInfo),
    Partition(PartitionInfo),
    Names(Vec<String>),
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    Pending = 0,
    Running = 1,
    Done = 2,
    Errored = 3,
}

impl TaskStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskStatus::Pending,
            1 => TaskStatus::Running,
            2 => TaskStatus::Done,
            _ => TaskStatus::Errored,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Errored)
    }
}

/// Status shared between a task and its handle.
#[derive(Debug, Clone)]
struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(TaskStatus::Pending as u8)))
    }

    fn get(&self) -> TaskStatus {
        TaskStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, status: TaskStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

// ============================================================================
// Task
// ============================================================================

/// A request owned by the scheduler from enqueue until notification.
pub struct Task {
    id: u64,
    request: DdRequest,
    status: StatusCell,
    done: Option<oneshot::Sender<Result<DdResponse>>>,
    enqueued_at: Instant,
}

impl Task {
    /// Create a task together with the handle its caller waits on.
    pub fn new(id: u64, request: DdRequest) -> (Task, TaskHandle) {
        let (tx, rx) = oneshot::channel();
        let status = StatusCell::new();
        let task = Task {
            id,
            request,
            status: status.clone(),
            done: Some(tx),
            enqueued_at: Instant::now(),
        };
        let handle = TaskHandle { id, status, rx };
        (task, handle)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn request(&self) -> &DdRequest {
        &self.request
    }

    pub fn status(&self) -> TaskStatus {
        self.status.get()
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub(crate) fn mark_running(&self) {
        self.status.set(TaskStatus::Running);
    }

    /// Deliver the outcome to the waiter. Only the first call has an effect;
    /// returns whether a waiter was still listening.
    pub fn notify(&mut self, result: Result<DdResponse>) -> bool {
        let Some(tx) = self.done.take() else {
            return false;
        };
        self.status.set(if result.is_ok() {
            TaskStatus::Done
        } else {
            TaskStatus::Errored
        });
        tx.send(result).is_ok()
    }

    pub fn is_notified(&self) -> bool {
        self.done.is_none()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("request", &self.request.kind())
            .field("status", &self.status.get())
            .finish()
    }
}

/// Caller side of a task: awaits the completion signal.
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    status: StatusCell,
    rx: oneshot::Receiver<Result<DdResponse>>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.status.get()
    }

    /// Wait for the task result, or give up when `ctx` is canceled or
    /// expires. Giving up does not stop the task.
    pub async fn wait_to_finish(mut self, ctx: &RequestContext) -> Result<DdResponse> {
        tokio::select! {
            biased;
            outcome = &mut self.rx => match outcome {
                Ok(result) => result,
                Err(_) => Err(MetaError::SchedulerClosed),
            },
            err = ctx.done() => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_notify_fires_once() {
        let (mut task, handle) = Task::new(1, DdRequest::ShowCollections);
        assert_eq!(handle.status(), TaskStatus::Pending);

        assert!(task.notify(Ok(DdResponse::Bool(true))));
        assert!(!task.notify(Ok(DdResponse::Bool(false))));
        assert!(task.is_notified());
        assert_eq!(handle.status(), TaskStatus::Done);

        let result = handle.wait_to_finish(&RequestContext::new()).await;
        assert_eq!(result.unwrap(), DdResponse::Bool(true));
    }

    #[tokio::test]
    async fn test_error_sets_errored() {
        let (mut task, handle) = Task::new(2, DdRequest::ShowCollections);
        task.notify(Err(MetaError::NotFound("collection 'x'".into())));
        assert_eq!(handle.status(), TaskStatus::Errored);
        assert!(matches!(
            handle.wait_to_finish(&RequestContext::new()).await,
            Err(MetaError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_gives_up_on_deadline() {
        let (task, handle) = Task::new(3, DdRequest::ShowCollections);
        let ctx = RequestContext::with_timeout(Duration::from_millis(10));
        let result = handle.wait_to_finish(&ctx).await;
        assert!(matches!(result, Err(MetaError::Canceled(_))));
        assert_eq!(task.status(), TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_dropped_task_reports_closed() {
        let (task, handle) = Task::new(4, DdRequest::ShowCollections);
        drop(task);
        assert_eq!(
            handle.wait_to_finish(&RequestContext::new()).await,
            Err(MetaError::SchedulerClosed)
        );
    }

    #[test]
    fn test_request_kind() {
        let req = DdRequest::DropPartition {
            collection_name: "docs".into(),
            tag: "p".into(),
        };
        assert_eq!(req.to_string(), "DropPartition");
        assert!(req.is_mutation());
        assert!(!DdRequest::ShowCollections.is_mutation());
    }
}
