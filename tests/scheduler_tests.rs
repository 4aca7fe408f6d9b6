/// Scheduler and facade behaviour under concurrency, cancellation and shutdown
///
/// Run with: cargo test --test scheduler_tests
use async_trait::async_trait;
use futures::future::join_all;
use metaplane::msgstream::MsgBody;
use metaplane::{
    CollectionSchema, DataType, DdRequest, DdResponse, ErrorCode, FieldSchema, InMemoryMsgStream,
    KvStore, MasterConfig, MasterService, MemoryKv, MetaError, MsgStream, RequestContext,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

fn schema(name: &str) -> CollectionSchema {
    CollectionSchema::new(
        name,
        vec![
            FieldSchema::new("id", DataType::Int64).primary_key(),
            FieldSchema::new("embedding", DataType::VectorFloat).with_param("dim", "8"),
        ],
    )
}

/// Memory store whose writes block while stalled.
struct StallingKv {
    inner: MemoryKv,
    stalled: AtomicBool,
    entered: Notify,
    resume: Notify,
}

impl StallingKv {
    fn new() -> Self {
        Self {
            inner: MemoryKv::new(),
            stalled: AtomicBool::new(false),
            entered: Notify::new(),
            resume: Notify::new(),
        }
    }

    fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.stalled.store(false, Ordering::SeqCst);
        self.resume.notify_one();
    }
}

#[async_trait]
impl KvStore for StallingKv {
    async fn get(&self, key: &str) -> metaplane::Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> metaplane::Result<()> {
        if self.stalled.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.resume.notified().await;
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> metaplane::Result<()> {
        self.inner.delete(key).await
    }

    async fn load_with_prefix(&self, prefix: &str) -> metaplane::Result<Vec<(String, Vec<u8>)>> {
        self.inner.load_with_prefix(prefix).await
    }
}

async fn service_with(config: MasterConfig) -> (Arc<MasterService>, Arc<InMemoryMsgStream>) {
    let stream = Arc::new(InMemoryMsgStream::new(config.dd_channel.clone()));
    let service = MasterService::start(config, Arc::new(MemoryKv::new()), stream.clone())
        .await
        .unwrap();
    (Arc::new(service), stream)
}

async fn drain(stream: &InMemoryMsgStream) -> Vec<MsgBody> {
    let mut bodies = Vec::new();
    while let Some(pack) = stream.try_consume().await.unwrap() {
        bodies.extend(pack.msgs.into_iter().map(|m| m.body));
    }
    bodies
}

#[tokio::test]
async fn test_fifo_execution_matches_enqueue_order() {
    let (service, stream) = service_with(MasterConfig::default()).await;
    let scheduler = service.master().scheduler();

    let handles: Vec<_> = (0..20)
        .map(|i| {
            scheduler
                .enqueue(DdRequest::CreateCollection {
                    schema: schema(&format!("c{:02}", i)),
                })
                .unwrap()
        })
        .collect();

    let ctx = RequestContext::new();
    let results = join_all(handles.into_iter().map(|h| h.wait_to_finish(&ctx))).await;
    for result in results {
        assert_eq!(assert_ok!(result), DdResponse::Unit);
    }

    let bodies = drain(&stream).await;
    assert_eq!(bodies.len(), 20);
    let mut last_ts = 0;
    for (i, body) in bodies.iter().enumerate() {
        let MsgBody::CreateCollection(msg) = body else {
            panic!("unexpected message {:?}", body);
        };
        let decoded = CollectionSchema::decode(&msg.schema).unwrap();
        assert_eq!(decoded.name, format!("c{:02}", i));
        assert!(msg.timestamp > last_ts, "commit timestamps must follow queue order");
        last_ts = msg.timestamp;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueue_notifies_each_task_once() {
    let (service, stream) = service_with(MasterConfig::default()).await;

    let mut tasks = Vec::new();
    for producer in 0..8 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            let ctx = RequestContext::new();
            let mut statuses = Vec::new();
            for i in 0..25 {
                let name = format!("p{}_c{}", producer, i);
                statuses.push(service.create_collection(&ctx, schema(&name)).await);
            }
            statuses
        }));
    }

    let mut succeeded = 0;
    for task in join_all(tasks).await {
        for status in task.unwrap() {
            assert!(status.is_success(), "{:?}", status);
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 200);

    let shown = service.show_collections(&RequestContext::new()).await;
    assert_eq!(shown.values.len(), 200);

    let bodies = drain(&stream).await;
    assert_eq!(bodies.len(), 200);
    let timestamps: Vec<u64> = bodies.iter().map(|b| b.timestamp()).collect();
    assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_queue_full_is_retryable() {
    let (service, _stream) = service_with(MasterConfig::new().scheduler_queue_capacity(2)).await;
    let scheduler = service.master().scheduler();

    // the worker has not been polled yet on this single-threaded runtime
    let first = assert_ok!(scheduler.enqueue(DdRequest::ShowCollections));
    let second = assert_ok!(scheduler.enqueue(DdRequest::ShowCollections));
    let err = assert_err!(scheduler.enqueue(DdRequest::ShowCollections));
    assert_eq!(err, MetaError::QueueFull(2));
    assert_eq!(err.code(), ErrorCode::Unavailable);
    assert!(err.is_retryable());

    let ctx = RequestContext::new();
    assert_ok!(first.wait_to_finish(&ctx).await);
    assert_ok!(second.wait_to_finish(&ctx).await);
    assert_ok!(scheduler.enqueue(DdRequest::ShowCollections));
}

#[tokio::test]
async fn test_shutdown_notifies_queued_tasks() {
    let (service, _stream) = service_with(MasterConfig::default()).await;
    let scheduler = service.master().scheduler();

    let queued: Vec<_> = (0..3)
        .map(|i| {
            scheduler
                .enqueue(DdRequest::CreateCollection {
                    schema: schema(&format!("late{}", i)),
                })
                .unwrap()
        })
        .collect();

    service.shutdown().await.unwrap();

    let ctx = RequestContext::new();
    for handle in queued {
        assert_eq!(handle.wait_to_finish(&ctx).await, Err(MetaError::SchedulerClosed));
    }

    let status = service.create_collection(&ctx, schema("after")).await;
    assert_eq!(status.error_code, ErrorCode::Unavailable);
    assert!(status.is_retryable());
}

#[tokio::test]
async fn test_canceled_wait_still_commits() {
    let (service, stream) = service_with(MasterConfig::default()).await;

    let ctx = RequestContext::new();
    ctx.cancel();
    let status = service.create_collection(&ctx, schema("docs")).await;
    assert_eq!(status.error_code, ErrorCode::Canceled);

    let fresh = RequestContext::new();
    assert!(service.has_collection(&fresh, "docs").await.value);
    assert_eq!(drain(&stream).await.len(), 1);
}

#[tokio::test]
async fn test_deadline_exceeded_while_queued() {
    let kv = Arc::new(StallingKv::new());
    let service = MasterService::start(
        MasterConfig::default(),
        kv.clone(),
        Arc::new(InMemoryMsgStream::new("dd-channel")),
    )
    .await
    .unwrap();
    let service = Arc::new(service);

    // park the worker inside a store write
    kv.stall();
    let blocked = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .create_collection(&RequestContext::new(), schema("docs"))
                .await
        })
    };
    kv.entered.notified().await;

    let ctx = RequestContext::with_timeout(Duration::from_millis(20));
    let response = service.describe_collection(&ctx, "docs").await;
    assert_eq!(response.status.error_code, ErrorCode::Canceled);

    kv.release();
    assert!(blocked.await.unwrap().is_success());
    let fresh = RequestContext::new();
    assert!(service.describe_collection(&fresh, "docs").await.status.is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_has_observes_create_all_or_nothing() {
    let (service, stream) = service_with(MasterConfig::default()).await;

    // with the DD stream down the create is rolled back inside its task,
    // so no concurrent reader may ever see the collection
    stream.set_available(false);
    let creator = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .create_collection(&RequestContext::new(), schema("docs"))
                .await
        })
    };
    let readers: Vec<_> = (0..16)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .has_collection(&RequestContext::new(), "docs")
                    .await
                    .value
            })
        })
        .collect();

    let status = creator.await.unwrap();
    assert_eq!(status.error_code, ErrorCode::Unavailable);
    for seen in join_all(readers).await {
        assert!(!seen.unwrap());
    }

    stream.set_available(true);
    let ctx = RequestContext::new();
    assert!(service.create_collection(&ctx, schema("docs")).await.is_success());
    assert!(service.has_collection(&ctx, "docs").await.value);
}

#[tokio::test]
async fn test_edge_case_statuses() {
    let (service, _stream) = service_with(MasterConfig::default()).await;
    let ctx = RequestContext::new();

    assert!(service.create_collection(&ctx, schema("docs")).await.is_success());
    assert_eq!(
        service.create_collection(&ctx, schema("docs")).await.error_code,
        ErrorCode::AlreadyExists
    );
    assert_eq!(
        service.drop_collection(&ctx, "nope").await.error_code,
        ErrorCode::NotFound
    );
    assert_eq!(
        service.describe_collection(&ctx, "nope").await.status.error_code,
        ErrorCode::NotFound
    );
    assert_eq!(
        service.create_partition(&ctx, "docs", "").await.error_code,
        ErrorCode::InvalidArgument
    );
    assert_eq!(
        service.show_partitions(&ctx, "nope").await.status.error_code,
        ErrorCode::NotFound
    );
    assert!(!service.has_partition(&ctx, "nope", "p").await.value);
}

#[tokio::test]
async fn test_drop_collection_removes_partitions() {
    let (service, stream) = service_with(MasterConfig::default()).await;
    let ctx = RequestContext::new();

    service.create_collection(&ctx, schema("docs")).await;
    service.create_partition(&ctx, "docs", "a").await;
    service.create_partition(&ctx, "docs", "b").await;
    assert!(service.drop_collection(&ctx, "docs").await.is_success());

    // a re-created collection starts without partitions
    service.create_collection(&ctx, schema("docs")).await;
    assert!(service.show_partitions(&ctx, "docs").await.values.is_empty());

    let drops = drain(&stream)
        .await
        .into_iter()
        .filter(|b| matches!(b, MsgBody::DropPartition(_)))
        .count();
    assert_eq!(drops, 2);
}
