//! Master side of the control plane: DDL tasks, their scheduler and the
//! clock/ID services they draw from.

pub mod context;
pub mod ddl;
pub mod scheduler;
pub mod task;

pub use context::RequestContext;
pub use ddl::TaskEnv;
pub use scheduler::DdRequestScheduler;
pub use task::{
    CollectionInfo, DdRequest, DdResponse, PartitionInfo, Task, TaskHandle, TaskStatus,
};

use crate::config::MasterConfig;
use crate::core::{MetaError, Result, Timestamp, UniqueId};
use crate::msgstream::MsgStream;
use crate::storage::{KvStore, MetaTable};
use crate::tso::{IdAllocator, TimestampOracle};
use std::sync::Arc;
use tracing::{Level, event};

/// A running master: scheduler worker plus the shared allocators.
pub struct Master {
    config: MasterConfig,
    scheduler: DdRequestScheduler,
    tso: Arc<TimestampOracle>,
    ids: Arc<IdAllocator>,
    kv: Arc<dyn KvStore>,
}

impl Master {
    /// Load committed state from `kv` and start the scheduler worker.
    pub async fn start(
        config: MasterConfig,
        kv: Arc<dyn KvStore>,
        dd_stream: Arc<dyn MsgStream>,
    ) -> Result<Self> {
        config.validate().map_err(MetaError::InvalidArgument)?;

        let meta = MetaTable::load(kv.clone()).await?;
        let tso = Arc::new(TimestampOracle::load(kv.clone(), config.tso_save_interval_ms).await?);
        let ids = Arc::new(IdAllocator::load(kv.clone(), config.id_batch_size).await?);

        event!(
            Level::INFO,
            collections = meta.collection_names().len(),
            dd_channel = %config.dd_channel,
            "master starting"
        );

        let env = TaskEnv::new(meta, tso.clone(), ids.clone(), dd_stream);
        let scheduler = DdRequestScheduler::start(
            env,
            config.scheduler_queue_capacity,
            config.slow_task_threshold,
        );

        Ok(Self {
            config,
            scheduler,
            tso,
            ids,
            kv,
        })
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &DdRequestScheduler {
        &self.scheduler
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Enqueue `request` and wait for its outcome under `ctx`.
    pub async fn submit(&self, ctx: &RequestContext, request: DdRequest) -> Result<DdResponse> {
        let handle = self.scheduler.enqueue(request)?;
        handle.wait_to_finish(ctx).await
    }

    pub async fn alloc_timestamp(&self, count: u32) -> Result<Timestamp> {
        self.tso.alloc(count).await
    }

    pub async fn alloc_id(&self, count: u32) -> Result<(UniqueId, UniqueId)> {
        self.ids.alloc(count).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown().await
    }
}
