use crate::config::MasterConfig;
use crate::core::{CollectionSchema, MetaError, Result};
use crate::master::{DdRequest, DdResponse, Master, RequestContext};
use crate::msgstream::MsgStream;
use crate::result::{
    BoolResponse, CollectionDescription, IdResponse, PartitionDescription, Status,
    StringListResponse, TsoResponse,
};
use crate::storage::KvStore;
use std::sync::Arc;
use tracing::{Level, event};

/// Request/response surface of the master.
///
/// Every call returns a response carrying a [`Status`]; errors never escape
/// as `Err`. Schema requests go through the scheduler, clock requests are
/// served directly by the allocators.
pub struct MasterService {
    master: Master,
}

impl MasterService {
    pub async fn start(
        config: MasterConfig,
        kv: Arc<dyn KvStore>,
        dd_stream: Arc<dyn MsgStream>,
    ) -> Result<Self> {
        Ok(Self {
            master: Master::start(config, kv, dd_stream).await?,
        })
    }

    pub fn master(&self) -> &Master {
        &self.master
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.master.shutdown().await
    }

    // ========================================================================
    // Collections
    // ========================================================================

    pub async fn create_collection(&self, ctx: &RequestContext, schema: CollectionSchema) -> Status {
        self.run_unit(ctx, DdRequest::CreateCollection { schema }).await
    }

    pub async fn drop_collection(&self, ctx: &RequestContext, collection_name: &str) -> Status {
        self.run_unit(
            ctx,
            DdRequest::DropCollection {
                collection_name: collection_name.to_string(),
            },
        )
        .await
    }

    pub async fn has_collection(&self, ctx: &RequestContext, collection_name: &str) -> BoolResponse {
        self.run_bool(
            ctx,
            DdRequest::HasCollection {
                collection_name: collection_name.to_string(),
            },
        )
        .await
    }

    pub async fn describe_collection(
        &self,
        ctx: &RequestContext,
        collection_name: &str,
    ) -> CollectionDescription {
        let request = DdRequest::DescribeCollection {
            collection_name: collection_name.to_string(),
        };
        match self.master.submit(ctx, request).await {
            Ok(DdResponse::Collection(info)) => CollectionDescription {
                status: Status::success(),
                schema: Some(info.schema),
                id: info.id,
                create_time: info.create_time,
                statistics: info.statistics,
            },
            Ok(other) => CollectionDescription {
                status: unexpected("DescribeCollection", &other),
                ..Default::default()
            },
            Err(err) => CollectionDescription {
                status: Status::from(&err),
                ..Default::default()
            },
        }
    }

    pub async fn show_collections(&self, ctx: &RequestContext) -> StringListResponse {
        self.run_names(ctx, DdRequest::ShowCollections).await
    }

    // ========================================================================
    // Partitions
    // ========================================================================

    pub async fn create_partition(
        &self,
        ctx: &RequestContext,
        collection_name: &str,
        tag: &str,
    ) -> Status {
        self.run_unit(
            ctx,
            DdRequest::CreatePartition {
                collection_name: collection_name.to_string(),
                tag: tag.to_string(),
            },
        )
        .await
    }

    pub async fn drop_partition(&self, ctx: &RequestContext, collection_name: &str, tag: &str) -> Status {
        self.run_unit(
            ctx,
            DdRequest::DropPartition {
                collection_name: collection_name.to_string(),
                tag: tag.to_string(),
            },
        )
        .await
    }

    pub async fn has_partition(
        &self,
        ctx: &RequestContext,
        collection_name: &str,
        tag: &str,
    ) -> BoolResponse {
        self.run_bool(
            ctx,
            DdRequest::HasPartition {
                collection_name: collection_name.to_string(),
                tag: tag.to_string(),
            },
        )
        .await
    }

    pub async fn describe_partition(
        &self,
        ctx: &RequestContext,
        collection_name: &str,
        tag: &str,
    ) -> PartitionDescription {
        let request = DdRequest::DescribePartition {
            collection_name: collection_name.to_string(),
            tag: tag.to_string(),
        };
        match self.master.submit(ctx, request).await {
            Ok(DdResponse::Partition(info)) => PartitionDescription {
                status: Status::success(),
                id: info.id,
                collection_name: info.collection_name,
                tag: info.tag,
                create_time: info.create_time,
                statistics: info.statistics,
            },
            Ok(other) => PartitionDescription {
                status: unexpected("DescribePartition", &other),
                ..Default::default()
            },
            Err(err) => PartitionDescription {
                status: Status::from(&err),
                ..Default::default()
            },
        }
    }

    pub async fn show_partitions(&self, ctx: &RequestContext, collection_name: &str) -> StringListResponse {
        self.run_names(
            ctx,
            DdRequest::ShowPartitions {
                collection_name: collection_name.to_string(),
            },
        )
        .await
    }

    // ========================================================================
    // Clock
    // ========================================================================

    pub async fn alloc_timestamp(&self, ctx: &RequestContext, count: u32) -> TsoResponse {
        if ctx.is_done() {
            return TsoResponse {
                status: Status::from(&MetaError::Canceled("request canceled".to_string())),
                ..Default::default()
            };
        }
        match self.master.alloc_timestamp(count).await {
            Ok(timestamp) => TsoResponse {
                status: Status::success(),
                timestamp,
                count,
            },
            Err(err) => TsoResponse {
                status: Status::from(&err),
                ..Default::default()
            },
        }
    }

    pub async fn alloc_id(&self, ctx: &RequestContext, count: u32) -> IdResponse {
        if ctx.is_done() {
            return IdResponse {
                status: Status::from(&MetaError::Canceled("request canceled".to_string())),
                ..Default::default()
            };
        }
        match self.master.alloc_id(count).await {
            Ok((id, _end)) => IdResponse {
                status: Status::success(),
                id,
                count,
            },
            Err(err) => IdResponse {
                status: Status::from(&err),
                ..Default::default()
            },
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn run_unit(&self, ctx: &RequestContext, request: DdRequest) -> Status {
        let kind = request.kind();
        match self.master.submit(ctx, request).await {
            Ok(DdResponse::Unit) => Status::success(),
            Ok(other) => unexpected(kind, &other),
            Err(err) => {
                event!(Level::DEBUG, kind, error = %err, "ddl request failed");
                Status::from(&err)
            }
        }
    }

    async fn run_bool(&self, ctx: &RequestContext, request: DdRequest) -> BoolResponse {
        let kind = request.kind();
        match self.master.submit(ctx, request).await {
            Ok(DdResponse::Bool(value)) => BoolResponse {
                status: Status::success(),
                value,
            },
            Ok(other) => BoolResponse {
                status: unexpected(kind, &other),
                value: false,
            },
            Err(err) => BoolResponse {
                status: Status::from(&err),
                value: false,
            },
        }
    }

    async fn run_names(&self, ctx: &RequestContext, request: DdRequest) -> StringListResponse {
        let kind = request.kind();
        match self.master.submit(ctx, request).await {
            Ok(DdResponse::Names(mut values)) => {
                values.sort();
                StringListResponse {
                    status: Status::success(),
                    values,
                }
            }
            Ok(other) => StringListResponse {
                status: unexpected(kind, &other),
                values: Vec::new(),
            },
            Err(err) => StringListResponse {
                status: Status::from(&err),
                values: Vec::new(),
            },
        }
    }
}

fn unexpected(kind: &str, response: &DdResponse) -> Status {
    let err = MetaError::Internal(format!("{} produced an unexpected response: {:?}", kind, response));
    event!(Level::ERROR, error = %err, "response mismatch");
    Status::from(&err)
}
