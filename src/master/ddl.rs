// ============================================================================
// DDL execution
// ============================================================================
//
// Every request runs inside the single scheduler worker, so a
// read-check-write sequence against the meta table is never interleaved
// with another task. Mutations follow the same order:
//
//   allocate ids / commit timestamp -> persist -> emit to the DD stream
//
// If the emit fails, the persisted change is rolled back so the meta table
// never holds a change that downstream nodes will not see.
//
// ============================================================================

use super::task::{CollectionInfo, DdRequest, DdResponse, PartitionInfo};
use crate::core::{
    CollectionRecord, CollectionSchema, MetaError, PartitionRecord, Result, Timestamp,
    validate_name,
};
use crate::msgstream::{
    CreateCollectionMsg, DropCollectionMsg, MsgBody, MsgPack, MsgStream, PartitionMsg, TsMsg,
};
use crate::storage::MetaTable;
use crate::tso::{IdAllocator, TimestampOracle};
use std::sync::Arc;
use tracing::{Level, event};

/// Everything a task needs while it executes. Owned by the scheduler worker.
pub struct TaskEnv {
    pub meta: MetaTable,
    pub tso: Arc<TimestampOracle>,
    pub ids: Arc<IdAllocator>,
    pub dd_stream: Arc<dyn MsgStream>,
}

impl TaskEnv {
    pub fn new(
        meta: MetaTable,
        tso: Arc<TimestampOracle>,
        ids: Arc<IdAllocator>,
        dd_stream: Arc<dyn MsgStream>,
    ) -> Self {
        Self {
            meta,
            tso,
            ids,
            dd_stream,
        }
    }

    async fn emit(&self, bodies: Vec<MsgBody>) -> Result<()> {
        let pack = MsgPack::new(bodies.into_iter().map(TsMsg::new).collect());
        self.dd_stream.produce(pack).await
    }
}

impl DdRequest {
    pub async fn execute(&self, env: &mut TaskEnv) -> Result<DdResponse> {
        match self {
            DdRequest::CreateCollection { schema } => create_collection(env, schema).await,
            DdRequest::DropCollection { collection_name } => {
                drop_collection(env, collection_name).await
            }
            DdRequest::HasCollection { collection_name } => {
                Ok(DdResponse::Bool(env.meta.has_collection(collection_name)))
            }
            DdRequest::DescribeCollection { collection_name } => {
                describe_collection(env, collection_name)
            }
            DdRequest::ShowCollections => Ok(DdResponse::Names(env.meta.collection_names())),
            DdRequest::CreatePartition {
                collection_name,
                tag,
            } => create_partition(env, collection_name, tag).await,
            DdRequest::DropPartition {
                collection_name,
                tag,
            } => drop_partition(env, collection_name, tag).await,
            DdRequest::HasPartition {
                collection_name,
                tag,
            } => Ok(DdResponse::Bool(env.meta.has_partition(collection_name, tag))),
            DdRequest::DescribePartition {
                collection_name,
                tag,
            } => describe_partition(env, collection_name, tag),
            DdRequest::ShowPartitions { collection_name } => {
                Ok(DdResponse::Names(env.meta.partition_tags(collection_name)?))
            }
        }
    }
}

// ============================================================================
// Collections
// ============================================================================

async fn create_collection(env: &mut TaskEnv, schema: &CollectionSchema) -> Result<DdResponse> {
    schema.validate()?;
    if env.meta.has_collection(&schema.name) {
        return Err(MetaError::AlreadyExists(format!("collection '{}'", schema.name)));
    }
    let encoded = schema.encode()?;

    let id = env.ids.alloc_one().await?;
    let ts = env.tso.alloc_one().await?;
    env.meta
        .add_collection(CollectionRecord {
            id,
            schema: schema.clone(),
            create_time: ts,
        })
        .await?;

    let body = MsgBody::CreateCollection(CreateCollectionMsg {
        collection_id: id,
        schema: encoded,
        timestamp: ts,
    });
    if let Err(err) = env.emit(vec![body]).await {
        rollback(env.meta.delete_collection(&schema.name).await.map(|_| ()), &schema.name);
        return Err(err);
    }

    event!(Level::INFO, collection = %schema.name, id, ts, "collection created");
    Ok(DdResponse::Unit)
}

async fn drop_collection(env: &mut TaskEnv, name: &str) -> Result<DdResponse> {
    let id = env.meta.get_collection(name)?.id;
    let ts = env.tso.alloc_one().await?;
    let (record, partitions) = env.meta.delete_collection(name).await?;

    // partition drops precede the collection drop within the pack
    let mut bodies: Vec<MsgBody> = partitions
        .iter()
        .map(|p| MsgBody::DropPartition(partition_msg(p, ts)))
        .collect();
    bodies.push(MsgBody::DropCollection(DropCollectionMsg {
        collection_id: id,
        collection_name: name.to_string(),
        timestamp: ts,
    }));

    if let Err(err) = env.emit(bodies).await {
        rollback(restore_collection(env, record, partitions).await, name);
        return Err(err);
    }

    event!(Level::INFO, collection = %name, id, ts, "collection dropped");
    Ok(DdResponse::Unit)
}

async fn restore_collection(
    env: &mut TaskEnv,
    record: CollectionRecord,
    partitions: Vec<PartitionRecord>,
) -> Result<()> {
    env.meta.add_collection(record).await?;
    for partition in partitions {
        env.meta.add_partition(partition).await?;
    }
    Ok(())
}

fn describe_collection(env: &TaskEnv, name: &str) -> Result<DdResponse> {
    let record = env.meta.get_collection(name)?;
    let statistics = vec![
        ("field_count".to_string(), record.schema.fields.len().to_string()),
        (
            "partition_count".to_string(),
            env.meta.partition_count(record.id).to_string(),
        ),
    ];
    Ok(DdResponse::Collection(CollectionInfo {
        id: record.id,
        schema: record.schema.clone(),
        create_time: record.create_time,
        statistics,
    }))
}

// ============================================================================
// Partitions
// ============================================================================

fn partition_msg(record: &PartitionRecord, ts: Timestamp) -> PartitionMsg {
    PartitionMsg {
        collection_id: record.collection_id,
        collection_name: record.collection_name.clone(),
        partition_id: record.id,
        tag: record.tag.clone(),
        timestamp: ts,
    }
}

async fn create_partition(env: &mut TaskEnv, collection: &str, tag: &str) -> Result<DdResponse> {
    validate_name("collection name", collection)?;
    validate_name("partition tag", tag)?;
    let collection_id = env.meta.get_collection(collection)?.id;
    if env.meta.has_partition(collection, tag) {
        return Err(MetaError::AlreadyExists(format!(
            "partition '{}' of collection '{}'",
            tag, collection
        )));
    }

    let id = env.ids.alloc_one().await?;
    let ts = env.tso.alloc_one().await?;
    let record = PartitionRecord {
        id,
        collection_id,
        collection_name: collection.to_string(),
        tag: tag.to_string(),
        create_time: ts,
    };
    let body = MsgBody::CreatePartition(partition_msg(&record, ts));
    env.meta.add_partition(record).await?;

    if let Err(err) = env.emit(vec![body]).await {
        rollback(env.meta.delete_partition(collection, tag).await.map(|_| ()), tag);
        return Err(err);
    }

    event!(Level::INFO, collection = %collection, tag = %tag, id, ts, "partition created");
    Ok(DdResponse::Unit)
}

async fn drop_partition(env: &mut TaskEnv, collection: &str, tag: &str) -> Result<DdResponse> {
    validate_name("partition tag", tag)?;
    env.meta.get_partition(collection, tag)?;

    let ts = env.tso.alloc_one().await?;
    let record = env.meta.delete_partition(collection, tag).await?;
    let body = MsgBody::DropPartition(partition_msg(&record, ts));

    if let Err(err) = env.emit(vec![body]).await {
        rollback(env.meta.add_partition(record).await, tag);
        return Err(err);
    }

    event!(Level::INFO, collection = %collection, tag = %tag, ts, "partition dropped");
    Ok(DdResponse::Unit)
}

fn describe_partition(env: &TaskEnv, collection: &str, tag: &str) -> Result<DdResponse> {
    let record = env.meta.get_partition(collection, tag)?;
    Ok(DdResponse::Partition(PartitionInfo {
        id: record.id,
        collection_name: record.collection_name.clone(),
        tag: record.tag.clone(),
        create_time: record.create_time,
        statistics: vec![("collection_id".to_string(), record.collection_id.to_string())],
    }))
}

fn rollback(result: Result<()>, entity: &str) {
    match result {
        Ok(()) => event!(Level::WARN, entity = %entity, "emit failed, metadata change rolled back"),
        Err(err) => event!(
            Level::ERROR,
            entity = %entity,
            error = %err,
            "emit failed and rollback failed, metadata diverges from the DD stream"
        ),
    }
}
