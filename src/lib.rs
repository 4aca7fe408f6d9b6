// ============================================================================
// metaplane Library
// ============================================================================
//
// Timestamp-ordered metadata control plane:
//
//   client request -> MasterService -> DdRequestScheduler -> MetaTable
//                                           |
//                                           v
//                          MsgStream (DD channel) -> DdService -> DdNode
//
// ============================================================================

pub mod config;
pub mod core;
pub mod facade;
pub mod master;
pub mod msgstream;
pub mod result;
pub mod storage;
pub mod tso;
pub mod writenode;

// Re-export main types for convenience
pub use config::{ControlPlaneConfig, MasterConfig, WriteNodeConfig};
pub use core::{
    CollectionRecord, CollectionSchema, DataType, ErrorCode, FieldSchema, MetaError,
    PartitionRecord, Result, Timestamp, UniqueId,
};
pub use facade::MasterService;
pub use master::{DdRequest, DdRequestScheduler, DdResponse, Master, RequestContext};
pub use msgstream::{InMemoryMsgStream, MsgPack, MsgStream, TsMsg};
pub use result::{
    BoolResponse, CollectionDescription, IdResponse, PartitionDescription, Status,
    StringListResponse, TsoResponse,
};
pub use storage::{FileKv, KvStore, MemoryKv, MetaTable};
pub use tso::{IdAllocator, TimestampOracle};
pub use writenode::{DdBuffer, DdMsg, DdNode, DdService, MetaOperateRecord};
