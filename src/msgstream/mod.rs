//! Ordered message stream between the master and the write nodes.

pub mod memory;
pub mod message;

pub use memory::InMemoryMsgStream;
pub use message::{
    CreateCollectionMsg, DropCollectionMsg, InsertMsg, MsgBody, MsgPack, MsgType, PartitionMsg,
    TsMsg,
};

use crate::core::Result;
use async_trait::async_trait;

/// Pub/sub channel with ordering guaranteed only per producer.
#[async_trait]
pub trait MsgStream: Send + Sync {
    async fn produce(&self, pack: MsgPack) -> Result<()>;

    /// Wait for the next pack; `None` once the stream is closed and drained.
    async fn consume(&self) -> Result<Option<MsgPack>>;

    /// Next pack if one is already buffered.
    async fn try_consume(&self) -> Result<Option<MsgPack>>;

    fn close(&self);
}
