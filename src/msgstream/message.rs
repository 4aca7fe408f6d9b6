use crate::core::{Timestamp, UniqueId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgType {
    CreateCollection,
    DropCollection,
    CreatePartition,
    DropPartition,
    TimeTick,
    Insert,
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCollectionMsg {
    pub collection_id: UniqueId,
    /// MessagePack-encoded [`crate::core::CollectionSchema`]
    pub schema: Vec<u8>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropCollectionMsg {
    pub collection_id: UniqueId,
    pub collection_name: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMsg {
    pub collection_id: UniqueId,
    pub collection_name: String,
    pub partition_id: UniqueId,
    pub tag: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertMsg {
    pub collection_name: String,
    pub partition_tag: String,
    pub segment_id: UniqueId,
    pub row_count: u64,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgBody {
    CreateCollection(CreateCollectionMsg),
    DropCollection(DropCollectionMsg),
    CreatePartition(PartitionMsg),
    DropPartition(PartitionMsg),
    TimeTick { timestamp: Timestamp },
    Insert(InsertMsg),
}

impl MsgBody {
    pub fn msg_type(&self) -> MsgType {
        match self {
            MsgBody::CreateCollection(_) => MsgType::CreateCollection,
            MsgBody::DropCollection(_) => MsgType::DropCollection,
            MsgBody::CreatePartition(_) => MsgType::CreatePartition,
            MsgBody::DropPartition(_) => MsgType::DropPartition,
            MsgBody::TimeTick { .. } => MsgType::TimeTick,
            MsgBody::Insert(_) => MsgType::Insert,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            MsgBody::CreateCollection(msg) => msg.timestamp,
            MsgBody::DropCollection(msg) => msg.timestamp,
            MsgBody::CreatePartition(msg) | MsgBody::DropPartition(msg) => msg.timestamp,
            MsgBody::TimeTick { timestamp } => *timestamp,
            MsgBody::Insert(msg) => msg.timestamp,
        }
    }
}

/// Time-stamped envelope travelling through a [`super::MsgStream`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsMsg {
    pub begin_ts: Timestamp,
    pub end_ts: Timestamp,
    /// Producer/channel hashes; ordering holds only among equal hashes
    pub hash_values: Vec<u32>,
    pub body: MsgBody,
}

impl TsMsg {
    /// Envelope whose range collapses onto the body's own timestamp.
    pub fn new(body: MsgBody) -> Self {
        let ts = body.timestamp();
        Self {
            begin_ts: ts,
            end_ts: ts,
            hash_values: vec![0],
            body,
        }
    }

    pub fn with_range(mut self, begin_ts: Timestamp, end_ts: Timestamp) -> Self {
        self.begin_ts = begin_ts;
        self.end_ts = end_ts;
        self
    }

    pub fn with_hash(mut self, hash: u32) -> Self {
        self.hash_values = vec![hash];
        self
    }

    pub fn msg_type(&self) -> MsgType {
        self.body.msg_type()
    }
}

/// A group of messages produced and delivered together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgPack {
    pub msgs: Vec<TsMsg>,
}

impl MsgPack {
    pub fn new(msgs: Vec<TsMsg>) -> Self {
        Self { msgs }
    }

    pub fn single(msg: TsMsg) -> Self {
        Self { msgs: vec![msg] }
    }

    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    /// Smallest `begin_ts` in the pack, 0 when empty
    pub fn timestamp_min(&self) -> Timestamp {
        self.msgs.iter().map(|m| m.begin_ts).min().unwrap_or(0)
    }

    /// Largest `end_ts` in the pack, 0 when empty
    pub fn timestamp_max(&self) -> Timestamp {
        self.msgs.iter().map(|m| m.end_ts).max().unwrap_or(0)
    }

    pub fn extend(&mut self, other: MsgPack) {
        self.msgs.extend(other.msgs);
    }
}
