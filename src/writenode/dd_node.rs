// ============================================================================
// DD node
// ============================================================================
//
// Applies one batch of ordered DDL messages to the DD buffer and reports,
// per collection name and per partition tag, the create/drop events that
// were accepted. Messages inside a batch are re-sorted by begin timestamp
// (stable, so equal timestamps keep their produced order) before they are
// applied.
//
// Buffer violations are logged, counted and skipped; they never fail the
// batch.
//
// ============================================================================

use super::dd_buffer::DdBuffer;
use super::flow_graph::{FlowMsg, Node, NodeConfig};
use super::metrics::DdNodeMetrics;
use crate::core::{CollectionSchema, Timestamp};
use crate::msgstream::{MsgBody, MsgPack, TsMsg};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{Level, event, info_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaOperateRecord {
    /// `true` for create, `false` for drop
    pub create_or_drop: bool,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub begin: Timestamp,
    pub end: Timestamp,
}

/// Change-set produced for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdMsg {
    /// collection name -> accepted events, in apply order
    pub collection_records: BTreeMap<String, Vec<MetaOperateRecord>>,
    /// partition tag -> accepted events, in apply order
    pub partition_records: BTreeMap<String, Vec<MetaOperateRecord>>,
    pub time_range: TimeRange,
}

impl DdMsg {
    fn new(time_range: TimeRange) -> Self {
        Self {
            time_range,
            ..Default::default()
        }
    }

    fn push_collection(&mut self, name: String, create_or_drop: bool, timestamp: Timestamp) {
        self.collection_records
            .entry(name)
            .or_default()
            .push(MetaOperateRecord {
                create_or_drop,
                timestamp,
            });
    }

    fn push_partition(&mut self, tag: String, create_or_drop: bool, timestamp: Timestamp) {
        self.partition_records
            .entry(tag)
            .or_default()
            .push(MetaOperateRecord {
                create_or_drop,
                timestamp,
            });
    }

    pub fn is_empty(&self) -> bool {
        self.collection_records.is_empty() && self.partition_records.is_empty()
    }
}

pub struct DdNode {
    buffer: DdBuffer,
    config: NodeConfig,
    metrics: Arc<DdNodeMetrics>,
}

impl DdNode {
    pub fn new(buffer: DdBuffer, config: NodeConfig) -> Self {
        Self {
            buffer,
            config,
            metrics: Arc::new(DdNodeMetrics::new()),
        }
    }

    pub fn buffer(&self) -> &DdBuffer {
        &self.buffer
    }

    pub fn metrics(&self) -> Arc<DdNodeMetrics> {
        self.metrics.clone()
    }

    /// Apply one stream batch and return its change-set.
    pub fn process(&mut self, pack: &MsgPack) -> DdMsg {
        let span = info_span!("writenode.dd.batch", msgs = pack.len());
        let _enter = span.enter();

        let mut out = DdMsg::new(TimeRange {
            begin: pack.timestamp_min(),
            end: pack.timestamp_max(),
        });

        let mut msgs: Vec<&TsMsg> = pack.msgs.iter().collect();
        msgs.sort_by_key(|msg| msg.begin_ts);

        for msg in msgs {
            self.apply(msg, &mut out);
        }

        self.metrics.record_batch();
        event!(
            Level::DEBUG,
            begin = out.time_range.begin,
            end = out.time_range.end,
            collections = out.collection_records.len(),
            partitions = out.partition_records.len(),
            "dd batch applied"
        );
        out
    }

    fn apply(&mut self, msg: &TsMsg, out: &mut DdMsg) {
        match &msg.body {
            MsgBody::CreateCollection(create) => {
                if let Err(err) = self.buffer.add_collection(create.collection_id) {
                    self.violation(msg, &err);
                    return;
                }
                match CollectionSchema::decode(&create.schema) {
                    Ok(schema) => {
                        out.push_collection(schema.name, true, create.timestamp);
                        self.metrics.record_applied();
                    }
                    Err(err) => {
                        self.metrics.record_decode_failure();
                        event!(
                            Level::ERROR,
                            collection_id = create.collection_id,
                            error = %err,
                            "cannot decode collection schema"
                        );
                    }
                }
            }
            MsgBody::DropCollection(drop) => {
                if let Err(err) = self.buffer.remove_collection(drop.collection_id) {
                    self.violation(msg, &err);
                    return;
                }
                out.push_collection(drop.collection_name.clone(), false, drop.timestamp);
                self.metrics.record_applied();
            }
            MsgBody::CreatePartition(create) => {
                if let Err(err) = self.buffer.add_partition(create.partition_id) {
                    self.violation(msg, &err);
                    return;
                }
                out.push_partition(create.tag.clone(), true, create.timestamp);
                self.metrics.record_applied();
            }
            MsgBody::DropPartition(drop) => {
                if let Err(err) = self.buffer.remove_partition(drop.partition_id) {
                    self.violation(msg, &err);
                    return;
                }
                out.push_partition(drop.tag.clone(), false, drop.timestamp);
                self.metrics.record_applied();
            }
            MsgBody::TimeTick { .. } | MsgBody::Insert(_) => {
                self.metrics.record_unsupported();
                event!(Level::DEBUG, msg_type = %msg.msg_type(), "dd node skips message");
            }
        }
    }

    fn violation(&self, msg: &TsMsg, err: &crate::core::MetaError) {
        self.metrics.record_violation();
        event!(
            Level::WARN,
            msg_type = %msg.msg_type(),
            ts = msg.begin_ts,
            error = %err,
            "dd buffer rejected message"
        );
    }
}

impl Node for DdNode {
    fn name(&self) -> &str {
        "ddNode"
    }

    fn config(&self) -> NodeConfig {
        self.config
    }

    fn operate(&mut self, input: Vec<FlowMsg>) -> Vec<FlowMsg> {
        if input.len() != 1 {
            self.metrics.record_invalid_input();
            event!(Level::ERROR, len = input.len(), "dd node expects exactly one input");
            return Vec::new();
        }

        match input.into_iter().next() {
            Some(FlowMsg::MsgStream(pack)) => vec![FlowMsg::Dd(self.process(&pack))],
            Some(other) => {
                self.metrics.record_invalid_input();
                event!(Level::ERROR, kind = other.kind(), "dd node received a non-stream input");
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, FieldSchema};
    use crate::msgstream::{CreateCollectionMsg, DropCollectionMsg, PartitionMsg};

    fn node() -> DdNode {
        DdNode::new(DdBuffer::new(), NodeConfig::default())
    }

    fn partition(body: fn(PartitionMsg) -> MsgBody, id: i64, tag: &str, ts: Timestamp) -> TsMsg {
        TsMsg::new(body(PartitionMsg {
            collection_id: 1,
            collection_name: "docs".into(),
            partition_id: id,
            tag: tag.into(),
            timestamp: ts,
        }))
    }

    fn create_collection(id: i64, name: &str, ts: Timestamp) -> TsMsg {
        let schema = CollectionSchema::new(name, vec![FieldSchema::new("id", DataType::Int64)]);
        TsMsg::new(MsgBody::CreateCollection(CreateCollectionMsg {
            collection_id: id,
            schema: schema.encode().unwrap(),
            timestamp: ts,
        }))
    }

    fn drop_collection(id: i64, name: &str, ts: Timestamp) -> TsMsg {
        TsMsg::new(MsgBody::DropCollection(DropCollectionMsg {
            collection_id: id,
            collection_name: name.into(),
            timestamp: ts,
        }))
    }

    #[test]
    fn test_out_of_order_batch_is_resorted() {
        let mut node = node();
        let pack = MsgPack::new(vec![
            partition(MsgBody::DropPartition, 9, "p", 20),
            partition(MsgBody::CreatePartition, 9, "p", 10),
        ]);

        let out = node.process(&pack);
        assert_eq!(
            out.partition_records["p"],
            vec![
                MetaOperateRecord { create_or_drop: true, timestamp: 10 },
                MetaOperateRecord { create_or_drop: false, timestamp: 20 },
            ]
        );
        assert_eq!(out.time_range, TimeRange { begin: 10, end: 20 });
        assert!(!node.buffer().has_partition(9));
    }

    #[test]
    fn test_independent_collections() {
        let mut node = node();
        node.buffer.add_collection(2).unwrap();
        let pack = MsgPack::new(vec![
            create_collection(1, "docs", 5),
            drop_collection(2, "other", 7),
        ]);

        let out = node.process(&pack);
        assert_eq!(out.collection_records.len(), 2);
        assert_eq!(
            out.collection_records["docs"],
            vec![MetaOperateRecord { create_or_drop: true, timestamp: 5 }]
        );
        assert_eq!(
            out.collection_records["other"],
            vec![MetaOperateRecord { create_or_drop: false, timestamp: 7 }]
        );
    }

    #[test]
    fn test_violations_are_skipped_and_counted() {
        let mut node = node();
        let pack = MsgPack::new(vec![
            create_collection(1, "docs", 5),
            create_collection(1, "docs", 6),
            drop_collection(3, "ghost", 7),
        ]);

        let out = node.process(&pack);
        assert_eq!(out.collection_records["docs"].len(), 1);
        assert!(!out.collection_records.contains_key("ghost"));

        let stats = node.metrics().snapshot();
        assert_eq!(stats.buffer_violations, 2);
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.batches, 1);
    }

    #[test]
    fn test_undecodable_schema() {
        let mut node = node();
        let pack = MsgPack::single(TsMsg::new(MsgBody::CreateCollection(CreateCollectionMsg {
            collection_id: 4,
            schema: vec![0xc1],
            timestamp: 3,
        })));

        let out = node.process(&pack);
        assert!(out.is_empty());
        assert!(node.buffer().has_collection(4));
        assert_eq!(node.metrics().snapshot().decode_failures, 1);
    }

    #[test]
    fn test_empty_batch() {
        let mut node = node();
        let out = node.process(&MsgPack::default());
        assert_eq!(out.time_range, TimeRange::default());
        assert!(out.is_empty());
    }

    #[test]
    fn test_time_ticks_are_skipped() {
        let mut node = node();
        let pack = MsgPack::new(vec![TsMsg::new(MsgBody::TimeTick { timestamp: 42 })]);
        let out = node.process(&pack);
        assert!(out.is_empty());
        assert_eq!(out.time_range, TimeRange { begin: 42, end: 42 });
        assert_eq!(node.metrics().snapshot().unsupported_messages, 1);
    }

    #[test]
    fn test_node_rejects_malformed_input() {
        let mut node = node();
        assert!(node.operate(Vec::new()).is_empty());
        assert!(node
            .operate(vec![FlowMsg::Dd(DdMsg::default())])
            .is_empty());
        assert!(node
            .operate(vec![
                FlowMsg::MsgStream(MsgPack::default()),
                FlowMsg::MsgStream(MsgPack::default()),
            ])
            .is_empty());
        assert_eq!(node.metrics().snapshot().invalid_inputs, 3);

        let out = node.operate(vec![FlowMsg::MsgStream(MsgPack::default())]);
        assert!(matches!(out.as_slice(), [FlowMsg::Dd(_)]));
        assert_eq!(node.name(), "ddNode");
    }
}
