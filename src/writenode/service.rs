use super::dd_buffer::DdBuffer;
use super::dd_node::{DdMsg, DdNode};
use super::flow_graph::{FlowMsg, Node, NodeConfig};
use super::metrics::DdNodeMetrics;
use crate::config::WriteNodeConfig;
use crate::core::{MetaError, Result};
use crate::msgstream::{MsgPack, MsgStream};
use crate::storage::KvStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

/// Drives a [`DdNode`] from a message stream, one batch at a time.
///
/// Each round waits for one pack, merges whatever else is already buffered
/// (until `max_batch_messages` is reached), runs the node and forwards the
/// resulting [`DdMsg`] downstream.
pub struct DdService {
    node: DdNode,
    stream: Arc<dyn MsgStream>,
    out: mpsc::Sender<DdMsg>,
    max_batch_messages: usize,
}

impl DdService {
    /// Build a service whose buffer is rebuilt from the committed records
    /// in `kv`. Returns the receiving end of the output channel.
    pub async fn start(
        config: &WriteNodeConfig,
        kv: &dyn KvStore,
        stream: Arc<dyn MsgStream>,
    ) -> Result<(Self, mpsc::Receiver<DdMsg>)> {
        config.validate().map_err(MetaError::InvalidArgument)?;
        let buffer = DdBuffer::rebuild(kv).await?;
        let node = DdNode::new(buffer, NodeConfig::from(config));
        Ok(Self::new(node, stream, config))
    }

    pub fn new(
        node: DdNode,
        stream: Arc<dyn MsgStream>,
        config: &WriteNodeConfig,
    ) -> (Self, mpsc::Receiver<DdMsg>) {
        let (out, rx) = mpsc::channel(node.config().max_queue_length.max(1));
        let service = Self {
            node,
            stream,
            out,
            max_batch_messages: config.max_batch_messages.max(1),
        };
        (service, rx)
    }

    pub fn metrics(&self) -> Arc<DdNodeMetrics> {
        self.node.metrics()
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<DdNode>> {
        tokio::spawn(self.run(cancel))
    }

    /// Process batches until `cancel` fires, the stream closes, or the
    /// downstream receiver goes away. Returns the node with its final state.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<DdNode> {
        event!(Level::INFO, node = self.node.name(), "dd service started");

        loop {
            let first = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                pack = self.stream.consume() => match pack? {
                    Some(pack) => pack,
                    None => break,
                },
            };

            let batch = self.fill_batch(first).await?;
            let output = self.node.operate(vec![FlowMsg::MsgStream(batch)]);
            for msg in output {
                let FlowMsg::Dd(dd) = msg else {
                    continue;
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        event!(Level::WARN, "dd service canceled with output undelivered");
                        return Ok(self.node);
                    }
                    sent = self.out.send(dd) => if sent.is_err() {
                        event!(Level::INFO, "dd output receiver dropped");
                        return Ok(self.node);
                    },
                }
            }
        }

        event!(Level::INFO, stats = ?self.node.metrics().snapshot(), "dd service stopped");
        Ok(self.node)
    }

    async fn fill_batch(&self, mut batch: MsgPack) -> Result<MsgPack> {
        while batch.len() < self.max_batch_messages {
            match self.stream.try_consume().await? {
                Some(pack) => batch.extend(pack),
                None => break,
            }
        }
        Ok(batch)
    }
}
