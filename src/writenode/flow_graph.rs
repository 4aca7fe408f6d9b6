use super::dd_node::DdMsg;
use crate::config::WriteNodeConfig;
use crate::msgstream::MsgPack;

/// Message passed between flow-graph stages.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowMsg {
    /// One batch as delivered by the message stream
    MsgStream(MsgPack),
    /// Aggregate output of the DD node
    Dd(DdMsg),
}

impl FlowMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowMsg::MsgStream(_) => "MsgStream",
            FlowMsg::Dd(_) => "Dd",
        }
    }
}

/// Queueing limits applied to a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    pub max_queue_length: usize,
    pub max_parallelism: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::from(&WriteNodeConfig::default())
    }
}

impl From<&WriteNodeConfig> for NodeConfig {
    fn from(config: &WriteNodeConfig) -> Self {
        Self {
            max_queue_length: config.flow_graph_max_queue_length,
            max_parallelism: config.flow_graph_max_parallelism,
        }
    }
}

/// A stage of the write-node flow graph.
pub trait Node: Send {
    fn name(&self) -> &str;

    fn config(&self) -> NodeConfig;

    /// Transform one round of input into output. Malformed input yields no
    /// output rather than an error.
    fn operate(&mut self, input: Vec<FlowMsg>) -> Vec<FlowMsg>;
}
