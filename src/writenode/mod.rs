//! Write-node side: the DD flow-graph stage and the service driving it.

pub mod dd_buffer;
pub mod dd_node;
pub mod flow_graph;
pub mod metrics;
pub mod service;

pub use dd_buffer::DdBuffer;
pub use dd_node::{DdMsg, DdNode, MetaOperateRecord, TimeRange};
pub use flow_graph::{FlowMsg, Node, NodeConfig};
pub use metrics::{DdNodeMetrics, DdNodeStats};
pub use service::DdService;
