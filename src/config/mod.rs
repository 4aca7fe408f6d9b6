use crate::core::{MetaError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Master (scheduler + clock) configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Maximum number of queued DDL tasks before `enqueue` reports back-pressure
    pub scheduler_queue_capacity: usize,

    /// Tasks running longer than this are logged as slow
    #[serde(with = "duration_millis")]
    pub slow_task_threshold: Duration,

    /// How far ahead (in ms of physical time) the timestamp oracle persists its bound
    pub tso_save_interval_ms: u64,

    /// How many IDs are reserved per high-water-mark write
    pub id_batch_size: u32,

    /// Channel the committed DDL messages are produced to
    pub dd_channel: String,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            scheduler_queue_capacity: 1024,
            slow_task_threshold: Duration::from_millis(5),
            tso_save_interval_ms: 3000,
            id_batch_size: 10_000,
            dd_channel: "dd-channel".to_string(),
        }
    }
}

impl MasterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scheduler queue capacity
    pub fn scheduler_queue_capacity(mut self, capacity: usize) -> Self {
        self.scheduler_queue_capacity = capacity;
        self
    }

    /// Set the slow task threshold
    pub fn slow_task_threshold(mut self, threshold: Duration) -> Self {
        self.slow_task_threshold = threshold;
        self
    }

    /// Set the timestamp save interval
    pub fn tso_save_interval_ms(mut self, interval: u64) -> Self {
        self.tso_save_interval_ms = interval;
        self
    }

    /// Set the ID batch size
    pub fn id_batch_size(mut self, size: u32) -> Self {
        self.id_batch_size = size;
        self
    }

    /// Set the DD channel name
    pub fn dd_channel(mut self, channel: &str) -> Self {
        self.dd_channel = channel.to_string();
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.scheduler_queue_capacity == 0 {
            return Err("scheduler_queue_capacity must be greater than 0".to_string());
        }
        if self.tso_save_interval_ms == 0 {
            return Err("tso_save_interval_ms must be greater than 0".to_string());
        }
        if self.id_batch_size == 0 {
            return Err("id_batch_size must be greater than 0".to_string());
        }
        if self.dd_channel.trim().is_empty() {
            return Err("dd_channel cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Write node (DD flow graph) configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteNodeConfig {
    pub flow_graph_max_queue_length: usize,
    pub flow_graph_max_parallelism: usize,
    /// Upper bound on messages merged into one DD batch
    pub max_batch_messages: usize,
}

impl Default for WriteNodeConfig {
    fn default() -> Self {
        Self {
            flow_graph_max_queue_length: 1024,
            flow_graph_max_parallelism: 1024,
            max_batch_messages: 256,
        }
    }
}

impl WriteNodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_queue_length(mut self, len: usize) -> Self {
        self.flow_graph_max_queue_length = len;
        self
    }

    pub fn max_batch_messages(mut self, max: usize) -> Self {
        self.max_batch_messages = max;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.flow_graph_max_queue_length == 0 {
            return Err("flow_graph_max_queue_length must be greater than 0".to_string());
        }
        if self.flow_graph_max_parallelism == 0 {
            return Err("flow_graph_max_parallelism must be greater than 0".to_string());
        }
        if self.max_batch_messages == 0 {
            return Err("max_batch_messages must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Combined configuration file layout.
///
/// ```json
/// { "master": { "scheduler_queue_capacity": 64 }, "write_node": { "max_batch_messages": 32 } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub master: MasterConfig,
    pub write_node: WriteNodeConfig,
}

impl ControlPlaneConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MetaError::InvalidArgument(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MetaError::InvalidArgument(format!(
                "cannot read config '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.master.validate().map_err(MetaError::InvalidArgument)?;
        self.write_node.validate().map_err(MetaError::InvalidArgument)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
