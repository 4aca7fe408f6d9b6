pub mod catalog;
pub mod engine;
pub mod memory;
pub mod persistence;

pub use catalog::{MetaTable, collection_key, load_records, partition_key};
pub use engine::KvStore;
pub use memory::MemoryKv;
pub use persistence::FileKv;
