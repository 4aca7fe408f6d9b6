pub mod error;
pub mod types;

pub use error::{ErrorCode, MetaError, Result};
pub use types::{
    CollectionRecord, CollectionSchema, DataType, FieldSchema, PartitionRecord, Timestamp,
    UniqueId, validate_name,
};
