use crate::core::{MetaError, Result, UniqueId};
use crate::storage::{KvStore, load_records};
use std::collections::HashSet;
use tracing::{Level, event};

/// Existence sets for collections and partitions seen by the DD node.
///
/// Every operation either applies fully or leaves both sets untouched.
#[derive(Debug, Default, Clone)]
pub struct DdBuffer {
    collections: HashSet<UniqueId>,
    partitions: HashSet<UniqueId>,
}

impl DdBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repopulate from the records already committed in `kv`.
    pub async fn rebuild(kv: &dyn KvStore) -> Result<Self> {
        let (collections, partitions) = load_records(kv).await?;
        let buffer = Self {
            collections: collections.iter().map(|c| c.id).collect(),
            partitions: partitions.iter().map(|p| p.id).collect(),
        };
        event!(
            Level::INFO,
            collections = buffer.collections.len(),
            partitions = buffer.partitions.len(),
            "dd buffer rebuilt"
        );
        Ok(buffer)
    }

    pub fn add_collection(&mut self, id: UniqueId) -> Result<()> {
        if !self.collections.insert(id) {
            return Err(MetaError::AlreadyExists(format!("collection {}", id)));
        }
        Ok(())
    }

    pub fn remove_collection(&mut self, id: UniqueId) -> Result<()> {
        if !self.collections.remove(&id) {
            return Err(MetaError::NotFound(format!("collection {}", id)));
        }
        Ok(())
    }

    pub fn add_partition(&mut self, id: UniqueId) -> Result<()> {
        if !self.partitions.insert(id) {
            return Err(MetaError::AlreadyExists(format!("partition {}", id)));
        }
        Ok(())
    }

    pub fn remove_partition(&mut self, id: UniqueId) -> Result<()> {
        if !self.partitions.remove(&id) {
            return Err(MetaError::NotFound(format!("partition {}", id)));
        }
        Ok(())
    }

    pub fn has_collection(&self, id: UniqueId) -> bool {
        self.collections.contains(&id)
    }

    pub fn has_partition(&self, id: UniqueId) -> bool {
        self.partitions.contains(&id)
    }

    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_add_fails_unchanged() {
        let mut buffer = DdBuffer::new();
        buffer.add_collection(7).unwrap();
        assert!(matches!(buffer.add_collection(7), Err(MetaError::AlreadyExists(_))));
        assert_eq!(buffer.collection_count(), 1);
        assert!(buffer.has_collection(7));
    }

    #[test]
    fn test_remove_unknown_fails_unchanged() {
        let mut buffer = DdBuffer::new();
        buffer.add_partition(1).unwrap();
        assert!(matches!(buffer.remove_collection(1), Err(MetaError::NotFound(_))));
        assert!(matches!(buffer.remove_partition(2), Err(MetaError::NotFound(_))));
        assert_eq!(buffer.partition_count(), 1);
        assert_eq!(buffer.collection_count(), 0);
    }

    #[test]
    fn test_namespaces_are_independent() {
        let mut buffer = DdBuffer::new();
        buffer.add_collection(1).unwrap();
        buffer.add_partition(1).unwrap();
        buffer.remove_collection(1).unwrap();
        assert!(buffer.has_partition(1));
        assert!(!buffer.has_collection(1));
    }
}
