use super::KvStore;
use crate::core::{CollectionRecord, MetaError, PartitionRecord, Result, UniqueId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{Level, event};

pub const COLLECTION_PREFIX: &str = "collection/";
pub const PARTITION_PREFIX: &str = "partition/";

pub fn collection_key(id: UniqueId) -> String {
    format!("{}{}", COLLECTION_PREFIX, id)
}

pub fn partition_key(collection_id: UniqueId, partition_id: UniqueId) -> String {
    format!("{}{}/{}", PARTITION_PREFIX, collection_id, partition_id)
}

/// Typed view of collection and partition records over a [`KvStore`].
///
/// Writes go to the store first and only then to the in-memory index, so a
/// failed write leaves the index untouched. The table has exactly one writer
/// (the scheduler worker owns it), hence no internal locking.
pub struct MetaTable {
    kv: Arc<dyn KvStore>,
    /// collection name -> record
    collections: HashMap<String, CollectionRecord>,
    /// collection id -> tag -> record
    partitions: HashMap<UniqueId, BTreeMap<String, PartitionRecord>>,
}

impl MetaTable {
    /// Build the index from whatever is already committed in `kv`.
    pub async fn load(kv: Arc<dyn KvStore>) -> Result<Self> {
        let (collection_records, partition_records) = load_records(kv.as_ref()).await?;

        let mut collections = HashMap::new();
        let mut partitions: HashMap<UniqueId, BTreeMap<String, PartitionRecord>> = HashMap::new();
        for record in collection_records {
            partitions.entry(record.id).or_default();
            collections.insert(record.name().to_string(), record);
        }
        for record in partition_records {
            partitions
                .entry(record.collection_id)
                .or_default()
                .insert(record.tag.clone(), record);
        }

        Ok(Self {
            kv,
            collections,
            partitions,
        })
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn get_collection(&self, name: &str) -> Result<&CollectionRecord> {
        self.collections
            .get(name)
            .ok_or_else(|| MetaError::NotFound(format!("collection '{}'", name)))
    }

    /// Collection names in lexical order
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn add_collection(&mut self, record: CollectionRecord) -> Result<()> {
        if self.collections.contains_key(record.name()) {
            return Err(MetaError::AlreadyExists(format!("collection '{}'", record.name())));
        }

        let value = rmp_serde::to_vec(&record)?;
        self.kv.set(&collection_key(record.id), value).await?;

        self.partitions.entry(record.id).or_default();
        self.collections.insert(record.name().to_string(), record);
        Ok(())
    }

    /// Remove a collection together with all of its partitions.
    ///
    /// On a store error the partition keys already deleted are written back,
    /// so the store and the index still agree when the error is returned.
    pub async fn delete_collection(
        &mut self,
        name: &str,
    ) -> Result<(CollectionRecord, Vec<PartitionRecord>)> {
        let id = self.get_collection(name)?.id;

        let records: Vec<PartitionRecord> = self
            .partitions
            .get(&id)
            .map(|tags| tags.values().cloned().collect())
            .unwrap_or_default();
        let mut deleted = 0;
        let mut outcome = Ok(());
        for record in &records {
            outcome = self.kv.delete(&partition_key(id, record.id)).await;
            if outcome.is_err() {
                break;
            }
            deleted += 1;
        }
        if outcome.is_ok() {
            outcome = self.kv.delete(&collection_key(id)).await;
        }
        if let Err(err) = outcome {
            self.restore_partitions(&records[..deleted]).await;
            return Err(err);
        }

        let partitions = self
            .partitions
            .remove(&id)
            .map(|tags| tags.into_values().collect())
            .unwrap_or_default();
        let record = self
            .collections
            .remove(name)
            .ok_or_else(|| MetaError::Internal(format!("collection '{}' vanished", name)))?;
        Ok((record, partitions))
    }

    /// Write back partition records removed by a failed collection drop. A
    /// record that cannot be written back leaves the index as well.
    async fn restore_partitions(&mut self, records: &[PartitionRecord]) {
        for record in records {
            let restored = match rmp_serde::to_vec(record) {
                Ok(value) => {
                    self.kv
                        .set(&partition_key(record.collection_id, record.id), value)
                        .await
                }
                Err(err) => Err(err.into()),
            };
            if let Err(err) = restored {
                event!(
                    Level::ERROR,
                    partition = %record.tag,
                    collection = %record.collection_name,
                    error = %err,
                    "failed to restore partition after aborted collection drop"
                );
                if let Some(tags) = self.partitions.get_mut(&record.collection_id) {
                    tags.remove(&record.tag);
                }
            }
        }
    }

    pub fn has_partition(&self, collection: &str, tag: &str) -> bool {
        self.collections
            .get(collection)
            .and_then(|c| self.partitions.get(&c.id))
            .is_some_and(|tags| tags.contains_key(tag))
    }

    pub fn get_partition(&self, collection: &str, tag: &str) -> Result<&PartitionRecord> {
        let id = self.get_collection(collection)?.id;
        self.partitions
            .get(&id)
            .and_then(|tags| tags.get(tag))
            .ok_or_else(|| {
                MetaError::NotFound(format!("partition '{}' of collection '{}'", tag, collection))
            })
    }

    /// Partition tags of a collection in lexical order
    pub fn partition_tags(&self, collection: &str) -> Result<Vec<String>> {
        let id = self.get_collection(collection)?.id;
        Ok(self
            .partitions
            .get(&id)
            .map(|tags| tags.keys().cloned().collect())
            .unwrap_or_default())
    }

    pub fn partition_count(&self, collection_id: UniqueId) -> usize {
        self.partitions.get(&collection_id).map_or(0, |tags| tags.len())
    }

    pub async fn add_partition(&mut self, record: PartitionRecord) -> Result<()> {
        let collection_id = self.get_collection(&record.collection_name)?.id;
        if collection_id != record.collection_id {
            return Err(MetaError::Internal(format!(
                "partition '{}' points at collection {} but '{}' is {}",
                record.tag, record.collection_id, record.collection_name, collection_id
            )));
        }
        if self.has_partition(&record.collection_name, &record.tag) {
            return Err(MetaError::AlreadyExists(format!(
                "partition '{}' of collection '{}'",
                record.tag, record.collection_name
            )));
        }

        let value = rmp_serde::to_vec(&record)?;
        self.kv
            .set(&partition_key(record.collection_id, record.id), value)
            .await?;

        self.partitions
            .entry(record.collection_id)
            .or_default()
            .insert(record.tag.clone(), record);
        Ok(())
    }

    pub async fn delete_partition(&mut self, collection: &str, tag: &str) -> Result<PartitionRecord> {
        let record = self.get_partition(collection, tag)?.clone();
        self.kv
            .delete(&partition_key(record.collection_id, record.id))
            .await?;

        if let Some(tags) = self.partitions.get_mut(&record.collection_id) {
            tags.remove(tag);
        }
        Ok(record)
    }
}

/// Decode every committed collection and partition record in `kv`.
pub async fn load_records(kv: &dyn KvStore) -> Result<(Vec<CollectionRecord>, Vec<PartitionRecord>)> {
    let mut collections = Vec::new();
    for (key, value) in kv.load_with_prefix(COLLECTION_PREFIX).await? {
        let record: CollectionRecord = rmp_serde::from_slice(&value)
            .map_err(|e| MetaError::Internal(format!("corrupt record at '{}': {}", key, e)))?;
        collections.push(record);
    }

    let mut partitions = Vec::new();
    for (key, value) in kv.load_with_prefix(PARTITION_PREFIX).await? {
        let record: PartitionRecord = rmp_serde::from_slice(&value)
            .map_err(|e| MetaError::Internal(format!("corrupt record at '{}': {}", key, e)))?;
        partitions.push(record);
    }

    Ok((collections, partitions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CollectionSchema, DataType, FieldSchema};
    use crate::storage::MemoryKv;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory store whose `fail_on`-th delete (1-based) fails.
    struct FailingDeleteKv {
        inner: MemoryKv,
        deletes: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl KvStore for FailingDeleteKv {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            if self.deletes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(MetaError::Unavailable("injected delete failure".to_string()));
            }
            self.inner.delete(key).await
        }

        async fn load_with_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
            self.inner.load_with_prefix(prefix).await
        }
    }

    fn record(id: UniqueId, name: &str) -> CollectionRecord {
        CollectionRecord {
            id,
            schema: CollectionSchema::new(name, vec![FieldSchema::new("id", DataType::Int64)]),
            create_time: 100 + id as u64,
        }
    }

    fn partition(id: UniqueId, collection: &CollectionRecord, tag: &str) -> PartitionRecord {
        PartitionRecord {
            id,
            collection_id: collection.id,
            collection_name: collection.name().to_string(),
            tag: tag.to_string(),
            create_time: 200 + id as u64,
        }
    }

    #[tokio::test]
    async fn test_add_and_reload() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let mut meta = MetaTable::load(kv.clone()).await.unwrap();

        let docs = record(1, "docs");
        meta.add_collection(docs.clone()).await.unwrap();
        meta.add_partition(partition(2, &docs, "p1")).await.unwrap();

        let reloaded = MetaTable::load(kv).await.unwrap();
        assert_eq!(reloaded.get_collection("docs").unwrap(), &docs);
        assert_eq!(reloaded.partition_tags("docs").unwrap(), vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_collection_name() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let mut meta = MetaTable::load(kv).await.unwrap();
        meta.add_collection(record(1, "docs")).await.unwrap();

        let err = meta.add_collection(record(2, "docs")).await.unwrap_err();
        assert!(matches!(err, MetaError::AlreadyExists(_)));
        assert_eq!(meta.get_collection("docs").unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_delete_collection_drops_partitions() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let mut meta = MetaTable::load(kv.clone()).await.unwrap();
        let docs = record(1, "docs");
        meta.add_collection(docs.clone()).await.unwrap();
        meta.add_partition(partition(2, &docs, "a")).await.unwrap();
        meta.add_partition(partition(3, &docs, "b")).await.unwrap();

        let (dropped, partitions) = meta.delete_collection("docs").await.unwrap();
        assert_eq!(dropped.id, 1);
        assert_eq!(partitions.len(), 2);
        assert!(kv.load_with_prefix(PARTITION_PREFIX).await.unwrap().is_empty());
        assert!(!meta.has_partition("docs", "a"));
        assert!(matches!(
            meta.delete_collection("docs").await,
            Err(MetaError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_index_untouched() {
        let mem = Arc::new(MemoryKv::new());
        let mut meta = MetaTable::load(mem.clone()).await.unwrap();

        mem.set_available(false);
        let err = meta.add_collection(record(1, "docs")).await.unwrap_err();
        assert!(matches!(err, MetaError::Unavailable(_)));
        assert!(!meta.has_collection("docs"));
    }

    #[tokio::test]
    async fn test_partition_lookup_errors() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let mut meta = MetaTable::load(kv).await.unwrap();
        assert!(matches!(meta.partition_tags("nope"), Err(MetaError::NotFound(_))));

        let docs = record(1, "docs");
        meta.add_collection(docs.clone()).await.unwrap();
        assert!(matches!(
            meta.delete_partition("docs", "missing").await,
            Err(MetaError::NotFound(_))
        ));
        meta.add_partition(partition(2, &docs, "a")).await.unwrap();
        assert!(matches!(
            meta.add_partition(partition(3, &docs, "a")).await,
            Err(MetaError::AlreadyExists(_))
        ));
        assert_eq!(meta.partition_count(1), 1);
    }

    #[tokio::test]
    async fn test_failed_collection_drop_keeps_store_and_index_in_step() {
        for fail_on in [2, 3] {
            let kv: Arc<dyn KvStore> = Arc::new(FailingDeleteKv {
                inner: MemoryKv::new(),
                deletes: AtomicUsize::new(0),
                fail_on,
            });
            let mut meta = MetaTable::load(kv.clone()).await.unwrap();
            let docs = record(1, "docs");
            meta.add_collection(docs.clone()).await.unwrap();
            meta.add_partition(partition(2, &docs, "a")).await.unwrap();
            meta.add_partition(partition(3, &docs, "b")).await.unwrap();

            let err = meta.delete_collection("docs").await.unwrap_err();
            assert!(matches!(err, MetaError::Unavailable(_)));

            let reloaded = MetaTable::load(kv).await.unwrap();
            assert!(reloaded.has_collection("docs"));
            assert_eq!(
                meta.partition_tags("docs").unwrap(),
                reloaded.partition_tags("docs").unwrap()
            );
            assert_eq!(meta.partition_tags("docs").unwrap(), vec!["a", "b"]);
        }
    }
}
