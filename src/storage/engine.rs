use crate::core::Result;
use async_trait::async_trait;

/// Key-value storage trait - allows pluggable metadata backends.
///
/// Every call is atomic for a single key; nothing spans keys. Keys are
/// namespaced with `/`-separated prefixes (`collection/<id>`, `tso/timestamp`).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value, `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite a value
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove a key; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order
    async fn load_with_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}
