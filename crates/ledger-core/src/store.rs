//! Persistent key-value storage.

use async_trait::async_trait;

use crate::error::StoreError;

/// A small persistent string store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert or overwrite the value for `key`.
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
