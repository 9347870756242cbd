use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{BlobError, BlobStore, StoredBlob};

/// Process-local blob store, selected with `STORAGE_BACKEND=memory`
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<String, StoredBlob>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), BlobError> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredBlob {
                data,
                content_type: Some(content_type.to_string()),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredBlob>, BlobError> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), BlobError> {
        let mut objects = self.objects.write().await;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }
}
