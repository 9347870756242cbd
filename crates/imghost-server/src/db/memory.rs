use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ExpiryChange, ImagePage, ImageQuery, ImageRecord, ImageUpdate, MetadataStore, StoreError,
    TagCount,
};

/// Process-local metadata store, selected with `METADATA_BACKEND=memory`
#[derive(Default)]
pub struct InMemoryMetadataStore {
    images: RwLock<HashMap<Uuid, ImageRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(a: &ImageRecord, b: &ImageRecord) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get_images(&self, query: &ImageQuery) -> Result<ImagePage, StoreError> {
        let now = Utc::now();
        let images = self.images.read().await;

        let mut matching: Vec<&ImageRecord> = images
            .values()
            .filter(|record| !record.is_expired(now))
            .filter(|record| {
                query
                    .tag
                    .as_ref()
                    .map(|tag| record.tags.contains(tag))
                    .unwrap_or(true)
            })
            .filter(|record| {
                query
                    .orientation
                    .map(|o| record.orientation == o)
                    .unwrap_or(true)
            })
            .collect();
        matching.sort_by(|a, b| newest_first(a, b));

        let total = matching.len() as u64;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let page = matching
            .into_iter()
            .skip(offset)
            .take(query.limit as usize)
            .cloned()
            .collect();

        Ok(ImagePage {
            images: page,
            total,
        })
    }

    async fn get_image(&self, id: Uuid) -> Result<Option<ImageRecord>, StoreError> {
        let now = Utc::now();
        Ok(self
            .images
            .read()
            .await
            .get(&id)
            .filter(|record| !record.is_expired(now))
            .cloned())
    }

    async fn create_image(&self, record: &ImageRecord) -> Result<ImageRecord, StoreError> {
        let mut images = self.images.write().await;
        if images.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        images.insert(record.id, record.clone());
        Ok(record.clone())
    }

    async fn update_image(
        &self,
        id: Uuid,
        update: &ImageUpdate,
    ) -> Result<Option<ImageRecord>, StoreError> {
        let now = Utc::now();
        let mut images = self.images.write().await;

        let Some(record) = images.get_mut(&id).filter(|r| !r.is_expired(now)) else {
            return Ok(None);
        };

        if let Some(change) = update.expiry {
            record.expiry_time = match change {
                ExpiryChange::Set(at) => Some(at),
                ExpiryChange::Clear => None,
            };
        }
        if let Some(ref tags) = update.tags {
            record.tags = tags.clone();
        }

        Ok(Some(record.clone()).filter(|r| !r.is_expired(now)))
    }

    async fn delete_image(&self, id: Uuid) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self.images.write().await.remove(&id))
    }

    async fn list_tags(&self) -> Result<Vec<TagCount>, StoreError> {
        let now = Utc::now();
        let images = self.images.read().await;

        let mut counts: HashMap<&str, u64> = HashMap::new();
        for record in images.values().filter(|r| !r.is_expired(now)) {
            for tag in &record.tags {
                *counts.entry(tag.as_str()).or_default() += 1;
            }
        }

        let mut tags: Vec<TagCount> = counts
            .into_iter()
            .map(|(name, count)| TagCount {
                name: name.to_string(),
                count,
            })
            .collect();
        tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));

        Ok(tags)
    }

    async fn delete_tag(&self, name: &str) -> Result<Vec<ImageRecord>, StoreError> {
        let mut images = self.images.write().await;

        let ids: Vec<Uuid> = images
            .values()
            .filter(|record| record.tags.iter().any(|t| t == name))
            .map(|record| record.id)
            .collect();

        let mut removed: Vec<ImageRecord> =
            ids.iter().filter_map(|id| images.remove(id)).collect();
        removed.sort_by(newest_first);

        Ok(removed)
    }
}
