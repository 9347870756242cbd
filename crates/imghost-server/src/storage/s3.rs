use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    types::{Delete, ObjectIdentifier},
    Client,
};
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use super::{config::StorageConfig, BlobError, BlobStore, StoredBlob};

/// DeleteObjects accepts at most this many keys per request
const MAX_KEYS_PER_DELETE: usize = 1000;

/// S3-compatible blob store (AWS, MinIO, R2)
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(config: StorageConfig) -> Self {
        debug!("Initializing storage with config: {:?}", config);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "imghost-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!(bucket = %config.bucket, "Storage client initialized");

        Self {
            client,
            bucket: config.bucket,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl BlobStore for S3Storage {
    #[instrument(skip(self, data), fields(bucket = %self.bucket, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), BlobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| BlobError::Put {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        debug!("Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> Result<Option<StoredBlob>, BlobError> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    return Ok(None);
                }
                return Err(BlobError::Get {
                    key: key.to_string(),
                    message: e.to_string(),
                });
            },
        };

        let content_type = response.content_type().map(|s| s.to_string());
        let data = response
            .body
            .collect()
            .await
            .map_err(|e| BlobError::Get {
                key: key.to_string(),
                message: e.to_string(),
            })?
            .into_bytes();

        Ok(Some(StoredBlob { data, content_type }))
    }

    #[instrument(skip(self, keys), fields(bucket = %self.bucket, count = keys.len()))]
    async fn delete_many(&self, keys: &[String]) -> Result<(), BlobError> {
        if keys.is_empty() {
            return Ok(());
        }

        for chunk in keys.chunks(MAX_KEYS_PER_DELETE) {
            let objects = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| BlobError::Client(e.to_string()))?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| BlobError::Client(e.to_string()))?;

            let response = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| BlobError::Delete {
                    requested: chunk.len(),
                    failed: chunk.len(),
                    message: e.to_string(),
                })?;

            // S3 reports absent keys as deleted; anything listed here is a real failure.
            let errors = response.errors();
            if !errors.is_empty() {
                for error in errors {
                    warn!(
                        key = error.key().unwrap_or_default(),
                        code = error.code().unwrap_or_default(),
                        "Object deletion failed"
                    );
                }
                return Err(BlobError::Delete {
                    requested: chunk.len(),
                    failed: errors.len(),
                    message: errors
                        .first()
                        .and_then(|e| e.message())
                        .unwrap_or("unknown error")
                        .to_string(),
                });
            }
        }

        info!(count = keys.len(), "Deleted objects from s3://{}", self.bucket);
        Ok(())
    }
}
