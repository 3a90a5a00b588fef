use std::path::Path;

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;

use super::{ensure_parent_dir, StorageError, WeightSource};

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    bucket_name: String,
}

impl S3Service {
    pub fn new(client: Client, bucket_name: String) -> Self {
        Self {
            client,
            bucket_name,
        }
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::S3(DisplayErrorContext(e).to_string()))?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }

    pub async fn download_object(&self, key: &str, dest: &Path) -> Result<(), StorageError> {
        let bytes = self.get_object(key).await?;
        if bytes.is_empty() {
            return Err(StorageError::EmptyObject(format!("s3://{}/{}", self.bucket_name, key)));
        }
        ensure_parent_dir(dest).await?;
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }
}

/// The weight file stored under `key` in the service's bucket.
pub struct S3ModelObject {
    service: S3Service,
    key: String,
}

impl S3ModelObject {
    pub fn new(service: S3Service, key: String) -> Self {
        Self { service, key }
    }
}

impl WeightSource for S3ModelObject {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.service.bucket_name(), self.key)
    }

    async fn fetch_to(&self, dest: &Path) -> Result<(), StorageError> {
        self.service.download_object(&self.key, dest).await
    }
}
