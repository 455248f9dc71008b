use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{error, info};

use super::{BlobStore, StorageError};

/// AWS S3 blob store.
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(
        aws_access_key: &str,
        aws_secret_key: &str,
        region: &str,
        bucket: &str,
    ) -> Self {
        let creds = aws_sdk_s3::config::Credentials::new(
            aws_access_key,
            aws_secret_key,
            None,
            None,
            "paperstore",
        );

        let config = aws_sdk_s3::config::Builder::new()
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .credentials_provider(creds)
            .build();

        Self {
            client: Client::from_conf(config),
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for S3Storage {
    async fn upload_bytes(
        &self,
        data: &[u8],
        key: &str,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let body = aws_sdk_s3::primitives::ByteStream::from(data.to_vec());
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body);

        if let Some(ct) = content_type {
            req = req.content_type(ct);
        }

        req.send().await.map_err(|e| {
            error!("S3 upload error for {key}: {e}");
            StorageError::S3(format!("{e}"))
        })?;

        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let msg = format!("{e}");
                if msg.contains("NoSuchKey") || msg.contains("404") {
                    StorageError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    StorageError::S3(msg)
                }
            })?;

        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(format!("Failed to read S3 body: {e}")))?;

        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                error!("S3 delete error for {key}: {e}");
                StorageError::S3(format!("{e}"))
            })?;
        info!("Deleted {key} from bucket {}", self.bucket);
        Ok(true)
    }

    fn provider_name(&self) -> &str {
        "aws-s3"
    }
}
